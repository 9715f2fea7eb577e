//! Per-session sandboxes for running shell-style commands.
//!
//! A [`registry::SessionRegistry`] maps session ids to sandboxes of one
//! [`runtime::Runtime`] backend: either an in-process [`shell::VirtualShell`]
//! over a [`vfs::VirtualFs`], or a Docker container per session.

pub mod config;
pub mod registry;
pub mod runtime;
pub mod shell;
pub mod templates;
pub mod vfs;
