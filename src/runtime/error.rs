//! Domain-specific error types for runtime operations.
//!
//! Only structural failures live here. A command that runs and exits nonzero
//! is a normal [`super::CommandResult`], never an error.

use std::time::Duration;

/// Errors raised by a [`super::Runtime`] backend or the session registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// No live sandbox is registered for the session.
    #[error("No container for session: {session_id}")]
    ContainerNotFound { session_id: String },

    /// The backend could not allocate or start a sandbox.
    #[error("Container creation failed: {message}")]
    ContainerCreation { message: String },

    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// The sandbox image is not present on the host.
    #[error("Container image not found: {image}")]
    ImageNotFound { image: String },

    /// The operation exceeded its time bound.
    #[error("Operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// A file transfer failed or did not verify.
    #[error("File transfer failed for {path}: {message}")]
    Transfer { path: String, message: String },

    /// The sandbox was stopped while the operation was in flight.
    #[error("Session {session_id} was stopped during the operation")]
    Cancelled { session_id: String },

    /// No published port could be resolved.
    #[error("No published port for session {session_id}")]
    PortUnavailable { session_id: String },

    /// Any other backend failure (exec, inspect, stats).
    #[error("Container operation failed: {message}")]
    Io { message: String },
}

impl RuntimeError {
    /// Creates a `ContainerNotFound` error.
    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self::ContainerNotFound {
            session_id: session_id.into(),
        }
    }

    /// Creates a `ContainerCreation` error.
    pub fn creation(message: impl Into<String>) -> Self {
        Self::ContainerCreation {
            message: message.into(),
        }
    }

    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates a `Transfer` error.
    pub fn transfer(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a `Cancelled` error.
    pub fn cancelled(session_id: impl Into<String>) -> Self {
        Self::Cancelled {
            session_id: session_id.into(),
        }
    }

    /// Creates a `PortUnavailable` error.
    pub fn port_unavailable(session_id: impl Into<String>) -> Self {
        Self::PortUnavailable {
            session_id: session_id.into(),
        }
    }

    /// Creates an `Io` error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Returns true if no sandbox exists for the session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound { .. })
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the sandbox was stopped under the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if this is a transfer verification failure.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer { .. })
    }

    /// Returns true for every way sandbox creation can fail.
    pub fn is_creation_failure(&self) -> bool {
        matches!(
            self,
            Self::ContainerCreation { .. }
                | Self::DockerUnavailable { .. }
                | Self::ImageNotFound { .. }
        )
    }
}

/// Result alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = RuntimeError::not_found("s1");
        assert!(err.is_not_found());
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "No container for session: s1");
    }

    #[test]
    fn test_timeout_error() {
        let err = RuntimeError::timeout(Duration::from_secs(120));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Operation timed out after 120 seconds");
    }

    #[test]
    fn test_transfer_error() {
        let err = RuntimeError::transfer("/app/a.png", "size mismatch: expected 10, got 8");
        assert!(err.is_transfer());
        assert_eq!(
            err.to_string(),
            "File transfer failed for /app/a.png: size mismatch: expected 10, got 8"
        );
    }

    #[test]
    fn test_image_not_found_error() {
        let err = RuntimeError::image_not_found("shellbox/node:20");
        assert_eq!(err.to_string(), "Container image not found: shellbox/node:20");
    }

    #[test]
    fn test_creation_failures_are_grouped() {
        assert!(RuntimeError::creation("no space").is_creation_failure());
        assert!(RuntimeError::docker_unavailable("daemon down").is_creation_failure());
        assert!(RuntimeError::image_not_found("x").is_creation_failure());
        assert!(!RuntimeError::timeout(Duration::from_secs(1)).is_creation_failure());
        assert!(!RuntimeError::not_found("s").is_creation_failure());
    }

    #[test]
    fn test_error_variants_are_distinct() {
        let cancelled = RuntimeError::cancelled("s1");
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_not_found());
        assert!(!cancelled.is_timeout());
        assert_eq!(
            cancelled.to_string(),
            "Session s1 was stopped during the operation"
        );
        assert_eq!(
            RuntimeError::port_unavailable("s1").to_string(),
            "No published port for session s1"
        );
        assert_eq!(
            RuntimeError::io("exec failed").to_string(),
            "Container operation failed: exec failed"
        );
    }
}
