//! Base64 file transfer over a command channel.
//!
//! Content is never interpolated into a command as text. Each file is
//! base64-encoded and decoded on the far side by a single
//! `base64 -d > path << 'MARKER'` command, so newlines, quotes and shell
//! metacharacters arrive byte for byte. Large files are split into several
//! appending commands to keep each exec payload bounded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};

use crate::vfs::path;

/// Raw bytes per command. A multiple of 3 so chunks encode without padding,
/// and small enough that the encoded body stays under 64 KiB.
pub const CHUNK_BYTES: usize = 45 * 1024;

/// Encoded line width, as produced by GNU `base64`.
const LINE_WIDTH: usize = 76;

/// Heredoc terminator. `_` is outside the base64 alphabet, so the payload
/// can never contain this line.
const MARKER: &str = "SHELLBOX_EOF";

fn quote(p: &str) -> String {
    shell_words::quote(p).into_owned()
}

fn encode_lines(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut body = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 1);
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        body.push_str(&String::from_utf8_lossy(line));
        body.push('\n');
    }
    body
}

/// Commands that recreate `target` (absolute) with `content`. Run them in
/// order; each must exit 0.
pub fn upload_commands(target: &str, content: &[u8], mode: Option<u32>) -> Vec<String> {
    let quoted = quote(target);
    let parent = quote(&path::parent(target));

    let mut commands = Vec::new();
    let mut chunks = content.chunks(CHUNK_BYTES).peekable();
    if chunks.peek().is_none() {
        commands.push(format!(
            "mkdir -p {parent} && base64 -d > {quoted} << '{MARKER}'\n{MARKER}"
        ));
    }
    for (idx, chunk) in chunks.enumerate() {
        let body = encode_lines(chunk);
        let command = if idx == 0 {
            format!("mkdir -p {parent} && base64 -d > {quoted} << '{MARKER}'\n{body}{MARKER}")
        } else {
            format!("base64 -d >> {quoted} << '{MARKER}'\n{body}{MARKER}")
        };
        commands.push(command);
    }

    if let Some(mode) = mode.filter(|m| *m != crate::vfs::FILE_MODE) {
        if let Some(last) = commands.last_mut() {
            // The chmod has to precede the heredoc body on the command line.
            if let Some((head, rest)) = last.split_once('\n') {
                *last = format!("{head} && chmod {mode:o} {quoted}\n{rest}");
            }
        }
    }
    commands
}

/// Command printing the byte size of `target`.
pub fn size_command(target: &str) -> String {
    format!("wc -c < {}", quote(target))
}

/// Parses [`size_command`] output.
pub fn parse_size(stdout: &str) -> Option<u64> {
    stdout.split_whitespace().next()?.parse().ok()
}

/// Command printing `target` base64-encoded.
pub fn download_command(target: &str) -> String {
    format!("base64 {}", quote(target))
}

/// Decodes [`download_command`] output, ignoring line breaks.
pub fn decode_payload(stdout: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = stdout.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Command printing the octal mode and mtime of `target`.
pub fn stat_command(target: &str) -> String {
    format!("stat -c '%a %Y' {}", quote(target))
}

/// Parses [`stat_command`] output.
pub fn parse_stat(stdout: &str) -> Option<(u32, DateTime<Utc>)> {
    let mut parts = stdout.split_whitespace();
    let mode = u32::from_str_radix(parts.next()?, 8).ok()?;
    let secs: i64 = parts.next()?.parse().ok()?;
    Some((mode, DateTime::from_timestamp(secs, 0)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{ShellOptions, VirtualShell};

    async fn round_trip(content: &[u8]) -> Vec<u8> {
        let mut sh = VirtualShell::new(ShellOptions::default());
        for cmd in upload_commands("/app/dir with space/f.txt", content, None) {
            let r = sh.execute(&cmd).await;
            assert_eq!(r.exit_code, 0, "{}", r.stderr);
        }
        let size = sh.execute(&size_command("/app/dir with space/f.txt")).await;
        assert_eq!(parse_size(&size.stdout), Some(content.len() as u64));

        let r = sh.execute(&download_command("/app/dir with space/f.txt")).await;
        decode_payload(&r.stdout).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_special_content() {
        let content = concat!(
            "line 1\n'single' \"double\" `tick` $HOME && || ; EOF\n",
            "\tüñíçødé ✓\nno trailing newline",
        );
        assert_eq!(round_trip(content.as_bytes()).await, content.as_bytes());
    }

    #[tokio::test]
    async fn test_round_trip_binary_and_empty() {
        let binary: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        assert_eq!(round_trip(&binary).await, binary);
        assert_eq!(round_trip(b"").await, b"");
    }

    #[tokio::test]
    async fn test_large_content_is_chunked() {
        let big: Vec<u8> = (0..(CHUNK_BYTES * 2 + 10)).map(|i| (i % 251) as u8).collect();
        let commands = upload_commands("/app/big.bin", &big, None);
        assert_eq!(commands.len(), 3);
        assert!(commands[1].starts_with("base64 -d >> "));
        assert!(commands.iter().all(|c| c.len() < 64 * 1024));
        assert_eq!(round_trip(&big).await, big);
    }

    #[test]
    fn test_payload_never_contains_marker() {
        let content = format!("{MARKER}\n{MARKER}");
        let cmd = &upload_commands("/a", content.as_bytes(), None)[0];
        assert_eq!(cmd.matches(MARKER).count(), 2);
    }

    #[test]
    fn test_mode_adds_chmod_before_body() {
        let cmds = upload_commands("/app/run.sh", b"#!/bin/sh\n", Some(0o755));
        let first_line = cmds[0].lines().next().unwrap();
        assert!(first_line.ends_with("&& chmod 755 /app/run.sh"));
        let plain = upload_commands("/app/a", b"x", Some(0o644));
        assert!(!plain[0].contains("chmod"));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_size("  42\n"), Some(42));
        assert_eq!(parse_size(""), None);
        let (mode, mtime) = parse_stat("755 1700000000\n").unwrap();
        assert_eq!(mode, 0o755);
        assert_eq!(mtime.timestamp(), 1_700_000_000);
        assert!(parse_stat("garbage").is_none());
    }
}
