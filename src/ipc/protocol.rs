//! Control channel endpoint naming and wire format
//!
//! Messages are UTF-8 text, one per line, terminated by `\n`. There is no
//! other framing and no acknowledgement.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Environment variable carrying the endpoint path into the agent
pub const PIPE_ENV_VAR: &str = "HOTKEYS_IPC_PIPE";

/// Read buffer size on the server side
pub const BUFFER_SIZE: usize = 16 * 1024;

/// DACL of the Windows pipe: full access for LocalSystem, read and write for
/// the interactive user the agent runs as
pub const PIPE_SECURITY: &str = "D:(A;;GA;;;SY)(A;;GRGW;;;IU)";

/// A uniquely named control channel endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
}

impl Endpoint {
    /// Fresh endpoint named from the current time plus a random value, so
    /// concurrent and historical launches never share a name
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self::with_name(format!("hotkeys-{}-{}", nanos, rand::random::<u32>()))
    }

    /// Endpoint with an explicit name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Bare endpoint name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path clients open: a named pipe on Windows, a socket file elsewhere
    pub fn path(&self) -> PathBuf {
        #[cfg(windows)]
        {
            PathBuf::from(format!(r"\\.\pipe\{}", self.name))
        }
        #[cfg(not(windows))]
        {
            std::env::temp_dir().join(format!("{}.sock", self.name))
        }
    }
}

/// Encode one message as a single newline-terminated line.
///
/// Embedded line breaks are flattened so one `send` is always one line.
pub fn encode_line(message: &str) -> Vec<u8> {
    let mut line: Vec<u8> = message
        .bytes()
        .map(|b| if b == b'\n' || b == b'\r' { b' ' } else { b })
        .collect();
    line.push(b'\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_are_unique() {
        let a = Endpoint::generate();
        let b = Endpoint::generate();
        assert_ne!(a, b);
        assert!(a.name().starts_with("hotkeys-"));
    }

    #[test]
    fn test_path_contains_name() {
        let ep = Endpoint::with_name("hotkeys-1-2");
        assert!(ep.path().to_string_lossy().contains("hotkeys-1-2"));
    }

    #[test]
    fn test_pipe_security_admits_interactive_writer() {
        assert!(PIPE_SECURITY.starts_with("D:"));
        assert!(PIPE_SECURITY.contains("(A;;GA;;;SY)"));
        assert!(PIPE_SECURITY.contains("(A;;GRGW;;;IU)"));
        // no world or network grants
        assert!(!PIPE_SECURITY.contains(";WD)"));
        assert!(!PIPE_SECURITY.contains(";NU)"));
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(encode_line("STOPPING"), b"STOPPING\n");
        assert_eq!(encode_line("a\nb\r\n"), b"a b  \n");
        assert_eq!(encode_line(""), b"\n");
    }
}
