//! Session launcher
//!
//! Starts the hotkey agent inside the active interactive user session, with
//! that user's identity and environment.

mod env_block;
mod launcher;
#[cfg(windows)]
mod win32;

use std::io;

pub use launcher::{agent_command_line, LaunchRequest, SessionLauncher};
#[cfg(windows)]
pub use win32::Win32Session;

/// Why the agent could not be started
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("no interactive user session is active")]
    NoInteractiveSession,

    #[error("query user token for session {session}: {source}")]
    SessionTokenUnavailable {
        session: u32,
        #[source]
        source: io::Error,
    },

    #[error("duplicate user token: {0}")]
    TokenDuplication(#[source] io::Error),

    #[error("load user environment: {0}")]
    EnvironmentUnavailable(#[source] io::Error),

    #[error("environment variable {name:?} contains a NUL character")]
    InvalidEnvironment { name: String },

    #[error("resolve executable path: {0}")]
    Executable(#[source] io::Error),

    #[error("create agent process: {0}")]
    ProcessCreation(#[source] io::Error),
}
