//! Control channel between the privileged service and the session agent
//!
//! One direction only: the agent writes status lines, the service logs them.

mod client;
mod protocol;
mod server;

use std::path::PathBuf;

pub use client::ControlClient;
pub use protocol::{Endpoint, PIPE_ENV_VAR};
pub use server::ControlServer;

/// Control channel failures. Always logged, never fatal to hotkey handling.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("create endpoint: {0}")]
    Bind(#[source] std::io::Error),

    #[error("accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connect {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write: {0}")]
    Write(#[source] std::io::Error),
}
