//! Windows service integration
//!
//! The service itself never touches hotkeys. It launches the agent into the
//! interactive session, relays stop requests to the supervisor and logs what
//! the agent reports over the control channel.

mod install;
mod runner;

use std::io;

pub use install::{install, remove};
pub use runner::{run_dispatcher, ServiceArgs};

/// Name registered with the service manager
pub const SERVICE_NAME: &str = "Hotkeys";
/// Display name shown in the services console
pub const SERVICE_DISPLAY_NAME: &str = "Hotkeys Service";
/// Description shown in the services console
pub const SERVICE_DESCRIPTION: &str = "Binds Windows hotkeys to specific actions";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cannot get executable path: {0}")]
    Executable(#[source] io::Error),

    #[error("cannot connect to service manager: {0}")]
    Connect(#[source] io::Error),

    #[error("service {SERVICE_NAME} already exists")]
    AlreadyExists,

    #[error("service {SERVICE_NAME} is not installed: {0}")]
    NotInstalled(#[source] io::Error),

    #[error("cannot create service: {0}")]
    Create(#[source] io::Error),

    #[error("cannot set service description: {0}")]
    Describe(#[source] io::Error),

    #[error("failed to delete service: {0}")]
    Delete(#[source] io::Error),

    #[error("service control dispatcher: {0}")]
    Dispatcher(#[source] io::Error),

    #[error("register control handler: {0}")]
    Register(#[source] io::Error),

    #[error("build runtime: {0}")]
    Runtime(#[source] io::Error),
}
