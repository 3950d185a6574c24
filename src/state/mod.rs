//! Service supervisor
//!
//! Explicit state machine for one service run:
//! - StartPending: launching the agent into the user session
//! - Running: agent up, relaying status queries
//! - StopPending: agent killed, giving the OS time to clean up
//! - Stopped: run over, with a non-zero exit code if the launch failed

mod machine;

pub use machine::{
    AgentHandle, AgentLauncher, ControlRequest, ServiceState, StatusReporter, Supervisor,
};
