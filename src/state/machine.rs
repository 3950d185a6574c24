//! Service supervisor state machine
//!
//! Drives one service run: launch the agent, report running, wait for a stop
//! request, kill the agent and report stopped. There is a single launch
//! attempt; restarting is the service manager's job.

use std::io;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::session::LaunchError;

/// Time given to the OS to tear the agent down after it has been killed
pub const STOP_PAUSE: Duration = Duration::from_millis(500);

/// Exit code reported when the agent could not be launched
pub const LAUNCH_FAILED_EXIT_CODE: u32 = 1;

/// States reported to the service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    /// Launching the agent
    #[default]
    StartPending,
    /// Agent is up, waiting for a stop request
    Running,
    /// Agent killed, waiting for teardown
    StopPending,
    /// Run is over
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::StartPending => write!(f, "StartPending"),
            ServiceState::Running => write!(f, "Running"),
            ServiceState::StopPending => write!(f, "StopPending"),
            ServiceState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Requests relayed from the service control handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Report the current state again
    Interrogate,
    /// Stop the service
    Stop,
    /// The system is shutting down
    Shutdown,
}

/// A launched agent process
pub trait AgentHandle {
    /// Process identifier
    fn pid(&self) -> u32;

    /// Kill the process unconditionally
    fn terminate(&self) -> io::Result<()>;
}

/// Something that can start the agent
pub trait AgentLauncher {
    /// Handle to the started agent process
    type Agent: AgentHandle;

    /// Start the agent in the active user session
    fn launch(&mut self) -> Result<Self::Agent, LaunchError>;
}

/// Sink for state changes, normally the service manager
pub trait StatusReporter {
    /// Publish `state`; `exit_code` is only meaningful for `Stopped`
    fn report(&mut self, state: ServiceState, exit_code: u32);
}

/// Runs the agent for the lifetime of one service run
pub struct Supervisor<L, R> {
    launcher: L,
    reporter: R,
    state: ServiceState,
    stop_pause: Duration,
}

impl<L: AgentLauncher, R: StatusReporter> Supervisor<L, R> {
    pub fn new(launcher: L, reporter: R) -> Self {
        Self {
            launcher,
            reporter,
            state: ServiceState::StartPending,
            stop_pause: STOP_PAUSE,
        }
    }

    /// Override the pause between killing the agent and reporting `Stopped`
    pub fn with_stop_pause(mut self, pause: Duration) -> Self {
        self.stop_pause = pause;
        self
    }

    /// Get the current state
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// The status sink
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Execute the run and return the service exit code.
    ///
    /// A closed request channel is treated like a stop request.
    pub async fn run(&mut self, mut requests: mpsc::Receiver<ControlRequest>) -> u32 {
        self.transition(ServiceState::StartPending, 0);

        let agent = match self.launcher.launch() {
            Ok(agent) => agent,
            Err(e) => {
                error!(%e, "failed to launch agent");
                self.transition(ServiceState::Stopped, LAUNCH_FAILED_EXIT_CODE);
                return LAUNCH_FAILED_EXIT_CODE;
            }
        };
        info!(pid = agent.pid(), "agent started");
        self.transition(ServiceState::Running, 0);

        loop {
            match requests.recv().await {
                Some(ControlRequest::Interrogate) => {
                    debug!(state = %self.state, "interrogate");
                    self.reporter.report(self.state, 0);
                }
                Some(request @ (ControlRequest::Stop | ControlRequest::Shutdown)) => {
                    info!(?request, "stop requested");
                    break;
                }
                None => {
                    warn!("control request channel closed, stopping");
                    break;
                }
            }
        }

        if let Err(e) = agent.terminate() {
            warn!(pid = agent.pid(), %e, "failed to terminate agent");
        }
        self.transition(ServiceState::StopPending, 0);
        tokio::time::sleep(self.stop_pause).await;
        self.transition(ServiceState::Stopped, 0);
        0
    }

    fn transition(&mut self, new_state: ServiceState, exit_code: u32) {
        info!(from = %self.state, to = %new_state, "service state transition");
        self.state = new_state;
        self.reporter.report(new_state, exit_code);
    }
}
