//! Service control dispatcher glue
//!
//! `StartServiceCtrlDispatcherW` blocks the main thread and calls
//! [`service_main`] on a thread of its own. Control requests arrive on yet
//! another thread through [`control_handler`], which forwards them to the
//! supervisor over a channel.

use std::ffi::c_void;
use std::io;
use std::ptr;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use windows_sys::core::PWSTR;
use windows_sys::Win32::Foundation::{
    ERROR_CALL_NOT_IMPLEMENTED, ERROR_FAILED_SERVICE_CONTROLLER_CONNECT,
    ERROR_SERVICE_SPECIFIC_ERROR, NO_ERROR,
};
use windows_sys::Win32::System::Services::{
    RegisterServiceCtrlHandlerExW, SetServiceStatus, StartServiceCtrlDispatcherW,
    SERVICE_ACCEPT_SHUTDOWN, SERVICE_ACCEPT_STOP, SERVICE_CONTROL_INTERROGATE,
    SERVICE_CONTROL_SHUTDOWN, SERVICE_CONTROL_STOP, SERVICE_RUNNING, SERVICE_START_PENDING,
    SERVICE_STATUS, SERVICE_STATUS_HANDLE, SERVICE_STOPPED, SERVICE_STOP_PENDING,
    SERVICE_TABLE_ENTRYW, SERVICE_WIN32_OWN_PROCESS,
};

use super::{ServiceError, SERVICE_NAME};
use crate::ipc::{ControlServer, Endpoint};
use crate::session::{LaunchRequest, SessionLauncher, Win32Session};
use crate::state::{ControlRequest, ServiceState, StatusReporter, Supervisor};
use crate::sys::to_wide;

/// Hint given to the service manager for pending states, in milliseconds
const PENDING_WAIT_HINT: u32 = 3000;

/// Paths the agent is launched with
#[derive(Debug, Clone, Default)]
pub struct ServiceArgs {
    pub config_path: String,
    pub log_path: String,
}

static SERVICE_ARGS: OnceLock<ServiceArgs> = OnceLock::new();

/// Where [`control_handler`] forwards requests. Set for the duration of one
/// service run; the handler may still be called after that.
static CONTROL_REQUESTS: Mutex<Option<mpsc::Sender<ControlRequest>>> = Mutex::new(None);

/// Hand the main thread to the service control dispatcher.
///
/// Returns `Ok(false)` if the process was not started by the service manager,
/// in which case the caller should run in console mode. Otherwise returns
/// once the service has stopped.
pub fn run_dispatcher(args: ServiceArgs) -> Result<bool, ServiceError> {
    if SERVICE_ARGS.set(args).is_err() {
        warn!("service arguments already set, keeping the first ones");
    }

    let mut name = to_wide(SERVICE_NAME);
    let table = [
        SERVICE_TABLE_ENTRYW {
            lpServiceName: name.as_mut_ptr(),
            lpServiceProc: Some(service_main),
        },
        SERVICE_TABLE_ENTRYW {
            lpServiceName: ptr::null_mut(),
            lpServiceProc: None,
        },
    ];

    if unsafe { StartServiceCtrlDispatcherW(table.as_ptr()) } == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_FAILED_SERVICE_CONTROLLER_CONNECT as i32) {
            return Ok(false);
        }
        return Err(ServiceError::Dispatcher(err));
    }
    info!("service stopped normally");
    Ok(true)
}

unsafe extern "system" fn service_main(_argc: u32, _argv: *mut PWSTR) {
    if let Err(e) = run_service() {
        error!(%e, "service run failed");
    }
}

unsafe extern "system" fn control_handler(
    control: u32,
    _event_type: u32,
    _event_data: *mut c_void,
    _context: *mut c_void,
) -> u32 {
    forward_control(control)
}

/// Map a service control code to a supervisor request
fn control_request(control: u32) -> Option<ControlRequest> {
    match control {
        SERVICE_CONTROL_INTERROGATE => Some(ControlRequest::Interrogate),
        SERVICE_CONTROL_STOP => Some(ControlRequest::Stop),
        SERVICE_CONTROL_SHUTDOWN => Some(ControlRequest::Shutdown),
        _ => None,
    }
}

/// Hand `control` to the running supervisor without blocking
fn forward_control(control: u32) -> u32 {
    let Some(request) = control_request(control) else {
        return ERROR_CALL_NOT_IMPLEMENTED;
    };
    match CONTROL_REQUESTS.lock().as_ref() {
        Some(requests) => {
            if let Err(e) = requests.try_send(request) {
                warn!(?request, %e, "dropped service control request");
            }
        }
        None => warn!(?request, "no supervisor running, dropped service control request"),
    }
    NO_ERROR
}

fn run_service() -> Result<(), ServiceError> {
    let args = SERVICE_ARGS.get().cloned().unwrap_or_default();
    info!(config = %args.config_path, log = %args.log_path, "service starting");

    let (tx, rx) = mpsc::channel(8);
    *CONTROL_REQUESTS.lock() = Some(tx);
    let name = to_wide(SERVICE_NAME);
    let handle =
        unsafe { RegisterServiceCtrlHandlerExW(name.as_ptr(), Some(control_handler), ptr::null()) };
    if handle.is_null() {
        CONTROL_REQUESTS.lock().take();
        return Err(ServiceError::Register(io::Error::last_os_error()));
    }
    let mut reporter = ScmReporter::new(handle);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            CONTROL_REQUESTS.lock().take();
            reporter.report(ServiceState::Stopped, 1);
            return Err(ServiceError::Runtime(e));
        }
    };

    let exit_code = runtime.block_on(async move {
        let channel = match ControlServer::bind(Endpoint::generate()) {
            Ok(server) => {
                let path = server.endpoint().path().to_string_lossy().into_owned();
                tokio::spawn(async move {
                    if let Err(e) = server.run().await {
                        warn!(%e, "control channel closed");
                    }
                });
                Some(path)
            }
            Err(e) => {
                warn!(%e, "control channel unavailable, agent will run without it");
                None
            }
        };

        let request = LaunchRequest {
            config_path: args.config_path,
            log_path: args.log_path,
            channel,
        };
        let launcher = SessionLauncher::new(Win32Session, request);
        let mut supervisor = Supervisor::new(launcher, reporter);
        supervisor.run(rx).await
    });
    runtime.shutdown_background();

    CONTROL_REQUESTS.lock().take();
    info!(exit_code, "service run finished");
    Ok(())
}

/// [`StatusReporter`] publishing to the service control manager
struct ScmReporter {
    handle: SERVICE_STATUS_HANDLE,
    checkpoint: u32,
}

impl ScmReporter {
    fn new(handle: SERVICE_STATUS_HANDLE) -> Self {
        Self {
            handle,
            checkpoint: 0,
        }
    }
}

impl StatusReporter for ScmReporter {
    fn report(&mut self, state: ServiceState, exit_code: u32) {
        let status = service_status(state, exit_code, self.checkpoint);
        self.checkpoint = status.dwCheckPoint;
        if unsafe { SetServiceStatus(self.handle, &status) } == 0 {
            error!(e = %io::Error::last_os_error(), %state, "SetServiceStatus failed");
        }
    }
}

/// Build the status record for `state`. Pending states advance the
/// checkpoint; settled ones reset it.
fn service_status(state: ServiceState, exit_code: u32, checkpoint: u32) -> SERVICE_STATUS {
    let (current, accepted, pending) = match state {
        ServiceState::StartPending => (SERVICE_START_PENDING, 0, true),
        ServiceState::Running => (
            SERVICE_RUNNING,
            SERVICE_ACCEPT_STOP | SERVICE_ACCEPT_SHUTDOWN,
            false,
        ),
        ServiceState::StopPending => (SERVICE_STOP_PENDING, 0, true),
        ServiceState::Stopped => (SERVICE_STOPPED, 0, false),
    };
    let (win32_exit, specific_exit) = if exit_code == 0 {
        (NO_ERROR, 0)
    } else {
        (ERROR_SERVICE_SPECIFIC_ERROR, exit_code)
    };
    SERVICE_STATUS {
        dwServiceType: SERVICE_WIN32_OWN_PROCESS,
        dwCurrentState: current,
        dwControlsAccepted: accepted,
        dwWin32ExitCode: win32_exit,
        dwServiceSpecificExitCode: specific_exit,
        dwCheckPoint: if pending { checkpoint + 1 } else { 0 },
        dwWaitHint: if pending { PENDING_WAIT_HINT } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_accepts_stop_and_shutdown() {
        let status = service_status(ServiceState::Running, 0, 3);
        assert_eq!(status.dwCurrentState, SERVICE_RUNNING);
        assert_eq!(
            status.dwControlsAccepted,
            SERVICE_ACCEPT_STOP | SERVICE_ACCEPT_SHUTDOWN
        );
        assert_eq!(status.dwCheckPoint, 0);
    }

    #[test]
    fn test_pending_states_advance_checkpoint() {
        let first = service_status(ServiceState::StartPending, 0, 0);
        let second = service_status(ServiceState::StopPending, 0, first.dwCheckPoint);
        assert_eq!((first.dwCheckPoint, second.dwCheckPoint), (1, 2));
        assert_eq!(second.dwControlsAccepted, 0);
        assert_eq!(second.dwWaitHint, PENDING_WAIT_HINT);
    }

    #[test]
    fn test_failed_stop_reports_specific_error() {
        let status = service_status(ServiceState::Stopped, 1, 0);
        assert_eq!(status.dwCurrentState, SERVICE_STOPPED);
        assert_eq!(status.dwWin32ExitCode, ERROR_SERVICE_SPECIFIC_ERROR);
        assert_eq!(status.dwServiceSpecificExitCode, 1);
    }

    #[test]
    fn test_control_codes_map_to_requests() {
        assert_eq!(
            control_request(SERVICE_CONTROL_STOP),
            Some(ControlRequest::Stop)
        );
        assert_eq!(
            control_request(SERVICE_CONTROL_SHUTDOWN),
            Some(ControlRequest::Shutdown)
        );
        assert_eq!(
            control_request(SERVICE_CONTROL_INTERROGATE),
            Some(ControlRequest::Interrogate)
        );
        assert_eq!(control_request(0xFF), None);
        assert_eq!(forward_control(0xFF), ERROR_CALL_NOT_IMPLEMENTED);
    }

    #[test]
    fn test_control_after_run_is_dropped_safely() {
        let (tx, mut rx) = mpsc::channel(1);
        *CONTROL_REQUESTS.lock() = Some(tx);
        assert_eq!(forward_control(SERVICE_CONTROL_STOP), NO_ERROR);
        assert_eq!(rx.try_recv().ok(), Some(ControlRequest::Stop));

        CONTROL_REQUESTS.lock().take();
        drop(rx);
        assert_eq!(forward_control(SERVICE_CONTROL_SHUTDOWN), NO_ERROR);
    }
}
