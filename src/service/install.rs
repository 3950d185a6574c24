//! Service registration with the service control manager

use std::ffi::c_void;
use std::io;
use std::ptr;

use tracing::info;
use windows_sys::Win32::System::Services::{
    ChangeServiceConfig2W, CloseServiceHandle, CreateServiceW, DeleteService, OpenSCManagerW,
    OpenServiceW, SC_HANDLE, SC_MANAGER_ALL_ACCESS, SERVICE_ALL_ACCESS, SERVICE_AUTO_START,
    SERVICE_CONFIG_DESCRIPTION, SERVICE_DESCRIPTIONW, SERVICE_ERROR_NORMAL,
    SERVICE_WIN32_OWN_PROCESS,
};

use super::{ServiceError, SERVICE_DESCRIPTION, SERVICE_DISPLAY_NAME, SERVICE_NAME};
use crate::session::agent_command_line;
use crate::sys::{check, to_wide};

/// Owned service manager or service handle
struct ScHandle(SC_HANDLE);

impl ScHandle {
    fn manager() -> Result<Self, ServiceError> {
        let h = unsafe { OpenSCManagerW(ptr::null(), ptr::null(), SC_MANAGER_ALL_ACCESS) };
        Self::wrap(h).map_err(ServiceError::Connect)
    }

    fn open_service(&self, name: &str) -> io::Result<Self> {
        let name = to_wide(name);
        Self::wrap(unsafe { OpenServiceW(self.0, name.as_ptr(), SERVICE_ALL_ACCESS) })
    }

    fn wrap(h: SC_HANDLE) -> io::Result<Self> {
        if h.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self(h))
        }
    }
}

impl Drop for ScHandle {
    fn drop(&mut self) {
        unsafe { CloseServiceHandle(self.0) };
    }
}

/// Register the running executable as an auto-start service that will be
/// started with `--config <config_path> [--log <log_path>]`
pub fn install(config_path: &str, log_path: &str) -> Result<(), ServiceError> {
    let exe = std::env::current_exe()
        .and_then(std::path::absolute)
        .map_err(ServiceError::Executable)?;
    let manager = ScHandle::manager()?;

    if manager.open_service(SERVICE_NAME).is_ok() {
        return Err(ServiceError::AlreadyExists);
    }

    let binary_path = agent_command_line(&exe, config_path, log_path);
    let name = to_wide(SERVICE_NAME);
    let display = to_wide(SERVICE_DISPLAY_NAME);
    let binary = to_wide(&binary_path);
    let service = ScHandle::wrap(unsafe {
        CreateServiceW(
            manager.0,
            name.as_ptr(),
            display.as_ptr(),
            SERVICE_ALL_ACCESS,
            SERVICE_WIN32_OWN_PROCESS,
            SERVICE_AUTO_START,
            SERVICE_ERROR_NORMAL,
            binary.as_ptr(),
            ptr::null(),
            ptr::null_mut(),
            ptr::null(),
            ptr::null(),
            ptr::null(),
        )
    })
    .map_err(ServiceError::Create)?;

    let mut description = to_wide(SERVICE_DESCRIPTION);
    let info = SERVICE_DESCRIPTIONW {
        lpDescription: description.as_mut_ptr(),
    };
    check(unsafe {
        ChangeServiceConfig2W(
            service.0,
            SERVICE_CONFIG_DESCRIPTION,
            &info as *const SERVICE_DESCRIPTIONW as *const c_void,
        )
    })
    .map_err(ServiceError::Describe)?;

    info!(%binary_path, "service installed");
    Ok(())
}

/// Delete the service registration
pub fn remove() -> Result<(), ServiceError> {
    let manager = ScHandle::manager()?;
    let service = manager
        .open_service(SERVICE_NAME)
        .map_err(ServiceError::NotInstalled)?;
    check(unsafe { DeleteService(service.0) }).map_err(ServiceError::Delete)?;
    info!("service removed");
    Ok(())
}
