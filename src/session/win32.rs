//! Win32 implementation of the session launch primitives

use std::ffi::c_void;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::PathBuf;
use std::{mem, ptr};

use tracing::debug;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Security::{DuplicateTokenEx, SecurityIdentification, TokenPrimary};
use windows_sys::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows_sys::Win32::System::RemoteDesktop::{WTSGetActiveConsoleSessionId, WTSQueryUserToken};
use windows_sys::Win32::System::Threading::{
    CreateProcessAsUserW, TerminateProcess, CREATE_NO_WINDOW, CREATE_UNICODE_ENVIRONMENT,
    PROCESS_INFORMATION, STARTUPINFOW,
};

use super::env_block::decode_environment_block;
use super::launcher::{SessionApi, SpawnRequest};
use super::LaunchError;
use crate::environment::EnvTable;
use crate::state::AgentHandle;
use crate::sys::{check, to_wide};

/// `MAXIMUM_ALLOWED` access right
const MAXIMUM_ALLOWED: u32 = 0x0200_0000;

/// Returned by `WTSGetActiveConsoleSessionId` when nobody is attached
const NO_SESSION: u32 = 0xFFFF_FFFF;

/// Talks to the terminal services and process APIs directly
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Session;

/// A running agent process
#[derive(Debug)]
pub struct AgentProcess {
    pid: u32,
    process: OwnedHandle,
    _thread: OwnedHandle,
}

impl AgentHandle for AgentProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&self) -> io::Result<()> {
        check(unsafe { TerminateProcess(self.process.as_raw_handle() as HANDLE, 0) })
    }
}

unsafe fn owned(handle: HANDLE) -> OwnedHandle {
    OwnedHandle::from_raw_handle(handle as _)
}

impl SessionApi for Win32Session {
    type Token = OwnedHandle;
    type Process = AgentProcess;

    fn active_session(&self) -> Option<u32> {
        match unsafe { WTSGetActiveConsoleSessionId() } {
            NO_SESSION => None,
            id => Some(id),
        }
    }

    fn current_exe(&self) -> io::Result<PathBuf> {
        std::env::current_exe()
    }

    fn primary_token(&self, session: u32) -> Result<OwnedHandle, LaunchError> {
        let mut user_token: HANDLE = ptr::null_mut();
        check(unsafe { WTSQueryUserToken(session, &mut user_token) })
            .map_err(|source| LaunchError::SessionTokenUnavailable { session, source })?;
        // released on every path below
        let user_token = unsafe { owned(user_token) };

        let mut primary: HANDLE = ptr::null_mut();
        check(unsafe {
            DuplicateTokenEx(
                user_token.as_raw_handle() as HANDLE,
                MAXIMUM_ALLOWED,
                ptr::null(),
                SecurityIdentification,
                TokenPrimary,
                &mut primary,
            )
        })
        .map_err(LaunchError::TokenDuplication)?;
        debug!(session, "obtained primary token for session user");
        Ok(unsafe { owned(primary) })
    }

    fn user_environment(&self, token: &OwnedHandle) -> Result<EnvTable, LaunchError> {
        let mut block: *mut c_void = ptr::null_mut();
        check(unsafe { CreateEnvironmentBlock(&mut block, token.as_raw_handle() as HANDLE, 0) })
            .map_err(LaunchError::EnvironmentUnavailable)?;

        let table = unsafe {
            let base = block as *const u16;
            let mut len = 0;
            // the block ends with an empty string, i.e. two NULs in a row
            while !(*base.add(len) == 0 && *base.add(len + 1) == 0) {
                len += 1;
            }
            decode_environment_block(std::slice::from_raw_parts(base, len + 2))
        };
        unsafe { DestroyEnvironmentBlock(block) };
        Ok(table)
    }

    fn spawn(&self, token: &OwnedHandle, request: &SpawnRequest) -> Result<AgentProcess, LaunchError> {
        let application = to_wide(&request.application);
        // CreateProcessAsUserW may write into the command line buffer
        let mut command_line = to_wide(&request.command_line);
        let mut desktop = to_wide(request.desktop);

        let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
        startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
        startup.lpDesktop = desktop.as_mut_ptr();
        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        check(unsafe {
            CreateProcessAsUserW(
                token.as_raw_handle() as HANDLE,
                application.as_ptr(),
                command_line.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                CREATE_UNICODE_ENVIRONMENT | CREATE_NO_WINDOW,
                request.environment.as_ptr() as *const c_void,
                ptr::null(),
                &startup,
                &mut info,
            )
        })
        .map_err(LaunchError::ProcessCreation)?;

        Ok(AgentProcess {
            pid: info.dwProcessId,
            process: unsafe { owned(info.hProcess) },
            _thread: unsafe { owned(info.hThread) },
        })
    }
}
