//! Control channel server
//!
//! Runs in the privileged process. Creates one inbound-only endpoint, accepts
//! a single agent connection and logs every line the agent writes until the
//! agent goes away.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

#[cfg(windows)]
use std::ffi::c_void;
#[cfg(windows)]
use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};
#[cfg(windows)]
use windows_sys::Win32::{
    Foundation::{LocalFree, HLOCAL},
    Security::{
        Authorization::{ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1},
        PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES,
    },
};
#[cfg(not(windows))]
use tokio::net::UnixListener;

#[cfg(windows)]
use super::protocol::PIPE_SECURITY;
use super::protocol::{Endpoint, BUFFER_SIZE};
use super::ChannelError;

/// `ERROR_PIPE_CONNECTED`: the client connected before we started waiting
#[cfg(windows)]
const ERROR_PIPE_CONNECTED: i32 = windows_sys::Win32::Foundation::ERROR_PIPE_CONNECTED as i32;

/// Self-describing security descriptor parsed from SDDL, released on drop
#[cfg(windows)]
struct SecurityDescriptor(PSECURITY_DESCRIPTOR);

#[cfg(windows)]
impl SecurityDescriptor {
    fn from_sddl(sddl: &str) -> std::io::Result<Self> {
        let wide = crate::sys::to_wide(sddl);
        let mut descriptor: PSECURITY_DESCRIPTOR = std::ptr::null_mut();
        // SAFETY: `wide` is NUL-terminated; the out pointer is valid
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                wide.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self(descriptor))
    }

    fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

#[cfg(windows)]
impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        // SAFETY: allocated by ConvertStringSecurityDescriptorToSecurityDescriptorW
        unsafe {
            LocalFree(self.0 as HLOCAL);
        }
    }
}

/// Single-connection, read-only endpoint
pub struct ControlServer {
    endpoint: Endpoint,
    #[cfg(windows)]
    pipe: NamedPipeServer,
    #[cfg(not(windows))]
    listener: UnixListener,
}

impl ControlServer {
    /// Create the endpoint. Must be called from within a tokio runtime.
    ///
    /// The pipe carries an explicit DACL so the agent, running as the
    /// interactive user, can open it for writing.
    #[cfg(windows)]
    pub fn bind(endpoint: Endpoint) -> Result<Self, ChannelError> {
        let mut options = ServerOptions::new();
        options
            .first_pipe_instance(true)
            .access_inbound(true)
            .access_outbound(false)
            .pipe_mode(PipeMode::Message)
            .max_instances(1)
            .in_buffer_size(BUFFER_SIZE as u32)
            .out_buffer_size(BUFFER_SIZE as u32)
            .reject_remote_clients(true);

        let descriptor = SecurityDescriptor::from_sddl(PIPE_SECURITY).map_err(ChannelError::Bind)?;
        let mut attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: descriptor.as_ptr(),
            bInheritHandle: 0,
        };
        // SAFETY: `attributes` and the descriptor it points to outlive the call
        let pipe = unsafe {
            options.create_with_security_attributes_raw(
                endpoint.path(),
                &mut attributes as *mut SECURITY_ATTRIBUTES as *mut c_void,
            )
        }
        .map_err(ChannelError::Bind)?;

        info!(path = ?endpoint.path(), "control channel listening");
        Ok(Self { endpoint, pipe })
    }

    /// Create the endpoint. Must be called from within a tokio runtime.
    #[cfg(not(windows))]
    pub fn bind(endpoint: Endpoint) -> Result<Self, ChannelError> {
        let path = endpoint.path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(ChannelError::Bind)?;
        }
        let listener = UnixListener::bind(&path).map_err(ChannelError::Bind)?;

        // owner-only, like any other private socket
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .map_err(ChannelError::Bind)?;
        }

        info!(?path, "control channel listening");
        Ok(Self { endpoint, listener })
    }

    /// The endpoint agents should connect to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Accept the agent and log what it sends until it disconnects
    pub async fn run(self) -> Result<(), ChannelError> {
        self.serve(|line| info!(target: "agent", "{}", line)).await
    }

    /// Accept the agent and hand each received line to `on_line`
    #[cfg(windows)]
    pub async fn serve<F: FnMut(&str)>(mut self, on_line: F) -> Result<(), ChannelError> {
        match self.pipe.connect().await {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_CONNECTED) => {}
            Err(e) => return Err(ChannelError::Accept(e)),
        }
        debug!("agent connected to control channel");
        read_lines(&mut self.pipe, on_line).await;
        Ok(())
    }

    /// Accept the agent and hand each received line to `on_line`
    #[cfg(not(windows))]
    pub async fn serve<F: FnMut(&str)>(self, on_line: F) -> Result<(), ChannelError> {
        let (mut stream, _addr) = self.listener.accept().await.map_err(ChannelError::Accept)?;
        debug!("agent connected to control channel");
        read_lines(&mut stream, on_line).await;
        Ok(())
    }
}

#[cfg(not(windows))]
impl Drop for ControlServer {
    fn drop(&mut self) {
        let path = self.endpoint.path();
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(?e, "failed to remove socket file");
            }
        }
    }
}

/// Read until EOF or error, splitting the byte stream into lines
async fn read_lines<R, F>(reader: &mut R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(?e, "control channel read ended");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            emit(&line[..line.len() - 1], &mut on_line);
        }
    }

    if !pending.is_empty() {
        emit(&pending, &mut on_line);
    }
    debug!("control channel closed");
}

fn emit<F: FnMut(&str)>(raw: &[u8], on_line: &mut F) {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches('\r');
    if !text.is_empty() {
        on_line(text);
    }
}
