//! Signal handling for graceful shutdown

use std::io;
use std::thread;

use tracing::debug;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};
#[cfg(windows)]
use tokio::signal::windows::{ctrl_break, ctrl_c, CtrlBreak, CtrlC};

/// Handles shutdown signals (SIGTERM, SIGINT on Unix; Ctrl+C, Ctrl+Break on
/// Windows)
pub struct ShutdownSignal {
    #[cfg(unix)]
    sigterm: Signal,
    #[cfg(unix)]
    sigint: Signal,
    #[cfg(windows)]
    ctrl_c: CtrlC,
    #[cfg(windows)]
    ctrl_break: CtrlBreak,
}

impl ShutdownSignal {
    /// Install the handlers. Must be called from within a tokio runtime; once
    /// this returns, the signals no longer terminate the process.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Install the handlers. Must be called from within a tokio runtime; once
    /// this returns, the signals no longer terminate the process.
    #[cfg(windows)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: ctrl_c()?,
            ctrl_break: ctrl_break()?,
        })
    }

    /// Wait for a shutdown signal
    #[cfg(unix)]
    pub async fn wait(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = self.sigint.recv() => {
                debug!("received SIGINT");
            }
        }
    }

    /// Wait for a shutdown signal
    #[cfg(windows)]
    pub async fn wait(&mut self) {
        tokio::select! {
            _ = self.ctrl_c.recv() => {
                debug!("received Ctrl+C");
            }
            _ = self.ctrl_break.recv() => {
                debug!("received Ctrl+Break");
            }
        }
    }
}

/// Call `on_signal` from a background thread when a shutdown signal arrives.
///
/// Handlers are installed before this returns. The thread runs its own
/// single-threaded runtime so the caller's thread stays free for its message
/// loop.
pub fn on_shutdown<F>(on_signal: F) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut shutdown = {
        let _guard = runtime.enter();
        ShutdownSignal::install()?
    };

    thread::Builder::new()
        .name("shutdown".into())
        .spawn(move || {
            runtime.block_on(shutdown.wait());
            on_signal();
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_sigterm_triggers_callback() {
        let (tx, rx) = mpsc::channel();
        let handle = on_shutdown(move || {
            let _ = tx.send(());
        })
        .unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        rx.recv_timeout(Duration::from_secs(5))
            .expect("callback not invoked");
        handle.join().unwrap();
    }
}
