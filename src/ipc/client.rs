//! Control channel client
//!
//! Runs in the agent. The connection is optional: without it the agent works
//! exactly the same, it just reports nothing. Writes never fail loudly.

use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::protocol::{encode_line, PIPE_ENV_VAR};
use super::ChannelError;

type Writer = Box<dyn Write + Send>;

/// Lines queued for the writer thread before new ones are dropped
pub const QUEUE_CAPACITY: usize = 256;

/// How long `close` waits for queued lines to be written
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Handle to the writer thread owning the actual connection
struct Connection {
    lines: mpsc::Sender<Vec<u8>>,
    done: std_mpsc::Receiver<()>,
}

/// Best-effort, write-only status reporter.
///
/// Starts `Disconnected` (`None`) and becomes connected at most once. Lines
/// go through a bounded queue to a writer thread, so `send` never waits on
/// the peer. A failed write drops the connection for good.
pub struct ControlClient {
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ControlClient {
    /// A client that drops every message
    pub fn disconnected() -> Self {
        Self {
            conn: Mutex::new(None),
        }
    }

    /// Connect to the endpoint named by `HOTKEYS_IPC_PIPE`, if any
    pub fn from_env() -> Self {
        match std::env::var_os(PIPE_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::connect_or_disconnected(Path::new(&path)),
            _ => {
                debug!("no control channel configured");
                Self::disconnected()
            }
        }
    }

    /// Connect to `path`, logging and falling back to a disconnected client
    /// on failure
    pub fn connect_or_disconnected(path: &Path) -> Self {
        match Self::connect(path) {
            Ok(client) => {
                info!(?path, "control channel connected");
                client
            }
            Err(e) => {
                warn!(?e, "control channel unavailable");
                Self::disconnected()
            }
        }
    }

    /// Open a write-only connection to `path` and start its writer thread
    pub fn connect(path: &Path) -> Result<Self, ChannelError> {
        let connect_err = |source| ChannelError::Connect {
            path: path.to_owned(),
            source,
        };
        let writer = open_writer(path).map_err(connect_err)?;

        let (lines, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (done_tx, done) = std_mpsc::channel();
        thread::Builder::new()
            .name("control-channel".into())
            .spawn(move || {
                write_lines(writer, rx);
                let _ = done_tx.send(());
            })
            .map_err(connect_err)?;

        Ok(Self {
            conn: Mutex::new(Some(Connection { lines, done })),
        })
    }

    /// Whether a peer is currently attached
    pub fn is_connected(&self) -> bool {
        let mut conn = self.conn.lock();
        if conn.as_ref().is_some_and(|c| c.lines.is_closed()) {
            *conn = None;
        }
        conn.is_some()
    }

    /// Queue one message as one line. Never blocks on the peer and never
    /// returns an error; a full queue drops the message.
    pub fn send(&self, message: impl Display) {
        let mut conn = self.conn.lock();
        let Some(c) = conn.as_ref() else {
            return;
        };
        match c.lines.try_send(encode_line(&message.to_string())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("control channel busy, dropping message"),
            Err(TrySendError::Closed(_)) => {
                debug!("control channel writer gone");
                *conn = None;
            }
        }
    }

    /// Close the connection, if any, giving queued lines a short time to go
    /// out
    pub fn close(&self) {
        let Some(Connection { lines, done }) = self.conn.lock().take() else {
            return;
        };
        drop(lines);
        if done.recv_timeout(CLOSE_TIMEOUT).is_err() {
            debug!("control channel writer still busy at close");
        }
    }
}

/// Writer thread body: drain the queue until it closes or a write fails
fn write_lines(mut writer: Writer, mut lines: mpsc::Receiver<Vec<u8>>) {
    while let Some(line) = lines.blocking_recv() {
        if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
            warn!(error = %ChannelError::Write(e), "dropping control channel");
            return;
        }
    }
}

#[cfg(windows)]
fn open_writer(path: &Path) -> std::io::Result<Writer> {
    // named pipes open like files
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    Ok(Box::new(file))
}

#[cfg(unix)]
fn open_writer(path: &Path) -> std::io::Result<Writer> {
    let stream = std::os::unix::net::UnixStream::connect(path)?;
    stream.shutdown(std::net::Shutdown::Read)?;
    Ok(Box::new(stream))
}
