//! Agent mode: the process that actually owns the hotkeys
//!
//! Runs inside the interactive session, either launched by the service or
//! started by hand from a console. Everything hotkey related happens on the
//! calling thread; the shutdown handler and config watcher only post signals
//! into its message queue.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::action::DetachedSpawner;
use crate::events::AgentEvent;
use crate::hotkey::{Dispatcher, MessageWindow, Signal};
use crate::ipc::ControlClient;
use crate::lifecycle;
use crate::reload::ConfigWatcher;

/// Run the agent until a quit signal arrives
pub fn run(config_path: &Path) -> Result<()> {
    info!(?config_path, "agent starting");

    let telemetry = Arc::new(ControlClient::from_env());
    telemetry.send(AgentEvent::Started {
        pid: std::process::id(),
    });

    let window = MessageWindow::create().context("failed to create hidden window")?;
    let mut dispatcher = Dispatcher::new(
        window.hotkeys(),
        DetachedSpawner,
        config_path.to_owned(),
        telemetry.clone(),
    );

    // later reloads may fail without ending the agent, the first one may not
    dispatcher
        .reload()
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    let poster = window.poster();
    lifecycle::on_shutdown(move || {
        info!("exiting");
        poster.post(Signal::Quit);
    })
    .context("failed to install shutdown handler")?;

    let _watcher = match ConfigWatcher::start(config_path, move || {
        poster.post(Signal::Reload);
    }) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(%e, "config watcher disabled");
            None
        }
    };

    dispatcher.run(window.pump());

    info!("agent stopped");
    telemetry.close();
    Ok(())
}
