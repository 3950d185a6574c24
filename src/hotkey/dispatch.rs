//! The dispatch loop
//!
//! A [`Dispatcher`] owns the active [`Registry`] and is the only thing that
//! ever reads or replaces it. Everything else talks to it by sending a
//! [`Signal`] into the thread that runs it.
//!
//! Thread affinity is a hard constraint, not a convenience: on Windows a
//! hotkey is registered against a window, its `WM_HOTKEY` messages are posted
//! to the queue of the thread that created that window, and registration and
//! unregistration must happen on that same thread. The dispatcher therefore
//! lives and dies on the thread that created the message window.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::registry::{Hotkey, Registry};
use crate::action::{ActionError, ActionRunner};
use crate::config::ConfigError;
use crate::events::AgentEvent;
use crate::ipc::ControlClient;

/// Requests delivered to the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The OS reported the hotkey with this identifier
    Hotkey(u32),
    /// The config file changed
    Reload,
    /// Leave the loop
    Quit,
}

/// OS-level hotkey registration
pub trait HotkeyBackend {
    /// Claim `hotkey` at the OS input layer
    fn register(&mut self, hotkey: &Hotkey) -> std::io::Result<()>;

    /// Release the claim on `id`
    fn unregister(&mut self, id: u32);
}

/// Failures while handling a hotkey. Logged; the loop carries on.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown hotkey id {0}")]
    UnknownHotkey(u32),

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Owns the registry and reacts to signals
pub struct Dispatcher<B, R> {
    backend: B,
    runner: R,
    config_path: PathBuf,
    registry: Registry,
    telemetry: Arc<ControlClient>,
}

impl<B: HotkeyBackend, R: ActionRunner> Dispatcher<B, R> {
    /// Create a dispatcher with an empty registry
    pub fn new(backend: B, runner: R, config_path: PathBuf, telemetry: Arc<ControlClient>) -> Self {
        Self {
            backend,
            runner,
            config_path,
            registry: Registry::empty(),
            telemetry,
        }
    }

    /// The currently active hotkeys
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Replace the active hotkeys with a fresh load of the config file.
    ///
    /// All current hotkeys are released before the file is read. If the load
    /// fails the dispatcher stays inert, with no hotkeys at all, until the next
    /// successful reload; the previous bindings are deliberately not restored.
    pub fn reload(&mut self) -> Result<usize, ConfigError> {
        self.unregister_all();

        let registry = match Registry::load(&self.config_path) {
            Ok(registry) => registry,
            Err(e) => {
                self.telemetry.send(AgentEvent::ReloadFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.registry = registry;
        self.register_all();

        let count = self.registry.len();
        info!(count, path = ?self.config_path, "loaded and registered bindings");
        self.telemetry.send(AgentEvent::HotkeysLoaded { count });
        Ok(count)
    }

    /// Run the action bound to `id`
    pub fn dispatch(&mut self, id: u32) -> Result<u32, DispatchError> {
        let hotkey = self
            .registry
            .get(id)
            .ok_or(DispatchError::UnknownHotkey(id))?;
        info!(id, key = %hotkey.key_string, action = ?hotkey.action, "executing");

        match self.runner.run(&hotkey.action) {
            Ok(pid) => {
                self.telemetry.send(AgentEvent::ActionStarted { id, pid });
                Ok(pid)
            }
            Err(e) => {
                self.telemetry.send(AgentEvent::ActionFailed {
                    id,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// React to one signal. `Break` means the loop should end.
    pub fn handle(&mut self, signal: Signal) -> ControlFlow<()> {
        match signal {
            Signal::Hotkey(id) => {
                if let Err(e) = self.dispatch(id) {
                    match e {
                        DispatchError::UnknownHotkey(_) => warn!(id, "ignoring unknown hotkey"),
                        DispatchError::Action(e) => error!(id, %e, "action failed"),
                    }
                }
            }
            Signal::Reload => {
                if let Err(e) = self.reload() {
                    error!(path = ?self.config_path, %e, "failed to load config, no hotkeys active");
                }
            }
            Signal::Quit => {
                debug!("quit requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Consume signals until `Quit` or until the source runs dry, then
    /// release every hotkey
    pub fn run<I: IntoIterator<Item = Signal>>(&mut self, signals: I) {
        for signal in signals {
            if self.handle(signal).is_break() {
                break;
            }
        }
        self.telemetry.send(AgentEvent::Stopping);
        self.shutdown();
    }

    /// Release every registered hotkey
    pub fn shutdown(&mut self) {
        self.unregister_all();
    }

    /// The registration backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn register_all(&mut self) {
        for hk in self.registry.iter() {
            match self.backend.register(hk) {
                Ok(()) => debug!(id = hk.id, key = %hk.key_string, action = ?hk.action, "registered"),
                Err(e) => error!(id = hk.id, key = %hk.key_string, %e, "failed to register hotkey"),
            }
        }
    }

    fn unregister_all(&mut self) {
        let old = std::mem::take(&mut self.registry);
        if old.is_empty() {
            return;
        }
        for hk in old.iter() {
            self.backend.unregister(hk.id);
        }
        debug!(count = old.len(), "unregistered all hotkeys");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Register(u32, u16),
        Unregister(u32),
    }

    /// Records calls and tracks what the "OS" currently has claimed
    #[derive(Default)]
    struct FakeBackend {
        calls: Vec<Call>,
        active: BTreeSet<u32>,
        reject: Option<u16>,
    }

    impl HotkeyBackend for FakeBackend {
        fn register(&mut self, hotkey: &Hotkey) -> std::io::Result<()> {
            self.calls.push(Call::Register(hotkey.id, hotkey.key_code));
            if self.reject == Some(hotkey.key_code) {
                return Err(std::io::Error::new(std::io::ErrorKind::AlreadyExists, "taken"));
            }
            assert!(self.active.insert(hotkey.id), "id {} claimed twice", hotkey.id);
            Ok(())
        }

        fn unregister(&mut self, id: u32) {
            self.calls.push(Call::Unregister(id));
            self.active.remove(&id);
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        ran: Vec<Vec<String>>,
        fail: bool,
    }

    impl ActionRunner for FakeRunner {
        fn run(&mut self, command: &[String]) -> Result<u32, ActionError> {
            if self.fail {
                return Err(ActionError::Empty);
            }
            self.ran.push(command.to_vec());
            Ok(4242)
        }
    }

    fn write_config(path: &Path, body: &str) {
        std::fs::write(path, format!("[keybindings]\n{body}")).unwrap();
    }

    fn binding(mods: &str, key: &str, action: &str) -> String {
        format!(
            "[[keybindings.bindings]]\nmodifiers = \"{mods}\"\nkey = \"{key}\"\naction = [\"{action}\"]\n"
        )
    }

    fn dispatcher(path: &Path) -> Dispatcher<FakeBackend, FakeRunner> {
        Dispatcher::new(
            FakeBackend::default(),
            FakeRunner::default(),
            path.to_owned(),
            Arc::new(ControlClient::disconnected()),
        )
    }

    #[test]
    fn test_initial_load_registers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &(binding("ctrl", "a", "one") + &binding("alt", "b", "two")));

        let mut d = dispatcher(&path);
        assert_eq!(d.reload().unwrap(), 2);
        assert_eq!(
            d.backend().calls,
            vec![Call::Register(1, b'A' as u16), Call::Register(2, b'B' as u16)]
        );
        assert_eq!(d.backend().active, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_reload_unregisters_before_registering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &(binding("ctrl", "a", "one") + &binding("alt", "b", "two")));

        let mut d = dispatcher(&path);
        d.reload().unwrap();
        let before = d.backend().calls.len();

        write_config(&path, &binding("shift", "f1", "three"));
        d.reload().unwrap();

        let calls = &d.backend().calls[before..];
        assert_eq!(
            calls,
            &[Call::Unregister(1), Call::Unregister(2), Call::Register(1, 0x70)]
        );
        // nothing from the previous epoch is still claimed
        assert_eq!(d.backend().active, BTreeSet::from([1]));
        assert_eq!(d.registry().get(1).unwrap().action, vec!["three"]);
    }

    #[test]
    fn test_failed_reload_leaves_no_hotkeys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &binding("ctrl", "a", "one"));

        let mut d = dispatcher(&path);
        d.reload().unwrap();

        std::fs::write(&path, "[keybindings\nbroken").unwrap();
        assert!(d.reload().is_err());

        assert!(d.registry().is_empty());
        assert!(d.backend().active.is_empty());
        assert_eq!(d.backend().calls.last(), Some(&Call::Unregister(1)));

        // the old binding is gone, not silently kept
        assert!(d.handle(Signal::Hotkey(1)).is_continue());
        assert!(d.runner.ran.is_empty());

        // and the next good load brings hotkeys back
        write_config(&path, &binding("ctrl", "b", "two"));
        assert!(d.handle(Signal::Reload).is_continue());
        assert_eq!(d.registry().len(), 1);
    }

    #[test]
    fn test_missing_file_leaves_no_hotkeys() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dispatcher(&dir.path().join("missing.toml"));
        assert!(d.reload().is_err());
        assert!(d.registry().is_empty());
        assert!(d.backend().calls.is_empty());
    }

    #[test]
    fn test_hotkey_runs_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &(binding("ctrl", "a", "one") + &binding("alt", "b", "two")));

        let mut d = dispatcher(&path);
        d.reload().unwrap();
        assert_eq!(d.dispatch(2).unwrap(), 4242);
        assert_eq!(d.runner.ran, vec![vec!["two".to_string()]]);
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &binding("ctrl", "a", "one"));

        let mut d = dispatcher(&path);
        d.reload().unwrap();
        assert!(matches!(d.dispatch(9), Err(DispatchError::UnknownHotkey(9))));
        assert!(d.handle(Signal::Hotkey(9)).is_continue());
        assert!(d.runner.ran.is_empty());
    }

    #[test]
    fn test_failed_action_keeps_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &binding("ctrl", "a", "one"));

        let mut d = dispatcher(&path);
        d.runner.fail = true;
        d.reload().unwrap();
        assert!(matches!(d.dispatch(1), Err(DispatchError::Action(_))));
        assert!(d.handle(Signal::Hotkey(1)).is_continue());
    }

    #[test]
    fn test_registration_failure_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &(binding("ctrl", "a", "one") + &binding("alt", "b", "two")));

        let mut d = dispatcher(&path);
        d.backend.reject = Some(b'A' as u16);
        assert_eq!(d.reload().unwrap(), 2);
        assert_eq!(d.backend().active, BTreeSet::from([2]));
    }

    #[test]
    fn test_run_stops_on_quit_and_unregisters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &binding("ctrl", "a", "one"));

        let mut d = dispatcher(&path);
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(Signal::Reload).unwrap();
        tx.send(Signal::Hotkey(1)).unwrap();
        tx.send(Signal::Quit).unwrap();
        tx.send(Signal::Hotkey(1)).unwrap();

        d.run(rx.try_iter());

        assert_eq!(d.runner.ran.len(), 1, "signals after quit are not handled");
        assert!(d.registry().is_empty());
        assert!(d.backend().active.is_empty());
    }

    #[test]
    fn test_reload_signal_from_another_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        write_config(&path, &binding("ctrl", "a", "one"));

        let mut d = dispatcher(&path);
        let (tx, rx) = std::sync::mpsc::channel();
        let sender = std::thread::spawn(move || {
            tx.send(Signal::Reload).unwrap();
            tx.send(Signal::Quit).unwrap();
        });
        d.run(rx.iter());
        sender.join().unwrap();

        // reload ran on this thread; quit released the hotkeys again
        assert_eq!(
            d.backend().calls,
            vec![Call::Register(1, b'A' as u16), Call::Unregister(1)]
        );
    }
}
