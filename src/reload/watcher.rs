//! Directory watching for the config file
//!
//! Watches the directory that holds the config file rather than the file
//! itself, because editors commonly save by writing a temp file and renaming
//! it over the original. A symlinked config also gets its target's directory
//! watched.

use std::path::{Path, PathBuf};
use std::time::Instant;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::filter::{clean_path, ReloadFilter};

/// Errors setting up the watcher
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("create watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Running config watcher; stops when dropped
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Start watching `config_path`, calling `notify` on each debounced
    /// change.
    ///
    /// `notify` runs on the watcher's own thread. It should only signal the
    /// dispatch loop, never touch hotkey state itself.
    pub fn start<F>(config_path: &Path, notify: F) -> Result<Self, WatchError>
    where
        F: Fn() + Send + 'static,
    {
        let (link, target) = resolve_watch_paths(config_path);
        let filter = Mutex::new(ReloadFilter::new(&link, target.as_deref()));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if filter.lock().accept(&event.kind, &event.paths, Instant::now()) {
                    info!(paths = ?event.paths, "config reload signalled");
                    notify();
                }
            }
            Err(e) => warn!(?e, "config watcher error"),
        })
        .map_err(WatchError::Create)?;

        let mut watched: Vec<PathBuf> = Vec::new();
        for file in std::iter::once(&link).chain(target.as_ref()) {
            let dir = parent_dir(file);
            if watched.contains(&dir) {
                continue;
            }
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: dir.clone(),
                    source,
                })?;
            debug!(?dir, "watching directory");
            watched.push(dir);
        }

        Ok(Self {
            _watcher: watcher,
            watched,
        })
    }

    /// Directories being watched
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Return the cleaned config path and, if it is a symbolic link, the cleaned
/// path of its target
pub fn resolve_watch_paths(config_path: &Path) -> (PathBuf, Option<PathBuf>) {
    let link = clean_path(&absolute(config_path));

    let is_symlink = std::fs::symlink_metadata(&link)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        return (link, None);
    }

    let target = match std::fs::canonicalize(&link) {
        Ok(target) => Some(clean_path(&target)),
        Err(e) => {
            // dangling link: fall back to its literal target
            debug!(?e, "cannot canonicalize config symlink");
            std::fs::read_link(&link)
                .ok()
                .map(|t| clean_path(&parent_dir(&link).join(t)))
        }
    };
    (link, target)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_owned())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn start_with_channel(path: &Path) -> (ConfigWatcher, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let watcher = ConfigWatcher::start(path, move || {
            let _ = tx.send(());
        })
        .unwrap();
        (watcher, rx)
    }

    #[test]
    fn test_plain_file_has_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        std::fs::write(&path, "").unwrap();

        let (link, target) = resolve_watch_paths(&path);
        assert_eq!(link, clean_path(&path));
        assert!(target.is_none());
    }

    #[test]
    fn test_edit_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        std::fs::write(&path, "[keybindings]\n").unwrap();

        let (_watcher, rx) = start_with_channel(&path);
        std::thread::sleep(Duration::from_millis(50));

        std::fs::write(&path, "[keybindings]\n# changed\n").unwrap();
        rx.recv_timeout(Duration::from_secs(2))
            .expect("expected reload signal");
    }

    #[test]
    fn test_unrelated_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.toml");
        std::fs::write(&path, "").unwrap();

        let (_watcher, rx) = start_with_channel(&path);
        std::thread::sleep(Duration::from_millis(50));

        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("hotkeys.toml");
        assert!(ConfigWatcher::start(&path, || {}).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_target_change_triggers_reload() {
        let root = tempfile::tempdir().unwrap();
        let link_dir = root.path().join("link");
        let target_dir = root.path().join("target");
        std::fs::create_dir_all(&link_dir).unwrap();
        std::fs::create_dir_all(&target_dir).unwrap();

        let target = target_dir.join("hotkeys.toml");
        let link = link_dir.join("hotkeys.toml");
        std::fs::write(&target, "[keybindings]\n").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let (resolved_link, resolved_target) = resolve_watch_paths(&link);
        assert_eq!(resolved_link, clean_path(&link));
        assert_eq!(resolved_target, Some(std::fs::canonicalize(&target).unwrap()));

        let (watcher, rx) = start_with_channel(&link);
        assert_eq!(watcher.watched_dirs().len(), 2);
        std::thread::sleep(Duration::from_millis(50));

        std::fs::write(&target, "[keybindings]\n# changed\n").unwrap();
        rx.recv_timeout(Duration::from_secs(2))
            .expect("expected reload signal after modifying symlink target");
    }
}
