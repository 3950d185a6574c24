//! Deciding which filesystem events mean "the config changed"

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::EventKind;

/// Window in which further qualifying events are coalesced
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// One path an event may refer to, with its file name cached
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    base: Option<OsString>,
}

impl Candidate {
    fn new(path: &Path) -> Self {
        let path = clean_path(path);
        let base = path.file_name().map(|b| b.to_os_string());
        Self { path, base }
    }

    fn matches(&self, event_path: &Path) -> bool {
        if event_path == self.path {
            return true;
        }
        // temp-file-then-rename saves report sibling or partial paths
        matches!((&self.base, event_path.file_name()), (Some(a), Some(b)) if a == b)
    }
}

/// Stateful filter: path matching plus debounce.
#[derive(Debug)]
pub struct ReloadFilter {
    candidates: Vec<Candidate>,
    debounce: Duration,
    last_accepted: Option<Instant>,
}

impl ReloadFilter {
    /// Match against the configured path and, for a symlinked config, the
    /// resolved target
    pub fn new(config_path: &Path, target: Option<&Path>) -> Self {
        let mut candidates = vec![Candidate::new(config_path)];
        candidates.extend(target.map(Candidate::new));
        Self {
            candidates,
            debounce: DEBOUNCE,
            last_accepted: None,
        }
    }

    /// Override the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// True if this event should trigger a reload now
    pub fn accept(&mut self, kind: &EventKind, paths: &[PathBuf], now: Instant) -> bool {
        if !is_relevant_kind(kind) {
            return false;
        }
        let hit = paths.iter().any(|p| {
            let p = clean_path(p);
            self.candidates.iter().any(|c| c.matches(&p))
        });
        if !hit {
            return false;
        }
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.debounce {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

/// Create, write and rename events qualify; metadata-only changes, removals
/// and accesses do not
fn is_relevant_kind(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into its
/// parent where possible
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !matches!(
                    out.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_))
                ) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
