//! The active set of hotkeys
//!
//! A [`Registry`] is built from a complete binding list and is never edited
//! afterwards; reloading produces a new registry that replaces the old one.

use std::path::Path;

use tracing::warn;

use super::keys::{key_code, Modifiers};
use crate::config::{self, Binding, ConfigError};

/// Runtime form of a binding, ready to hand to `RegisterHotKey`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotkey {
    /// Identifier passed to the OS; dense, starting at 1
    pub id: u32,
    /// Modifier flags
    pub modifiers: Modifiers,
    /// Virtual-key code
    pub key_code: u16,
    /// Original text, for logs
    pub key_string: String,
    /// Program and arguments to run
    pub action: Vec<String>,
}

impl Hotkey {
    /// Translate a binding, or `None` when the key name is unknown
    pub fn from_binding(id: u32, binding: &Binding) -> Option<Self> {
        let key_code = key_code(&binding.key)?;
        let key_string = if binding.modifiers.is_empty() {
            binding.key.clone()
        } else {
            format!("{}+{}", binding.modifiers, binding.key)
        };
        Some(Self {
            id,
            modifiers: Modifiers::parse(&binding.modifiers),
            key_code,
            key_string,
            action: binding.action.clone(),
        })
    }
}

/// Ordered, immutable collection of hotkeys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    hotkeys: Vec<Hotkey>,
}

impl Registry {
    /// A registry with no hotkeys
    pub fn empty() -> Self {
        Self::default()
    }

    /// Translate bindings in order, dropping those with unknown key names.
    ///
    /// Identifiers are assigned only to surviving bindings, so the result
    /// always carries ids `1..=len` without gaps.
    pub fn from_bindings(bindings: &[Binding]) -> Self {
        let mut hotkeys = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let next_id = hotkeys.len() as u32 + 1;
            match Hotkey::from_binding(next_id, binding) {
                Some(hk) => hotkeys.push(hk),
                None => warn!(
                    modifiers = %binding.modifiers,
                    key = %binding.key,
                    "skipping binding with unknown key"
                ),
            }
        }
        Self { hotkeys }
    }

    /// Read the binding file at `path` and build a registry from it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bindings = config::load_bindings(path)?;
        Ok(Self::from_bindings(&bindings))
    }

    /// Find a hotkey by identifier
    pub fn get(&self, id: u32) -> Option<&Hotkey> {
        // ids are dense, so the slot is known; fall back to a scan anyway
        let slot = (id as usize).checked_sub(1)?;
        match self.hotkeys.get(slot) {
            Some(hk) if hk.id == id => Some(hk),
            _ => self.hotkeys.iter().find(|hk| hk.id == id),
        }
    }

    /// Hotkeys in binding order
    pub fn iter(&self) -> std::slice::Iter<'_, Hotkey> {
        self.hotkeys.iter()
    }

    /// Number of hotkeys
    pub fn len(&self) -> usize {
        self.hotkeys.len()
    }

    /// True when there are no hotkeys
    pub fn is_empty(&self) -> bool {
        self.hotkeys.is_empty()
    }
}
