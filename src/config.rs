//! Configuration loading and management
//!
//! Resolves the config file path from the command line and environment, and
//! decodes the TOML binding file into [`Binding`] records.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::environment;

/// Default config file path containing the hotkey bindings
pub const DEFAULT_CONFIG_PATH: &str = r"%USERPROFILE%\.config\hotkeys.toml";

/// Takes precedence over `--config` when set
pub const CONFIG_HOME_VAR: &str = "HOTKEYS_CONFIG_HOME";

/// Errors raised while reading or decoding the binding file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode toml: {0}")]
    Decode(#[from] toml::de::Error),
}

/// Top-level layout of the binding file
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub keybindings: KeybindingsConfig,
}

/// The `[keybindings]` table
#[derive(Debug, Default, Deserialize)]
pub struct KeybindingsConfig {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// One `[[keybindings.bindings]]` record, as written by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Binding {
    /// `+` separated modifier names, e.g. `"ctrl+shift"`
    #[serde(default)]
    pub modifiers: String,

    /// Key name, e.g. `"a"`, `"f1"`, `"enter"`
    pub key: String,

    /// Program and arguments to run
    #[serde(default)]
    pub action: Vec<String>,
}

/// Decode bindings from TOML text
pub fn parse_bindings(text: &str) -> Result<Vec<Binding>, ConfigError> {
    let file: ConfigFile = toml::from_str(text)?;
    Ok(file.keybindings.bindings)
}

/// Read and decode the binding file at `path`
pub fn load_bindings(path: &Path) -> Result<Vec<Binding>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    parse_bindings(&text)
}

/// Determine the config path: `HOTKEYS_CONFIG_HOME` wins, otherwise the
/// flag value with `%NAME%` references expanded from the process environment.
pub fn resolve_config_path(flag_value: &str) -> PathBuf {
    match std::env::var(CONFIG_HOME_VAR) {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => PathBuf::from(environment::expand_variables(flag_value, |name| {
            std::env::var(name).ok()
        })),
    }
}
