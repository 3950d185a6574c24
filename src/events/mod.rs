//! Status events reported by the agent
//!
//! The agent sends one line per event to the controlling service over the
//! control channel. Events are also serializable for structured consumers.

use serde::{Deserialize, Serialize};

/// Things the agent tells the service about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent process is up and owns its message window
    Started {
        /// Process id of the agent
        pid: u32,
    },

    /// A configuration load finished and hotkeys were registered
    HotkeysLoaded {
        /// Number of active hotkeys
        count: usize,
    },

    /// A reload failed; no hotkeys are active until the next good load
    ReloadFailed { reason: String },

    /// A hotkey fired and its action was started
    ActionStarted { id: u32, pid: u32 },

    /// A hotkey fired but its action could not be started
    ActionFailed { id: u32, reason: String },

    /// Agent is leaving its dispatch loop
    Stopping,
}

impl std::fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentEvent::Started { pid } => write!(f, "STARTED pid={}", pid),
            AgentEvent::HotkeysLoaded { count } => write!(f, "HOTKEYS_LOADED count={}", count),
            AgentEvent::ReloadFailed { reason } => write!(f, "RELOAD_FAILED {}", reason),
            AgentEvent::ActionStarted { id, pid } => {
                write!(f, "ACTION_STARTED id={} pid={}", id, pid)
            }
            AgentEvent::ActionFailed { id, reason } => {
                write!(f, "ACTION_FAILED id={} {}", id, reason)
            }
            AgentEvent::Stopping => write!(f, "STOPPING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AgentEvent::ActionStarted { id: 3, pid: 1500 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("action_started"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"stopping"}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, AgentEvent::Stopping);
    }

    #[test]
    fn test_display_is_single_line() {
        let event = AgentEvent::ReloadFailed {
            reason: "decode toml: bad".into(),
        };
        let line = event.to_string();
        assert_eq!(line, "RELOAD_FAILED decode toml: bad");
        assert!(!line.contains('\n'));
    }
}
