//! Node status state machine.
//!
//! # States
//! - Online: heartbeating within the timeout window
//! - Offline: no heartbeat within the window (or never seen)
//! - Maintenance: operator hold; still served config, never dispatched to
//!
//! # State Transitions
//! ```text
//! Online/Offline → Online:      Heartbeat
//! Online → Offline:             Timeout
//! any → Maintenance:            EnterMaintenance
//! Maintenance → Offline:        ExitMaintenance (next heartbeat brings it online)
//! Maintenance → Maintenance:    Heartbeat, Timeout
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    #[default]
    Offline,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    Heartbeat,
    Timeout,
    EnterMaintenance,
    ExitMaintenance,
}

/// Next status for `current` after `event`.
pub fn transition(current: NodeStatus, event: LivenessEvent) -> NodeStatus {
    use LivenessEvent::*;
    use NodeStatus::*;

    match (current, event) {
        (_, EnterMaintenance) => Maintenance,
        (Maintenance, ExitMaintenance) => Offline,
        (Maintenance, _) => Maintenance,
        (_, Heartbeat) => Online,
        (_, Timeout) => Offline,
        (other, ExitMaintenance) => other,
    }
}

/// True when a node last seen at `last_seen` has missed its deadline at `now`.
///
/// A node that was never seen is expired.
pub fn is_expired(last_seen: Option<u64>, now: u64, timeout_secs: u64) -> bool {
    match last_seen {
        Some(seen) => now.saturating_sub(seen) > timeout_secs,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LivenessEvent::*;
    use NodeStatus::*;

    #[test]
    fn test_heartbeat_brings_node_online() {
        assert_eq!(transition(Offline, Heartbeat), Online);
        assert_eq!(transition(Online, Heartbeat), Online);
    }

    #[test]
    fn test_timeout_takes_node_offline() {
        assert_eq!(transition(Online, Timeout), Offline);
        assert_eq!(transition(Offline, Timeout), Offline);
    }

    #[test]
    fn test_maintenance_is_sticky() {
        assert_eq!(transition(Maintenance, Heartbeat), Maintenance);
        assert_eq!(transition(Maintenance, Timeout), Maintenance);
        assert_eq!(transition(Online, EnterMaintenance), Maintenance);
        assert_eq!(transition(Offline, EnterMaintenance), Maintenance);
        assert_eq!(transition(Maintenance, ExitMaintenance), Offline);
    }

    #[test]
    fn test_exit_maintenance_outside_maintenance_is_noop() {
        assert_eq!(transition(Online, ExitMaintenance), Online);
        assert_eq!(transition(Offline, ExitMaintenance), Offline);
    }

    #[test]
    fn test_deadline() {
        assert!(!is_expired(Some(100), 150, 60));
        assert!(!is_expired(Some(100), 160, 60));
        assert!(is_expired(Some(100), 161, 60));
        assert!(is_expired(None, 0, 60));
        // Clock skew: a last_seen in the future is never expired.
        assert!(!is_expired(Some(200), 100, 60));
    }
}
