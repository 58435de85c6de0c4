//! Communication mode state machine
//!
//! Derives the node's [`CommMode`] from infra connectivity and endpoint
//! reachability. Transitions are computed on every periodic check but only
//! applied once the dwell time since the previous transition has elapsed, so
//! a marginal link does not make the node flap between modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use swarmlink_core::{ModePreference, Timestamp};

/// Node's current preference between broadcast and infra-assisted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommMode {
    /// No infra link; mesh only
    #[default]
    #[serde(rename = "bo", alias = "broadcast_only")]
    BroadcastOnly,
    /// Infra is up but broadcast stays primary
    #[serde(rename = "ib", alias = "infra_backup")]
    InfraBackup,
    /// Endpoint link preferred, mesh still running
    #[serde(rename = "ip", alias = "infra_primary")]
    InfraPrimary,
    /// Endpoint link only
    #[serde(rename = "io", alias = "infra_only")]
    InfraOnly,
}

impl CommMode {
    /// Whether mesh traffic (discovery, positioning, relay) is sent in this mode
    pub fn uses_broadcast(&self) -> bool {
        !matches!(self, CommMode::InfraOnly)
    }

    /// Whether the infra link is up in this mode
    pub fn has_infra(&self) -> bool {
        !matches!(self, CommMode::BroadcastOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommMode::BroadcastOnly => "broadcast_only",
            CommMode::InfraBackup => "infra_backup",
            CommMode::InfraPrimary => "infra_primary",
            CommMode::InfraOnly => "infra_only",
        }
    }
}

impl fmt::Display for CommMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of infra connectivity from the last check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub infra_connected: bool,
    pub endpoint_reachable: bool,
}

/// Outcome of a mode evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    /// Target equals the current mode
    Unchanged,
    /// Mode changed
    Applied { from: CommMode, to: CommMode },
    /// Change wanted but the dwell window has not elapsed
    Suppressed { current: CommMode, wanted: CommMode },
}

/// CommMode state machine with dwell-time hysteresis
#[derive(Debug, Clone)]
pub struct ModeSelector {
    preference: ModePreference,
    current: CommMode,
    dwell_ms: u64,
    last_transition: Option<Timestamp>,
}

impl ModeSelector {
    pub fn new(preference: ModePreference, dwell_ms: u64) -> Self {
        Self {
            preference,
            current: CommMode::BroadcastOnly,
            dwell_ms,
            last_transition: None,
        }
    }

    pub fn current(&self) -> CommMode {
        self.current
    }

    pub fn last_transition(&self) -> Option<Timestamp> {
        self.last_transition
    }

    /// Mode the link state calls for, ignoring dwell time
    pub fn target(&self, status: LinkStatus) -> CommMode {
        if !status.infra_connected {
            return CommMode::BroadcastOnly;
        }
        match (self.preference, status.endpoint_reachable) {
            (ModePreference::EndpointPrimary, true) => CommMode::InfraPrimary,
            (ModePreference::EndpointOnly, true) => CommMode::InfraOnly,
            _ => CommMode::InfraBackup,
        }
    }

    /// Evaluate the link state and apply a transition if the dwell allows it.
    pub fn evaluate(&mut self, status: LinkStatus, now: Timestamp) -> ModeTransition {
        let wanted = self.target(status);
        if wanted == self.current {
            return ModeTransition::Unchanged;
        }

        if let Some(last) = self.last_transition {
            if now.saturating_sub(last) < self.dwell_ms {
                tracing::debug!(
                    current = %self.current,
                    wanted = %wanted,
                    "Mode change suppressed by dwell window"
                );
                return ModeTransition::Suppressed {
                    current: self.current,
                    wanted,
                };
            }
        }

        let from = self.current;
        self.current = wanted;
        self.last_transition = Some(now);
        tracing::info!(from = %from, to = %wanted, "Communication mode changed");
        ModeTransition::Applied { from, to: wanted }
    }
}
