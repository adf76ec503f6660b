//! Supervisor configuration.
//!
//! All timing knobs the original firmware hard-coded are configuration
//! inputs here, populated by an external loader. The defaults are
//! conservative starting points, not tuned truths.

use std::time::Duration;

use serde::Deserialize;

use crate::subsystem::SubsystemId;

/// Per-subsystem timing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    /// How often the subsystem's health probe runs.
    pub probe_interval: Duration,

    /// If the subsystem was last healthy longer ago than this, recovery
    /// skips the lightweight tier and reinitializes fully.
    pub full_restart_threshold: Duration,

    /// Lightweight recoveries attempted before forcing the full tier
    /// regardless of how recently the subsystem was healthy.
    pub max_lightweight_attempts: u32,

    /// Consecutive failures after which the subsystem counts toward a
    /// device-level transport fault.
    pub fault_threshold: u32,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        SubsystemConfig {
            probe_interval: Duration::from_secs(20),
            full_restart_threshold: Duration::from_secs(300),
            max_lightweight_attempts: 3,
            fault_threshold: 5,
        }
    }
}

impl SubsystemConfig {
    /// Set the probe interval.
    pub fn with_probe_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    /// Set the full-restart threshold.
    pub fn with_full_restart_threshold(mut self, threshold: Duration) -> Self {
        self.full_restart_threshold = threshold;
        self
    }
}

/// Configuration for the connection supervisor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Network attach subsystem. Probed least often: attach state is the
    /// most stable of the three.
    pub network: SubsystemConfig,

    /// Position acquisition subsystem.
    pub position: SubsystemConfig,

    /// Messaging session subsystem. Probed most often: the session is the
    /// most failure-prone of the three.
    pub messaging: SubsystemConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            network: SubsystemConfig::default().with_probe_interval(Duration::from_secs(30)),
            position: SubsystemConfig::default().with_probe_interval(Duration::from_secs(20)),
            messaging: SubsystemConfig::default().with_probe_interval(Duration::from_secs(10)),
        }
    }
}

impl SupervisorConfig {
    /// The configuration for one subsystem.
    pub fn subsystem(&self, id: SubsystemId) -> &SubsystemConfig {
        match id {
            SubsystemId::Network => &self.network,
            SubsystemId::Position => &self.position,
            SubsystemId::Messaging => &self.messaging,
        }
    }
}
