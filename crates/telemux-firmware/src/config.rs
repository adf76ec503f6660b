use std::time::Duration;

use serde::Deserialize;
use telemux_sched::SchedulerConfig;
use telemux_supervisor::SupervisorConfig;
use telemux_transport::{ArbiterConfig, ClassifierConfig};

/// Top-level device configuration, populated by an external loader.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub classifier: ClassifierConfig,
    pub arbiter: ArbiterConfig,
    pub supervisor: SupervisorConfig,
    pub scheduler: SchedulerConfig,
    /// Control ring channel capacity.
    pub control_queue: usize,
    /// Position ring channel capacity.
    pub position_queue: usize,
    /// Timeout applied to the subsystem drivers' modem commands.
    pub command_timeout: Duration,
    /// A position-sentence stream older than this counts as stalled.
    pub position_stale_after: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            classifier: ClassifierConfig::default(),
            arbiter: ArbiterConfig::default(),
            supervisor: SupervisorConfig::default(),
            scheduler: SchedulerConfig::default(),
            control_queue: 64,
            position_queue: 32,
            command_timeout: Duration::from_secs(5),
            position_stale_after: Duration::from_secs(10),
        }
    }
}

impl DeviceConfig {
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_position_stale_after(mut self, stale_after: Duration) -> Self {
        self.position_stale_after = stale_after;
        self
    }
}
