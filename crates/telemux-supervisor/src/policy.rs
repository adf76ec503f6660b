//! Recovery-tier selection.
//!
//! Derived, never stored: tier selection is a pure function of the
//! subsystem's healthy history, so it can be reasoned about and tested
//! without a supervisor in the loop.

use std::time::{Duration, Instant};

/// The two remediation tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
    /// Reconnect only, assuming prior successful bring-up. Cheap, bounded
    /// short wait.
    Lightweight,
    /// Complete teardown and reinitialization. Expensive (seconds).
    Full,
}

impl RecoveryTier {
    /// Lowercase name for metric labels and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecoveryTier::Lightweight => "lightweight",
            RecoveryTier::Full => "full",
        }
    }
}

/// Inputs to tier selection.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    /// Last-healthy age beyond which only the full tier is attempted.
    pub full_restart_threshold: Duration,
    /// Consecutive failures after which the full tier is forced even with a
    /// recent healthy history (a session that keeps dropping right after
    /// reconnect needs the expensive path).
    pub max_lightweight_attempts: u32,
}

/// Select the recovery tier to attempt.
///
/// Lightweight requires that the subsystem was healthy at least once and
/// recently enough, and that lightweight attempts are not already exhausted.
pub fn select_tier(
    policy: RecoveryPolicy,
    last_healthy_at: Option<Instant>,
    consecutive_failures: u32,
    now: Instant,
) -> RecoveryTier {
    if consecutive_failures > policy.max_lightweight_attempts {
        return RecoveryTier::Full;
    }
    match last_healthy_at {
        Some(at) if now.duration_since(at) < policy.full_restart_threshold => {
            RecoveryTier::Lightweight
        }
        _ => RecoveryTier::Full,
    }
}
