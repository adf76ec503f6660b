//! Subsystem identities, state cells, and the driver trait.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use telemux_metrics::metric_defs;

use crate::error::SubsystemError;

/// The three managed subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemId {
    /// Cellular network attach.
    Network,
    /// Position-fix acquisition.
    Position,
    /// Publish/subscribe messaging session.
    Messaging,
}

impl SubsystemId {
    /// All subsystems in startup order.
    pub const ALL: [SubsystemId; 3] = [
        SubsystemId::Network,
        SubsystemId::Position,
        SubsystemId::Messaging,
    ];

    /// Lowercase name for metric labels and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubsystemId::Network => "network",
            SubsystemId::Position => "position",
            SubsystemId::Messaging => "messaging",
        }
    }
}

/// Lifecycle state of one subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    /// Not brought up (or torn down).
    Disconnected,
    /// Bring-up in progress. For position this includes searching for a
    /// fix, which may last indefinitely.
    Connecting,
    /// Healthy and in service.
    Connected,
    /// A health probe failed; recovery has not begun.
    Degraded,
    /// A recovery attempt is in progress or pending retry.
    Recovering,
}

impl SubsystemState {
    /// Lowercase name for logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubsystemState::Disconnected => "disconnected",
            SubsystemState::Connecting => "connecting",
            SubsystemState::Connected => "connected",
            SubsystemState::Degraded => "degraded",
            SubsystemState::Recovering => "recovering",
        }
    }

    /// Numeric code for the state gauge.
    pub const fn code(&self) -> u8 {
        match self {
            SubsystemState::Disconnected => 0,
            SubsystemState::Connecting => 1,
            SubsystemState::Connected => 2,
            SubsystemState::Degraded => 3,
            SubsystemState::Recovering => 4,
        }
    }
}

/// Point-in-time view of a subsystem for health-probe callers.
#[derive(Debug, Clone, Copy)]
pub struct SubsystemStatus {
    /// Current state.
    pub state: SubsystemState,
    /// When the subsystem last passed a probe, if ever.
    pub last_healthy_at: Option<Instant>,
    /// Probe/recovery failures since the last healthy probe.
    pub consecutive_failures: u32,
}

struct SlotInner {
    state: SubsystemState,
    last_healthy_at: Option<Instant>,
    consecutive_failures: u32,
}

/// Shared state cell for one subsystem.
///
/// Mutated only via the supervisor; everyone else reads snapshots through
/// [`status`](Self::status). Shared so an in-flight recovery routine can
/// observe the supervisor moving the state out from under it.
pub struct SubsystemSlot {
    id: SubsystemId,
    inner: Mutex<SlotInner>,
}

impl SubsystemSlot {
    pub(crate) fn new(id: SubsystemId) -> Arc<Self> {
        Arc::new(SubsystemSlot {
            id,
            inner: Mutex::new(SlotInner {
                state: SubsystemState::Disconnected,
                last_healthy_at: None,
                consecutive_failures: 0,
            }),
        })
    }

    /// Which subsystem this slot tracks.
    pub fn id(&self) -> SubsystemId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SubsystemState {
        self.inner.lock().state
    }

    /// Snapshot for health-probe callers.
    pub fn status(&self) -> SubsystemStatus {
        let inner = self.inner.lock();
        SubsystemStatus {
            state: inner.state,
            last_healthy_at: inner.last_healthy_at,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    pub(crate) fn set_state(&self, state: SubsystemState) {
        let mut inner = self.inner.lock();
        if inner.state != state {
            tracing::debug!(
                subsystem = self.id.as_str(),
                from = inner.state.as_str(),
                to = state.as_str(),
                "state transition"
            );
        }
        inner.state = state;
        drop(inner);
        metrics::gauge!(metric_defs::SUBSYSTEM_STATE.name, "subsystem" => self.id.as_str())
            .set(state.code() as f64);
    }

    pub(crate) fn mark_healthy(&self) {
        let mut inner = self.inner.lock();
        inner.last_healthy_at = Some(Instant::now());
        inner.consecutive_failures = 0;
    }

    pub(crate) fn mark_failure(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.consecutive_failures
    }
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The subsystem is in service.
    Healthy,
    /// Not in service yet, and that is expected (position still searching
    /// for a fix). Not a fault.
    Pending,
    /// The subsystem should be in service and is not.
    Failed,
}

/// Lets a recovery routine notice the supervisor abandoning it.
///
/// Routines must call [`abandoned`](Self::abandoned) before committing side
/// effects and abort cleanly when it returns true.
pub struct RecoveryCtx {
    slot: Arc<SubsystemSlot>,
}

impl RecoveryCtx {
    pub(crate) fn new(slot: Arc<SubsystemSlot>) -> Self {
        RecoveryCtx { slot }
    }

    /// True when the slot is no longer `Recovering`: the supervisor moved
    /// the state out from under the routine and it must stop.
    pub fn abandoned(&self) -> bool {
        self.slot.state() != SubsystemState::Recovering
    }
}

/// One managed subsystem's behavior.
///
/// One implementation per subsystem; the supervisor holds them as trait
/// objects and owns all state transitions. Drivers do the modem work and
/// report outcomes, nothing more.
pub trait SubsystemDriver: Send {
    /// Which subsystem this driver manages.
    fn id(&self) -> SubsystemId;

    /// Run the subsystem's bring-up sequence.
    ///
    /// Returns the probe outcome after bring-up: `Healthy` means in service
    /// now, `Pending` means bring-up started and completion will be observed
    /// by later probes (position search).
    fn bring_up(&mut self) -> Result<ProbeOutcome, SubsystemError>;

    /// Check the subsystem's health without side effects.
    fn probe(&mut self) -> ProbeOutcome;

    /// Lightweight recovery: reconnect only, assuming prior bring-up.
    /// Must be idempotent on an already-healthy subsystem.
    fn reconnect(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError>;

    /// Full recovery: tear down and redo the entire bring-up.
    fn reinitialize(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError>;

    /// Release the subsystem's resources on shutdown.
    fn tear_down(&mut self);
}
