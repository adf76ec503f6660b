//! The connection supervisor: startup sequencing, scheduled health probes,
//! and two-tier recovery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use telemux_common::SignalFlag;
use telemux_metrics::metric_defs;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::SubsystemError;
use crate::policy::{select_tier, RecoveryPolicy, RecoveryTier};
use crate::subsystem::{
    ProbeOutcome, RecoveryCtx, SubsystemDriver, SubsystemId, SubsystemSlot, SubsystemState,
    SubsystemStatus,
};

/// Commands accepted by the supervisor's run loop.
#[derive(Debug, Clone, Copy)]
pub enum SupervisorCommand {
    /// Probe the subsystem on the next loop iteration instead of waiting for
    /// its scheduled interval.
    ProbeNow(SubsystemId),
    /// Stop all subsystems and exit the run loop.
    Shutdown,
}

/// The three subsystem drivers, boxed behind the driver trait.
pub struct DriverSet {
    network: Box<dyn SubsystemDriver>,
    position: Box<dyn SubsystemDriver>,
    messaging: Box<dyn SubsystemDriver>,
}

impl DriverSet {
    /// Bundle the three drivers.
    pub fn new(
        network: Box<dyn SubsystemDriver>,
        position: Box<dyn SubsystemDriver>,
        messaging: Box<dyn SubsystemDriver>,
    ) -> Self {
        DriverSet {
            network,
            position,
            messaging,
        }
    }

    fn get_mut(&mut self, id: SubsystemId) -> &mut dyn SubsystemDriver {
        match id {
            SubsystemId::Network => self.network.as_mut(),
            SubsystemId::Position => self.position.as_mut(),
            SubsystemId::Messaging => self.messaging.as_mut(),
        }
    }
}

/// Point-in-time view of the supervisor for the observability sink.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSnapshot {
    /// Network attach status.
    pub network: SubsystemStatus,
    /// Position acquisition status.
    pub position: SubsystemStatus,
    /// Messaging session status.
    pub messaging: SubsystemStatus,
    /// Recovery-exhausted escalations (network and messaging only).
    pub escalations: u64,
}

impl SupervisorSnapshot {
    /// Status of one subsystem.
    pub fn subsystem(&self, id: SubsystemId) -> &SubsystemStatus {
        match id {
            SubsystemId::Network => &self.network,
            SubsystemId::Position => &self.position,
            SubsystemId::Messaging => &self.messaging,
        }
    }
}

/// Handle for other workers to poke the supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    supervisor: Arc<Supervisor>,
    cmd_tx: Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Request an out-of-schedule probe of one subsystem.
    pub fn probe_now(&self, id: SubsystemId) {
        let _ = self.cmd_tx.send(SupervisorCommand::ProbeNow(id));
    }

    /// Abandon any in-flight recovery for the subsystem and force it to
    /// `Disconnected`. The routine observes the transition and aborts
    /// cleanly before committing further side effects.
    pub fn abandon(&self, id: SubsystemId) {
        self.supervisor.abandon(id);
        // Wake the loop so the new state is acted on promptly.
        let _ = self.cmd_tx.send(SupervisorCommand::ProbeNow(id));
    }

    /// Stop the supervisor loop; drivers are torn down before it exits.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SupervisorCommand::Shutdown);
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.supervisor.snapshot()
    }
}

struct Slots {
    network: Arc<SubsystemSlot>,
    position: Arc<SubsystemSlot>,
    messaging: Arc<SubsystemSlot>,
}

/// The connection supervisor.
///
/// Constructed once and shared by handle; the run loop executes inside a
/// scheduler worker. All subsystem state transitions happen here.
pub struct Supervisor {
    config: SupervisorConfig,
    slots: Slots,
    network_ready: SignalFlag,
    stopped: SignalFlag,
    escalations: AtomicU64,
}

impl Supervisor {
    /// Create a supervisor. `network_ready` is raised whenever network
    /// attach is `Connected` and cleared when it degrades, for workers that
    /// gate on attach without polling.
    pub fn new(config: SupervisorConfig, network_ready: SignalFlag) -> Arc<Self> {
        Arc::new(Supervisor {
            config,
            slots: Slots {
                network: SubsystemSlot::new(SubsystemId::Network),
                position: SubsystemSlot::new(SubsystemId::Position),
                messaging: SubsystemSlot::new(SubsystemId::Messaging),
            },
            network_ready,
            stopped: SignalFlag::new(),
            escalations: AtomicU64::new(0),
        })
    }

    /// Wait until the run loop has exited and every driver is torn down.
    ///
    /// Returns `true` if the loop stopped within the timeout. Teardown
    /// exchanges commands over the live transport, so callers stopping the
    /// whole core must keep the transport workers running until this
    /// returns.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.stopped.wait_timeout(timeout)
    }

    /// Create the command channel for [`run`](Self::run) and the matching
    /// handle.
    pub fn handle(self: &Arc<Self>) -> (SupervisorHandle, Receiver<SupervisorCommand>) {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        (
            SupervisorHandle {
                supervisor: Arc::clone(self),
                cmd_tx,
            },
            cmd_rx,
        )
    }

    /// The shared state cell for one subsystem.
    pub fn slot(&self, id: SubsystemId) -> &Arc<SubsystemSlot> {
        match id {
            SubsystemId::Network => &self.slots.network,
            SubsystemId::Position => &self.slots.position,
            SubsystemId::Messaging => &self.slots.messaging,
        }
    }

    /// State snapshot for the observability sink.
    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            network: self.slots.network.status(),
            position: self.slots.position.status(),
            messaging: self.slots.messaging.status(),
            escalations: self.escalations.load(Ordering::Relaxed),
        }
    }

    /// Force a subsystem to `Disconnected`, abandoning any in-flight
    /// recovery for it.
    pub fn abandon(&self, id: SubsystemId) {
        info!(subsystem = id.as_str(), "abandoning subsystem");
        if id == SubsystemId::Network {
            self.network_ready.clear();
        }
        self.slot(id).set_state(SubsystemState::Disconnected);
    }

    /// Run the supervisor loop until `Shutdown` arrives or the command
    /// channel closes. `on_iteration` runs once per wakeup (heartbeat hook
    /// for the scheduler's monitor).
    pub fn run(
        &self,
        mut drivers: DriverSet,
        cmd_rx: Receiver<SupervisorCommand>,
        mut on_iteration: impl FnMut(),
    ) {
        // Wakeups are capped so the loop heartbeats often enough for the
        // scheduler's monitor even when the next probe is far away.
        const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

        let mut schedule = Schedule::new(Instant::now());
        info!("supervisor started");

        loop {
            on_iteration();

            let wait = schedule.until_next(Instant::now()).min(MAX_IDLE_WAIT);
            match cmd_rx.recv_timeout(wait) {
                Ok(SupervisorCommand::ProbeNow(id)) => schedule.make_due(id),
                Ok(SupervisorCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            for id in SubsystemId::ALL {
                if schedule.is_due(id, now) {
                    self.service(drivers.get_mut(id));
                    schedule.reschedule(id, now + self.config.subsystem(id).probe_interval);
                }
            }
        }

        self.network_ready.clear();
        for id in SubsystemId::ALL {
            drivers.get_mut(id).tear_down();
            self.slot(id).set_state(SubsystemState::Disconnected);
        }
        self.stopped.raise();
        info!("supervisor stopped");
    }

    /// Advance one subsystem's state machine by one step.
    pub(crate) fn service(&self, driver: &mut dyn SubsystemDriver) {
        let id = driver.id();
        match self.slot(id).state() {
            SubsystemState::Disconnected => self.start(driver),
            SubsystemState::Connecting => match driver.probe() {
                ProbeOutcome::Healthy => self.enter_connected(id),
                ProbeOutcome::Pending => {}
                ProbeOutcome::Failed => {
                    if id == SubsystemId::Position {
                        // Searching is steady state; keep looking.
                        return;
                    }
                    self.slot(id).mark_failure();
                    self.slot(id).set_state(SubsystemState::Disconnected);
                }
            },
            SubsystemState::Connected => match driver.probe() {
                ProbeOutcome::Healthy => self.slot(id).mark_healthy(),
                ProbeOutcome::Pending => {
                    if id == SubsystemId::Position {
                        // Fix lost; back to searching, not a fault.
                        debug!("position fix lost, searching");
                        self.slot(id).set_state(SubsystemState::Connecting);
                    }
                }
                ProbeOutcome::Failed => {
                    let failures = self.slot(id).mark_failure();
                    warn!(subsystem = id.as_str(), failures, "health probe failed");
                    metrics::counter!(
                        metric_defs::PROBE_FAILURES.name,
                        "subsystem" => id.as_str()
                    )
                    .increment(1);
                    if id == SubsystemId::Network {
                        self.network_ready.clear();
                    }
                    self.slot(id).set_state(SubsystemState::Degraded);
                    self.recover(driver);
                }
            },
            SubsystemState::Degraded | SubsystemState::Recovering => self.recover(driver),
        }
    }

    fn start(&self, driver: &mut dyn SubsystemDriver) {
        let id = driver.id();

        // Hard dependency: messaging may not leave Disconnected until
        // network attach is up.
        if id == SubsystemId::Messaging
            && self.slots.network.state() != SubsystemState::Connected
        {
            debug!("messaging start deferred: network not connected");
            return;
        }

        info!(subsystem = id.as_str(), "bring-up starting");
        self.slot(id).set_state(SubsystemState::Connecting);
        match driver.bring_up() {
            Ok(ProbeOutcome::Healthy) => self.enter_connected(id),
            Ok(ProbeOutcome::Pending) => {
                // Bring-up started; later probes observe completion
                // (position search).
            }
            Ok(ProbeOutcome::Failed) | Err(_) => {
                warn!(subsystem = id.as_str(), "bring-up failed");
                self.slot(id).mark_failure();
                self.slot(id).set_state(SubsystemState::Disconnected);
            }
        }
    }

    /// Recovery entry. From `Connected` this is a no-op when the subsystem
    /// is actually healthy, so redundant recovery requests cause no
    /// spurious teardown.
    pub(crate) fn recover(&self, driver: &mut dyn SubsystemDriver) {
        let id = driver.id();
        let slot = self.slot(id);

        if slot.state() == SubsystemState::Connected && driver.probe() == ProbeOutcome::Healthy {
            return;
        }

        let status = slot.status();
        let subsystem_config = self.config.subsystem(id);
        let tier = select_tier(
            RecoveryPolicy {
                full_restart_threshold: subsystem_config.full_restart_threshold,
                max_lightweight_attempts: subsystem_config.max_lightweight_attempts,
            },
            status.last_healthy_at,
            status.consecutive_failures,
            Instant::now(),
        );

        info!(subsystem = id.as_str(), tier = tier.as_str(), "recovery attempt");
        metrics::counter!(
            metric_defs::RECOVERIES.name,
            "subsystem" => id.as_str(),
            "tier" => tier.as_str()
        )
        .increment(1);
        slot.set_state(SubsystemState::Recovering);

        let ctx = RecoveryCtx::new(Arc::clone(slot));
        let result = match tier {
            RecoveryTier::Lightweight => driver.reconnect(&ctx),
            RecoveryTier::Full => driver.reinitialize(&ctx),
        };

        if ctx.abandoned() {
            debug!(subsystem = id.as_str(), "recovery abandoned");
            return;
        }

        match result {
            Ok(()) => match driver.probe() {
                ProbeOutcome::Healthy => self.enter_connected(id),
                ProbeOutcome::Pending => slot.set_state(SubsystemState::Connecting),
                ProbeOutcome::Failed => self.recovery_failed(id),
            },
            Err(SubsystemError::Abandoned) => {}
            Err(err) => {
                warn!(subsystem = id.as_str(), %err, "recovery action failed");
                self.recovery_failed(id);
            }
        }
    }

    fn enter_connected(&self, id: SubsystemId) {
        let slot = self.slot(id);
        slot.set_state(SubsystemState::Connected);
        slot.mark_healthy();
        info!(subsystem = id.as_str(), "connected");
        if id == SubsystemId::Network {
            self.network_ready.raise();
        }
    }

    fn recovery_failed(&self, id: SubsystemId) {
        let slot = self.slot(id);
        slot.mark_failure();

        if id == SubsystemId::Position {
            // Absence of a fix is expected steady state, never escalated.
            slot.set_state(SubsystemState::Connecting);
            return;
        }

        // Stay in Recovering; the next scheduled probe retries. The failed
        // tier is escalated for the host application to observe.
        slot.set_state(SubsystemState::Recovering);
        self.escalations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            metric_defs::RECOVERIES_EXHAUSTED.name,
            "subsystem" => id.as_str()
        )
        .increment(1);
        warn!(subsystem = id.as_str(), "recovery exhausted, will retry");
    }
}

/// Per-subsystem probe due times.
struct Schedule {
    due: [Instant; 3],
}

fn idx(id: SubsystemId) -> usize {
    match id {
        SubsystemId::Network => 0,
        SubsystemId::Position => 1,
        SubsystemId::Messaging => 2,
    }
}

impl Schedule {
    fn new(now: Instant) -> Self {
        Schedule { due: [now; 3] }
    }

    fn until_next(&self, now: Instant) -> Duration {
        self.due
            .iter()
            .map(|&at| at.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }

    fn is_due(&self, id: SubsystemId, now: Instant) -> bool {
        self.due[idx(id)] <= now
    }

    fn make_due(&mut self, id: SubsystemId) {
        self.due[idx(id)] = Instant::now();
    }

    fn reschedule(&mut self, id: SubsystemId, at: Instant) {
        self.due[idx(id)] = at;
    }
}
