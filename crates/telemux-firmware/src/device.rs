//! The device context: owns the scheduler and wires the classifier,
//! arbiter, and supervisor together over the externally supplied transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use telemux_common::{SignalFlag, TransportError, TransportReader, TransportWriter};
use telemux_sched::{
    AffinityTable, MonitorReport, SchedError, Scheduler, WorkerCategory, WorkerPriority,
    WorkerSnapshot,
};
use telemux_supervisor::{
    DriverSet, SubsystemId, SubsystemState, Supervisor, SupervisorHandle, SupervisorSnapshot,
};
use telemux_transport::{
    ring_channel, ArbiterSnapshot, ClassifierSnapshot, CommandArbiter, RingRecvError,
    StreamClassifier,
};
use tracing::{info, warn};

use crate::config::DeviceConfig;
use crate::drivers::{MessagingDriver, NetworkDriver, PositionDriver};
use crate::position::{PositionShared, PositionSink};

/// Poll interval for the transport read loop; also its heartbeat cadence.
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Poll interval for the position record reader.
const POSITION_POLL: Duration = Duration::from_millis(200);

/// Aggregated state for the observability sink. Read-only; polling it has
/// no effect on device behavior.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub supervisor: SupervisorSnapshot,
    pub arbiter: ArbiterSnapshot,
    pub classifier: ClassifierSnapshot,
    pub workers: Vec<WorkerSnapshot>,
}

impl DeviceSnapshot {
    /// Total transport unavailability: both command-driven subsystems stuck
    /// in recovery with their tiers exhausted. The embedding application
    /// should treat this as a top-level fault (e.g. hardware reset).
    pub fn transport_fault(&self) -> bool {
        self.supervisor.subsystem(SubsystemId::Network).state == SubsystemState::Recovering
            && self.supervisor.subsystem(SubsystemId::Messaging).state
                == SubsystemState::Recovering
            && self.supervisor.escalations >= 2
    }
}

/// Running firmware core.
///
/// Created once via [`start`](Self::start); the transport's read half goes
/// to the classifier reader worker and the write half to the arbiter, so
/// direction ownership is fixed at construction.
pub struct Device {
    scheduler: Arc<Scheduler>,
    supervisor: Arc<Supervisor>,
    handle: SupervisorHandle,
    arbiter: Arc<CommandArbiter>,
    classifier_stats: Arc<Mutex<ClassifierSnapshot>>,
    network_ready: SignalFlag,
    position: Arc<PositionShared>,
    shutdown_grace: Duration,
}

impl Device {
    /// Wire up the core and start all workers.
    pub fn start(
        config: DeviceConfig,
        mut reader: Box<dyn TransportReader>,
        writer: Box<dyn TransportWriter>,
        mut sink: Box<dyn PositionSink>,
    ) -> Result<Device, SchedError> {
        telemux_metrics::describe_metrics();

        let (control_tx, control_rx) = ring_channel("control", config.control_queue);
        let (position_tx, position_rx) = ring_channel("position", config.position_queue);

        let arbiter = Arc::new(CommandArbiter::new(
            writer,
            control_rx,
            config.arbiter.clone(),
        ));
        let network_ready = SignalFlag::new();
        let position = PositionShared::new(SignalFlag::new());

        let scheduler = Scheduler::new(config.scheduler.clone(), AffinityTable::detect());

        // Sole reader of raw transport bytes.
        let classifier_stats = Arc::new(Mutex::new(ClassifierSnapshot::default()));
        let mut classifier =
            StreamClassifier::new(config.classifier.clone(), control_tx, position_tx);
        let stats_cell = Arc::clone(&classifier_stats);
        scheduler.spawn(
            "modem-reader",
            WorkerCategory::Protocol,
            WorkerPriority::High,
            move |ctx| {
                let mut buf = [0u8; 256];
                while !ctx.should_stop() {
                    ctx.beat();
                    match reader.read(&mut buf, READ_TIMEOUT) {
                        Ok(0) => {}
                        Ok(n) => classifier.consume(&buf[..n]),
                        Err(TransportError::Closed) => {
                            warn!("transport read half closed");
                            break;
                        }
                        Err(TransportError::Io(err)) => {
                            warn!(%err, "transport read error");
                        }
                    }
                    *stats_cell.lock() = classifier.snapshot();
                }
            },
        )?;

        // Hands classified position sentences to the external parser and
        // maintains the freshness state the position driver probes.
        let position_state = Arc::clone(&position);
        scheduler.spawn(
            "position-reader",
            WorkerCategory::Bulk,
            WorkerPriority::Normal,
            move |ctx| {
                while !ctx.should_stop() {
                    ctx.beat();
                    match position_rx.recv_timeout(POSITION_POLL) {
                        Ok(record) => {
                            position_state.note_sentence();
                            let status = sink.accept(&record);
                            position_state.set_fix(status);
                        }
                        Err(RingRecvError::Timeout) => {}
                        Err(RingRecvError::Disconnected) => break,
                    }
                }
            },
        )?;

        let supervisor = Supervisor::new(config.supervisor.clone(), network_ready.clone());
        let (handle, cmd_rx) = supervisor.handle();
        let drivers = DriverSet::new(
            Box::new(NetworkDriver::new(
                Arc::clone(&arbiter),
                config.command_timeout,
            )),
            Box::new(PositionDriver::new(
                Arc::clone(&arbiter),
                Arc::clone(&position),
                config.command_timeout,
                config.position_stale_after,
            )),
            Box::new(MessagingDriver::new(
                Arc::clone(&arbiter),
                config.command_timeout,
            )),
        );
        let supervisor_loop = Arc::clone(&supervisor);
        scheduler.spawn(
            "supervisor",
            WorkerCategory::Protocol,
            WorkerPriority::High,
            move |ctx| {
                let heartbeat = ctx.heartbeat();
                supervisor_loop.run(drivers, cmd_rx, move || heartbeat.beat());
            },
        )?;

        scheduler.start_services()?;
        info!("device core started");

        // Teardown issues at most one command per subsystem.
        let shutdown_grace = config.command_timeout * 4;

        Ok(Device {
            scheduler,
            supervisor,
            handle,
            arbiter,
            classifier_stats,
            network_ready,
            position,
            shutdown_grace,
        })
    }

    /// The command arbiter, for the messaging client and other callers
    /// that issue correlated command/response exchanges.
    pub fn arbiter(&self) -> &Arc<CommandArbiter> {
        &self.arbiter
    }

    /// Handle to the connection supervisor.
    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.handle
    }

    /// Raised while network attach is up; waitable without polling.
    pub fn network_ready(&self) -> &SignalFlag {
        &self.network_ready
    }

    /// Position freshness and fix state.
    pub fn position(&self) -> &Arc<PositionShared> {
        &self.position
    }

    /// Latest monitor sweep report, if one has run.
    pub fn monitor_report(&self) -> Option<MonitorReport> {
        self.scheduler.latest_report()
    }

    /// Aggregated observability snapshot.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            supervisor: self.supervisor.snapshot(),
            arbiter: self.arbiter.snapshot(),
            classifier: *self.classifier_stats.lock(),
            workers: self.scheduler.worker_snapshots(),
        }
    }

    /// Stop the supervisor, then all workers. Blocks until every worker
    /// has joined. Idempotent.
    pub fn shutdown(&self) {
        self.handle.shutdown();
        // Driver teardown exchanges commands over the transport, so the
        // reader workers must stay up until the supervisor loop has exited.
        if !self.supervisor.wait_stopped(self.shutdown_grace) {
            warn!("supervisor still stopping after grace period");
        }
        self.scheduler.shutdown();
        info!("device core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemux_supervisor::SubsystemStatus;

    fn snapshot(
        network: SubsystemState,
        messaging: SubsystemState,
        escalations: u64,
    ) -> DeviceSnapshot {
        let status = |state| SubsystemStatus {
            state,
            last_healthy_at: None,
            consecutive_failures: 0,
        };
        DeviceSnapshot {
            supervisor: SupervisorSnapshot {
                network: status(network),
                position: status(SubsystemState::Connecting),
                messaging: status(messaging),
                escalations,
            },
            arbiter: ArbiterSnapshot::default(),
            classifier: ClassifierSnapshot::default(),
            workers: Vec::new(),
        }
    }

    #[test]
    fn test_transport_fault_requires_both_subsystems_exhausted() {
        assert!(snapshot(
            SubsystemState::Recovering,
            SubsystemState::Recovering,
            2
        )
        .transport_fault());
        // A messaging-only outage is degraded operation, not a fault.
        assert!(!snapshot(
            SubsystemState::Connected,
            SubsystemState::Recovering,
            3
        )
        .transport_fault());
        assert!(!snapshot(
            SubsystemState::Recovering,
            SubsystemState::Recovering,
            1
        )
        .transport_fault());
    }
}
