//! Worker creation, the heartbeat monitor sweep, and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Deserialize;
use telemux_common::SignalFlag;
use telemux_metrics::metric_defs;
use tracing::{debug, info, warn};

use crate::affinity::{pin_to_core, AffinityTable, WorkerCategory};
use crate::error::SchedError;
use crate::jobs::{BackgroundJob, JobQueue};
use crate::worker::{Heartbeat, WorkerDescriptor, WorkerHandle, WorkerPriority, WorkerSnapshot};

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Heartbeat older than this flags the worker unhealthy.
    pub heartbeat_timeout: Duration,
    /// Interval between monitor sweeps.
    pub monitor_interval: Duration,
    /// Background job queue capacity.
    pub job_queue_capacity: usize,
    /// Stack size for spawned workers.
    pub worker_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            heartbeat_timeout: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(1),
            job_queue_capacity: 16,
            worker_stack_size: 256 * 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_job_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = capacity;
        self
    }
}

/// Per-worker context passed into the worker function. The loop should call
/// [`beat`](Self::beat) every iteration and poll
/// [`should_stop`](Self::should_stop) as its run condition.
pub struct WorkerCtx {
    heartbeat: Heartbeat,
    stop: Arc<AtomicBool>,
}

impl WorkerCtx {
    /// Record liveness for this iteration.
    pub fn beat(&self) {
        self.heartbeat.beat();
    }

    /// True once shutdown has been requested.
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// A clonable heartbeat handle, for loops that delegate beating to a
    /// callback.
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }
}

/// Result of one monitor sweep, kept for the observability sink.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub taken_at: Instant,
    pub workers: Vec<WorkerSnapshot>,
    /// Process physical memory in bytes, when the platform reports it.
    pub physical_memory: Option<usize>,
    pub queued_jobs: usize,
}

/// Creates workers pinned per the affinity table, tracks their heartbeats,
/// and drains the background job queue.
///
/// Constructed once at device start and shared by `Arc`; all worker loops
/// receive their [`WorkerCtx`] from it. The monitor only ever flags a stale
/// worker, it never terminates one.
pub struct Scheduler {
    config: SchedulerConfig,
    affinity: AffinityTable,
    registry: Mutex<Vec<Arc<WorkerDescriptor>>>,
    handles: Mutex<Vec<WorkerHandle>>,
    stop: Arc<AtomicBool>,
    stop_signal: SignalFlag,
    jobs: JobQueue,
    latest_report: Mutex<Option<MonitorReport>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, affinity: AffinityTable) -> Arc<Self> {
        let jobs = JobQueue::new(config.job_queue_capacity);
        Arc::new(Scheduler {
            config,
            affinity,
            registry: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            stop_signal: SignalFlag::new(),
            jobs,
            latest_report: Mutex::new(None),
        })
    }

    /// Spawn a worker. The thread is named, pinned per the affinity table
    /// (unpinned if the table has no core for its category), and registered
    /// for heartbeat monitoring.
    pub fn spawn(
        &self,
        name: &str,
        category: WorkerCategory,
        priority: WorkerPriority,
        worker_fn: impl FnOnce(WorkerCtx) + Send + 'static,
    ) -> Result<Arc<WorkerDescriptor>, SchedError> {
        let core = self.affinity.core_for(category);
        let descriptor = WorkerDescriptor::new(
            name.to_string(),
            category,
            priority,
            core,
            self.config.worker_stack_size,
        );
        let ctx = WorkerCtx {
            heartbeat: Heartbeat::new(Arc::clone(&descriptor)),
            stop: Arc::clone(&self.stop),
        };

        let thread_descriptor = Arc::clone(&descriptor);
        let thread = thread::Builder::new()
            .name(format!("tmx-{name}"))
            .stack_size(self.config.worker_stack_size)
            .spawn(move || {
                let stack_base = 0u8;
                thread_descriptor.record_stack_base(&stack_base as *const u8 as usize);
                if let Some(core_id) = core {
                    if !pin_to_core(core_id) {
                        warn!(worker = thread_descriptor.name(), core_id, "core pinning failed");
                    }
                }
                debug!(
                    worker = thread_descriptor.name(),
                    category = thread_descriptor.category().as_str(),
                    ?core,
                    "worker started"
                );
                worker_fn(ctx);
                debug!(worker = thread_descriptor.name(), "worker exited");
            })
            .map_err(|source| SchedError::SpawnFailed {
                name: name.to_string(),
                source,
            })?;

        self.registry.lock().push(Arc::clone(&descriptor));
        self.handles.lock().push(WorkerHandle {
            descriptor: Arc::clone(&descriptor),
            thread: Some(thread),
        });
        Ok(descriptor)
    }

    /// Submit a fire-and-forget job. Fails fast with
    /// [`SchedError::QueueFull`] instead of blocking.
    pub fn submit(&self, job: BackgroundJob) -> Result<(), SchedError> {
        self.jobs.submit(job)
    }

    /// Spawn the monitor and job-drainer service workers.
    pub fn start_services(self: &Arc<Self>) -> Result<(), SchedError> {
        let monitor = Arc::clone(self);
        let interval = self.config.monitor_interval;
        self.spawn(
            "monitor",
            WorkerCategory::Background,
            WorkerPriority::Low,
            move |ctx| {
                while !ctx.should_stop() {
                    ctx.beat();
                    monitor.sweep();
                    // Shutdown raises the signal, ending the wait early.
                    if monitor.stop_signal.wait_timeout(interval) {
                        break;
                    }
                }
            },
        )?;

        let job_rx = self.jobs.receiver();
        self.spawn(
            "job-drainer",
            WorkerCategory::Background,
            WorkerPriority::Low,
            move |ctx| loop {
                ctx.beat();
                if ctx.should_stop() {
                    break;
                }
                match job_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(job) => job.run(),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            },
        )?;
        Ok(())
    }

    /// One monitor pass over the worker registry: refresh gauges, flag
    /// workers with stale heartbeats, clear flags when beats resume.
    pub(crate) fn sweep(&self) {
        let registry = self.registry.lock();
        let mut workers = Vec::with_capacity(registry.len());
        for descriptor in registry.iter() {
            let age = descriptor.heartbeat_age();
            gauge!(
                metric_defs::WORKER_HEARTBEAT_AGE.name,
                "worker" => descriptor.name().to_string()
            )
            .set(age.as_secs_f64() * 1000.0);

            if age > self.config.heartbeat_timeout {
                if let Some(failures) = descriptor.flag_unhealthy() {
                    warn!(
                        worker = descriptor.name(),
                        age_ms = age.as_millis() as u64,
                        failures,
                        "worker heartbeat stale, flagged unhealthy"
                    );
                    counter!(
                        metric_defs::WORKER_FLAGGED.name,
                        "worker" => descriptor.name().to_string()
                    )
                    .increment(1);
                }
            } else if descriptor.clear_flag() {
                info!(worker = descriptor.name(), "worker heartbeat resumed");
            }
            workers.push(descriptor.snapshot());
        }
        drop(registry);

        let report = MonitorReport {
            taken_at: Instant::now(),
            workers,
            physical_memory: memory_stats::memory_stats().map(|stats| stats.physical_mem),
            queued_jobs: self.jobs.len(),
        };
        *self.latest_report.lock() = Some(report);
    }

    /// The most recent monitor report, if a sweep has run.
    pub fn latest_report(&self) -> Option<MonitorReport> {
        self.latest_report.lock().clone()
    }

    /// Snapshots of every registered worker.
    pub fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.registry.lock().iter().map(|d| d.snapshot()).collect()
    }

    /// True once shutdown has been requested.
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Request all workers to stop and join them. Idempotent.
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::Relaxed) {
            return;
        }
        self.stop_signal.raise();
        info!("scheduler shutting down");
        let mut handles = self.handles.lock();
        for handle in handles.iter_mut() {
            handle.join();
        }
        info!(workers = handles.len(), "all workers joined");
    }
}
