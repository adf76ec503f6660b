//! Per-worker bookkeeping: descriptors, heartbeats, and stack headroom.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use metrics::gauge;
use parking_lot::Mutex;
use telemux_metrics::metric_defs;

use crate::affinity::WorkerCategory;

/// Worker priority, recorded for observability. The scheduler does not
/// adjust OS scheduling priority; placement on the protocol core is how
/// latency-sensitive workers are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPriority {
    High,
    Normal,
    Low,
}

impl WorkerPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPriority::High => "high",
            WorkerPriority::Normal => "normal",
            WorkerPriority::Low => "low",
        }
    }
}

/// Long-lived registry entry for one worker. Created at spawn, updated by
/// the worker's own heartbeats, read by the monitor sweep. Never removed
/// while the scheduler runs.
pub struct WorkerDescriptor {
    name: String,
    category: WorkerCategory,
    priority: WorkerPriority,
    pinned_core: Option<usize>,
    stack_size: usize,
    last_heartbeat: Mutex<Instant>,
    /// Address near the base of the worker's stack, recorded on entry.
    stack_base: AtomicUsize,
    /// Estimated unused stack, updated on each heartbeat.
    stack_headroom: AtomicUsize,
    failures: AtomicU32,
    flagged: AtomicBool,
}

impl WorkerDescriptor {
    pub(crate) fn new(
        name: String,
        category: WorkerCategory,
        priority: WorkerPriority,
        pinned_core: Option<usize>,
        stack_size: usize,
    ) -> Arc<Self> {
        Arc::new(WorkerDescriptor {
            name,
            category,
            priority,
            pinned_core,
            stack_size,
            last_heartbeat: Mutex::new(Instant::now()),
            stack_base: AtomicUsize::new(0),
            stack_headroom: AtomicUsize::new(stack_size),
            failures: AtomicU32::new(0),
            flagged: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> WorkerCategory {
        self.category
    }

    pub fn priority(&self) -> WorkerPriority {
        self.priority
    }

    /// Age of the most recent heartbeat.
    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Estimated unused stack in bytes as of the last heartbeat.
    pub fn stack_headroom(&self) -> usize {
        self.stack_headroom.load(Ordering::Relaxed)
    }

    /// Times the monitor has flagged this worker unhealthy.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Whether the worker is currently flagged unhealthy.
    pub fn is_flagged(&self) -> bool {
        self.flagged.load(Ordering::Relaxed)
    }

    pub(crate) fn record_stack_base(&self, addr: usize) {
        self.stack_base.store(addr, Ordering::Relaxed);
    }

    /// Flag the worker unhealthy. Returns the updated failure count, or
    /// `None` if it was already flagged (one flag per stale episode).
    pub(crate) fn flag_unhealthy(&self) -> Option<u32> {
        if self.flagged.swap(true, Ordering::Relaxed) {
            return None;
        }
        Some(self.failures.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Clear the unhealthy flag once heartbeats resume.
    pub(crate) fn clear_flag(&self) -> bool {
        self.flagged.swap(false, Ordering::Relaxed)
    }

    fn beat_at(&self, stack_addr: usize) {
        *self.last_heartbeat.lock() = Instant::now();
        let base = self.stack_base.load(Ordering::Relaxed);
        if base != 0 {
            let used = base.abs_diff(stack_addr);
            let headroom = self.stack_size.saturating_sub(used);
            self.stack_headroom.store(headroom, Ordering::Relaxed);
            gauge!(metric_defs::WORKER_STACK_HEADROOM.name, "worker" => self.name.clone())
                .set(headroom as f64);
        }
    }

    /// Point-in-time copy for the observability sink.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.name.clone(),
            category: self.category,
            priority: self.priority,
            pinned_core: self.pinned_core,
            heartbeat_age: self.heartbeat_age(),
            stack_headroom: self.stack_headroom(),
            failures: self.failures(),
            flagged: self.is_flagged(),
        }
    }
}

/// Heartbeat handle held inside a worker loop; call [`beat`](Self::beat)
/// once per iteration.
#[derive(Clone)]
pub struct Heartbeat {
    descriptor: Arc<WorkerDescriptor>,
}

impl Heartbeat {
    pub(crate) fn new(descriptor: Arc<WorkerDescriptor>) -> Self {
        Heartbeat { descriptor }
    }

    /// Record liveness and refresh the stack-headroom estimate from the
    /// current stack depth.
    pub fn beat(&self) {
        let probe = 0u8;
        self.descriptor.beat_at(&probe as *const u8 as usize);
    }
}

/// Copy of one worker's registry entry.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub name: String,
    pub category: WorkerCategory,
    pub priority: WorkerPriority,
    pub pinned_core: Option<usize>,
    pub heartbeat_age: Duration,
    pub stack_headroom: usize,
    pub failures: u32,
    pub flagged: bool,
}

/// Join handle plus descriptor for a spawned worker.
pub struct WorkerHandle {
    pub(crate) descriptor: Arc<WorkerDescriptor>,
    pub(crate) thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn descriptor(&self) -> &Arc<WorkerDescriptor> {
        &self.descriptor
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
