//! Task scheduler and heartbeat monitor for the tracker firmware.
//!
//! All of the device's concurrent loops (classifier reader, record readers,
//! connection supervisor, maintenance drainer) run as named worker threads
//! created here. The scheduler pins each worker to one of two cores by a
//! static category table, tracks a per-worker heartbeat and stack-headroom
//! estimate, and sweeps the registry periodically: a worker whose heartbeat
//! goes stale is flagged unhealthy for the host to act on, never killed.
//!
//! A bounded background-job queue accepts fire-and-forget closures for
//! infrequent maintenance work; a full queue rejects the submission rather
//! than blocking the submitter.

mod affinity;
mod error;
mod jobs;
mod scheduler;
mod worker;

pub use affinity::{AffinityTable, WorkerCategory};
pub use error::SchedError;
pub use jobs::BackgroundJob;
pub use scheduler::{MonitorReport, Scheduler, SchedulerConfig, WorkerCtx};
pub use worker::{Heartbeat, WorkerDescriptor, WorkerPriority, WorkerSnapshot};
