//! Bounded fire-and-forget job queue for infrequent maintenance work.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use metrics::counter;
use telemux_metrics::metric_defs;
use tracing::{debug, warn};

use crate::error::SchedError;

/// One queued unit of background work.
pub struct BackgroundJob {
    description: &'static str,
    action: Box<dyn FnOnce() + Send>,
}

impl BackgroundJob {
    pub fn new(description: &'static str, action: impl FnOnce() + Send + 'static) -> Self {
        BackgroundJob {
            description,
            action: Box::new(action),
        }
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub(crate) fn run(self) {
        debug!(job = self.description, "running background job");
        (self.action)();
        counter!(metric_defs::JOBS_EXECUTED.name).increment(1);
    }
}

/// Bounded queue. Submission never blocks; a full queue rejects the job so
/// the submitter keeps its latency budget.
pub(crate) struct JobQueue {
    tx: Sender<BackgroundJob>,
    rx: Receiver<BackgroundJob>,
    capacity: usize,
}

impl JobQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        JobQueue { tx, rx, capacity }
    }

    pub(crate) fn submit(&self, job: BackgroundJob) -> Result<(), SchedError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                warn!(job = job.description(), "background job rejected, queue full");
                counter!(metric_defs::JOBS_REJECTED.name).increment(1);
                Err(SchedError::QueueFull {
                    capacity: self.capacity,
                })
            }
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<BackgroundJob> {
        self.rx.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}
