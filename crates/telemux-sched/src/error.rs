use thiserror::Error;

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedError {
    /// The background job queue is at capacity. Submission fails fast
    /// instead of blocking the submitter.
    #[error("background job queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The OS refused to create the worker thread.
    #[error("failed to spawn worker '{name}': {source}")]
    SpawnFailed {
        /// Worker name as passed to `spawn`.
        name: String,
        #[source]
        source: std::io::Error,
    },
}
