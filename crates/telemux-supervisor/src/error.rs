//! Subsystem error type.

use thiserror::Error;

/// Errors returned by subsystem drivers.
#[derive(Error, Debug)]
pub enum SubsystemError {
    /// A bring-up, probe, or recovery step failed.
    #[error("subsystem unhealthy: {0}")]
    Unhealthy(String),

    /// The routine observed its slot moved out from under it and aborted
    /// before committing side effects.
    #[error("recovery abandoned by supervisor")]
    Abandoned,
}
