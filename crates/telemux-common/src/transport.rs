//! Transport traits for the single shared serial link.
//!
//! The modem link is half-duplex and there is exactly one of it. Ownership is
//! split by direction: the classifier's reader loop holds the only
//! [`TransportReader`], and the command arbiter holds the only
//! [`TransportWriter`] (behind its mutex). No other component touches the
//! link directly.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the transport halves.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying device reported an I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link is gone (modem powered down, handle closed).
    #[error("transport closed")]
    Closed,
}

/// Read half of the serial link.
///
/// `read` blocks for at most `timeout` and returns the number of bytes
/// placed into `buf`. A return of `Ok(0)` means the timeout elapsed with no
/// data, not end-of-stream; end-of-stream is reported as
/// [`TransportError::Closed`].
pub trait TransportReader: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

/// Write half of the serial link.
pub trait TransportWriter: Send {
    /// Write all of `data` to the link.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
}
