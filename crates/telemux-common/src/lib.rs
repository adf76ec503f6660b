//! Common types and traits shared across the telemux firmware core.
//!
//! The device has exactly one half-duplex serial link to the modem. Everything
//! that crosses a crate boundary in the core is defined here: the transport
//! read/write traits (ownership of the physical link is split strictly by
//! direction), the classified record type that flows through the ring
//! channels, and the condition flags workers wait on instead of polling.

mod record;
mod signal;
mod transport;

pub use record::*;
pub use signal::*;
pub use transport::*;
