//! Firmware core for a battery-powered tracking device.
//!
//! The device has exactly one half-duplex serial link to a combined
//! cellular/satnav modem, yet carries three logical protocols over it:
//! command/response control traffic, a framed messaging session, and a
//! continuous stream of position sentences. This crate wires the pieces
//! that make the single link behave like independent channels:
//!
//! - the stream classifier, sole reader of raw bytes, routing delimited
//!   records into per-kind ring channels (`telemux-transport`)
//! - the command arbiter, sole writer, serializing every command/response
//!   exchange (`telemux-transport`)
//! - the connection supervisor sequencing and healing the network,
//!   position, and messaging subsystems (`telemux-supervisor`)
//! - the task scheduler hosting everything as pinned, heartbeat-monitored
//!   workers (`telemux-sched`)
//!
//! [`Device::start`] takes the transport halves and an external position
//! parser and returns a running core; collaborators reach the modem only
//! through the arbiter.

mod config;
mod device;
mod drivers;
mod position;

pub use config::DeviceConfig;
pub use device::{Device, DeviceSnapshot};
pub use drivers::{MessagingDriver, NetworkDriver, PositionDriver};
pub use position::{FixStatus, PositionShared, PositionSink};
