//! Connection supervisor for the tracker's three modem subsystems.
//!
//! The device depends on three independently stateful subsystems sharing one
//! modem: network attach, position-fix acquisition, and the messaging
//! session. This crate sequences their bring-up, probes their health on a
//! per-subsystem schedule, and heals them with a two-tier recovery policy,
//! without letting one subsystem's failure disturb another's traffic.
//!
//! ## State machine
//!
//! Each subsystem moves through
//! `Disconnected → Connecting → Connected`, with `Degraded`/`Recovering`
//! reachable from `Connected` on probe failure and
//! `Recovering → Connected | Disconnected` as recovery outcomes. Only the
//! supervisor's startup and recovery paths may move a subsystem to
//! `Connected`.
//!
//! ## Dependencies between subsystems
//!
//! Messaging may only leave `Disconnected` once network is `Connected`
//! (hard dependency). Position has no hard dependency and may remain
//! `Connecting` (searching for a fix) indefinitely; that is steady state,
//! not a fault, and it never blocks the others.
//!
//! ## Recovery tiers
//!
//! A subsystem that was healthy recently gets a lightweight reconnect; one
//! with no recent healthy history gets a full teardown-and-reinitialize.
//! Full reinitialization costs seconds, so it is reserved for the cases
//! where a plain reconnect cannot help. The threshold is configuration, not
//! a constant.

mod config;
mod error;
mod policy;
mod subsystem;
mod supervisor;

pub use config::{SubsystemConfig, SupervisorConfig};
pub use error::SubsystemError;
pub use policy::{select_tier, RecoveryPolicy, RecoveryTier};
pub use subsystem::{
    ProbeOutcome, RecoveryCtx, SubsystemDriver, SubsystemId, SubsystemSlot, SubsystemState,
    SubsystemStatus,
};
pub use supervisor::{
    DriverSet, Supervisor, SupervisorCommand, SupervisorHandle, SupervisorSnapshot,
};
