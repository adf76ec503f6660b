//! Transport multiplexing over the single modem serial link.
//!
//! One half-duplex serial link has to behave like three independent logical
//! channels: command/response control traffic, a framed messaging session
//! (also carried as commands), and a continuous stream of position sentences.
//! This crate provides the three pieces that make that work:
//!
//! - [`ring`]: fixed-capacity record queues with a non-blocking producer and
//!   a blocking-with-timeout consumer, one per logical stream.
//! - [`classifier`]: the single reader of raw transport bytes; segments them
//!   into delimited records, tags each with a [`RecordKind`], and routes it
//!   to the matching ring channel.
//! - [`arbiter`]: the single writer; serializes concurrent command/response
//!   exchanges so that at most one command is ever in flight.
//!
//! Ownership of the physical link is split strictly by direction: the
//! classifier's reader loop owns the read half, the arbiter owns the write
//! half. Nothing else touches the transport.
//!
//! [`RecordKind`]: telemux_common::RecordKind

pub mod arbiter;
pub mod classifier;
pub mod ring;

mod error;

pub use arbiter::{ArbiterConfig, ArbiterSnapshot, CommandArbiter};
pub use classifier::{ClassifierConfig, ClassifierSnapshot, StreamClassifier};
pub use error::ArbiterError;
pub use ring::{ring_channel, RingConsumer, RingProducer, RingRecvError, RingSendError};
