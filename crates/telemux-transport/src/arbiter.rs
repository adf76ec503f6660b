//! Command arbiter: serialized command/response exchanges over the shared
//! write path.
//!
//! Many workers (network attach, messaging session, maintenance jobs) need to
//! run command/response exchanges against the modem, but the link carries no
//! multiplexing of its own. The arbiter's mutex *is* the multiplexing
//! discipline: exactly one pending command ever owns the write half and the
//! control ring consumer, for the full duration of its exchange.
//!
//! Correlation is textual: response records are accumulated until the
//! caller's expected marker appears, a terminal failure token appears, or
//! the deadline passes. Responses that straggle in after a timeout are
//! drained and discarded at the start of the next exchange so they can never
//! corrupt another command's correlation.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use telemux_common::{RecordKind, TransportRecord, TransportWriter};
use telemux_metrics::metric_defs;
use tracing::{debug, trace};

use crate::error::ArbiterError;
use crate::ring::{RingConsumer, RingRecvError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Terminal token completing an exchange successfully when the caller gave
/// no expected marker.
const SUCCESS_TOKEN: &str = "OK";

/// Terminal tokens completing an exchange as a failure.
const FAILURE_TOKENS: &[&str] = &["ERROR", "BUSY", "NO CARRIER", "NO DIALTONE"];
const FAILURE_PREFIXES: &[&str] = &["+CME ERROR:", "+CMS ERROR:"];

/// Configuration for the command arbiter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// How long a blocking `send` waits for the in-flight command to finish
    /// before failing with `Busy`.
    pub lock_wait: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        ArbiterConfig {
            lock_wait: Duration::from_secs(2),
        }
    }
}

impl ArbiterConfig {
    /// Set the bounded lock wait.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }
}

/// Snapshot of arbiter counters for the observability sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArbiterSnapshot {
    /// Exchanges completed successfully.
    pub completed: u64,
    /// Exchanges that timed out.
    pub timeouts: u64,
    /// Send attempts rejected while another command was in flight.
    pub busy_rejections: u64,
    /// Exchanges ended by a terminal failure token.
    pub failures: u64,
}

#[derive(Default)]
struct ArbiterCounters {
    completed: AtomicU64,
    timeouts: AtomicU64,
    busy_rejections: AtomicU64,
    failures: AtomicU64,
}

/// State owned by whichever caller currently holds the exchange lock.
struct ArbiterInner {
    writer: Box<dyn TransportWriter>,
    control_rx: RingConsumer<TransportRecord>,
}

/// Serializes command/response exchanges over the transport write half.
///
/// Shared by handle (`Arc<CommandArbiter>`); `send` may be called from any
/// worker concurrently.
pub struct CommandArbiter {
    inner: Mutex<ArbiterInner>,
    config: ArbiterConfig,
    counters: Arc<ArbiterCounters>,
}

impl CommandArbiter {
    /// Create an arbiter owning the transport write half and the control ring
    /// consumer.
    pub fn new(
        writer: Box<dyn TransportWriter>,
        control_rx: RingConsumer<TransportRecord>,
        config: ArbiterConfig,
    ) -> Self {
        CommandArbiter {
            inner: Mutex::new(ArbiterInner { writer, control_rx }),
            config,
            counters: Arc::new(ArbiterCounters::default()),
        }
    }

    /// Run one command/response exchange, blocking up to the configured lock
    /// wait for any in-flight command to finish first.
    ///
    /// Completes when `expected_marker` (or `OK` if none was given) appears
    /// in the accumulated response text, a terminal failure token arrives, or
    /// `timeout` elapses. The arbiter never retries on the caller's behalf.
    pub fn send(
        &self,
        command: &str,
        expected_marker: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ArbiterError> {
        let Some(mut inner) = self.inner.try_lock_for(self.config.lock_wait) else {
            return Err(self.reject_busy(command));
        };
        self.exchange(&mut inner, command, expected_marker, timeout)
    }

    /// Like [`send`](Self::send), but fails fast with `Busy` instead of
    /// waiting for the lock.
    pub fn try_send(
        &self,
        command: &str,
        expected_marker: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ArbiterError> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Err(self.reject_busy(command));
        };
        self.exchange(&mut inner, command, expected_marker, timeout)
    }

    fn reject_busy(&self, command: &str) -> ArbiterError {
        debug!(command, "rejecting send: command in flight");
        self.counters.busy_rejections.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::COMMANDS_BUSY.name).increment(1);
        ArbiterError::Busy
    }

    fn exchange(
        &self,
        inner: &mut ArbiterInner,
        command: &str,
        expected_marker: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ArbiterError> {
        // Discard anything left over from a previous timed-out exchange so it
        // cannot satisfy this command's marker.
        let mut stale = 0u32;
        while inner.control_rx.try_recv().is_some() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, command, "drained stale control records");
        }

        let started = Instant::now();
        inner.writer.write(command.as_bytes())?;
        inner.writer.write(b"\r\n")?;
        trace!(command, "command written");

        let deadline = started + timeout;
        let mut response = String::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(metric_defs::COMMAND_TIMEOUTS.name).increment(1);
                return Err(ArbiterError::Timeout {
                    command: command.to_string(),
                });
            }

            let record = match inner.control_rx.recv_timeout(deadline - now) {
                Ok(record) => record,
                Err(RingRecvError::Timeout) => continue,
                Err(RingRecvError::Disconnected) => return Err(ArbiterError::ChannelClosed),
            };

            let line = record.text();
            // The modem echoes the command; the echo must not be able to
            // satisfy a marker that happens to be a substring of the command.
            if line == command {
                continue;
            }
            if !response.is_empty() {
                response.push('\n');
            }
            response.push_str(&line);

            if record.kind == RecordKind::ControlStatus && is_failure_token(&line) {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return Err(ArbiterError::CommandFailed { response });
            }

            let done = match expected_marker {
                Some(marker) => response.contains(marker),
                None => record.kind == RecordKind::ControlStatus && line == SUCCESS_TOKEN,
            };
            if done {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(metric_defs::COMMANDS_OK.name).increment(1);
                metrics::histogram!(metric_defs::COMMAND_LATENCY.name)
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                return Ok(response);
            }
        }
    }

    /// Counter snapshot for the observability sink.
    pub fn snapshot(&self) -> ArbiterSnapshot {
        ArbiterSnapshot {
            completed: self.counters.completed.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            busy_rejections: self.counters.busy_rejections.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

fn is_failure_token(line: &str) -> bool {
    FAILURE_TOKENS.contains(&line) || FAILURE_PREFIXES.iter().any(|p| line.starts_with(p))
}
