//! Shared test harness: a scripted mock modem and a stub position parser.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use telemux_common::{TransportError, TransportReader, TransportWriter, TransportRecord};
use telemux_firmware::{DeviceConfig, FixStatus, PositionSink};
use telemux_supervisor::{SubsystemConfig, SupervisorConfig};

/// A GPRMC sentence with status `A` (valid fix).
pub const GPRMC_FIX: &str =
    "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

struct ModemShared {
    feed_tx: Sender<Vec<u8>>,
    written: Mutex<Vec<String>>,
    /// Command-prefix rules, first match wins. Commands with no matching
    /// rule get a plain `OK`.
    rules: Mutex<Vec<(String, String)>>,
}

/// Test-side handle to the scripted modem.
pub struct ModemHandle {
    shared: Arc<ModemShared>,
}

impl ModemHandle {
    /// Inject unsolicited output (e.g. a position sentence).
    pub fn feed_line(&self, line: &str) {
        let _ = self.shared.feed_tx.send(format!("{line}\r\n").into_bytes());
    }

    /// Override the response for commands starting with `prefix`.
    pub fn set_rule(&self, prefix: &str, response: &str) {
        let mut rules = self.shared.rules.lock();
        rules.retain(|(p, _)| p != prefix);
        rules.insert(0, (prefix.to_string(), response.to_string()));
    }

    /// Every command written so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.written.lock().clone()
    }
}

/// Read half handed to the classifier reader worker.
pub struct ModemReader {
    feed_rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl TransportReader for ModemReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            match self.feed_rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            // Queue is non-empty for the first n pops by construction.
            *slot = self.pending.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

/// Write half handed to the command arbiter. Responds synchronously per
/// the rule table (echo suppressed, as with `ATE0`).
pub struct ModemWriter {
    shared: Arc<ModemShared>,
}

impl TransportWriter for ModemWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let command = String::from_utf8_lossy(data).trim().to_string();
        if command.is_empty() {
            return Ok(());
        }
        let response = {
            let rules = self.shared.rules.lock();
            rules
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| "OK\r\n".to_string())
        };
        self.shared.written.lock().push(command);
        let _ = self.shared.feed_tx.send(response.into_bytes());
        Ok(())
    }
}

fn default_rules() -> Vec<(String, String)> {
    [
        ("AT+CREG?", "+CREG: 0,1\r\nOK\r\n"),
        ("AT+QMTCONN?", "+QMTCONN: 0,3\r\nOK\r\n"),
        ("AT+QMTCONN=0", "+QMTCONN: 0,0,0\r\nOK\r\n"),
        ("AT+QMTOPEN=0", "+QMTOPEN: 0,0\r\nOK\r\n"),
    ]
    .into_iter()
    .map(|(p, r)| (p.to_string(), r.to_string()))
    .collect()
}

/// Install a subscriber routing worker logs to the test harness. The first
/// caller wins; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A scripted modem whose bring-up succeeds out of the box.
pub fn scripted_modem() -> (ModemHandle, Box<ModemReader>, Box<ModemWriter>) {
    init_tracing();
    let (feed_tx, feed_rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(ModemShared {
        feed_tx,
        written: Mutex::new(Vec::new()),
        rules: Mutex::new(default_rules()),
    });
    (
        ModemHandle {
            shared: Arc::clone(&shared),
        },
        Box::new(ModemReader {
            feed_rx,
            pending: VecDeque::new(),
        }),
        Box::new(ModemWriter { shared }),
    )
}

/// Parser stub: a GPRMC status field of `A` counts as a valid fix.
pub struct StubSink;

impl PositionSink for StubSink {
    fn accept(&mut self, record: &TransportRecord) -> FixStatus {
        if record.text().contains(",A,") {
            FixStatus::Valid
        } else {
            FixStatus::NoFix
        }
    }
}

/// Device configuration with probe intervals fast enough for tests.
pub fn fast_config() -> DeviceConfig {
    let probe = Duration::from_millis(50);
    let mut config = DeviceConfig::default().with_command_timeout(Duration::from_millis(500));
    config.supervisor = SupervisorConfig {
        network: SubsystemConfig::default().with_probe_interval(probe),
        position: SubsystemConfig::default().with_probe_interval(probe),
        messaging: SubsystemConfig::default().with_probe_interval(probe),
    };
    config
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}
