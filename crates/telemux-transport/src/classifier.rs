//! Byte-stream classifier and router.
//!
//! The classifier is the only reader of raw transport bytes. It accumulates
//! them until a line delimiter (`\n`, with a preceding `\r` stripped)
//! completes a record, classifies the record by inspecting its prefix, and
//! deposits it into the matching ring channel:
//!
//! - `$` or `!` sentinel → position sentence (NMEA-style)
//! - terminal tokens (`OK`, `ERROR`, `+CME ERROR: ...`) → control status
//! - other `+`-prefixed information lines → control response
//! - everything else (command echo, boot chatter) → unclassified
//!
//! Classification is a total function: every record gets exactly one kind,
//! and every record is routed to exactly one channel. Unclassified records
//! go to the control channel, where an in-flight command exchange can
//! observe or drain them (command echo shows up there).
//!
//! The accumulator is size-bounded: a record that exceeds the bound without
//! a delimiter is discarded and counted, so a misbehaving modem can never
//! stall the reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use telemux_common::{RecordKind, TransportRecord};
use telemux_metrics::metric_defs;
use tracing::{debug, warn};

use crate::ring::{RingProducer, RingSendError};

/// Terminal status tokens that end a command exchange.
const STATUS_TOKENS: &[&str] = &["OK", "ERROR", "BUSY", "NO CARRIER", "NO DIALTONE"];

/// Prefixes of extended failure statuses.
const STATUS_PREFIXES: &[&str] = &["+CME ERROR:", "+CMS ERROR:"];

/// Configuration for the stream classifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Maximum bytes buffered while waiting for a delimiter. A record that
    /// grows past this without completing is discarded.
    pub max_record_len: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            max_record_len: 512,
        }
    }
}

impl ClassifierConfig {
    /// Set the maximum buffered record length.
    pub fn with_max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }
}

/// Snapshot of classifier counters for the observability sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifierSnapshot {
    /// Records classified as control responses.
    pub control_responses: u64,
    /// Records classified as control statuses.
    pub control_statuses: u64,
    /// Records classified as position sentences.
    pub position_sentences: u64,
    /// Records that matched no known prefix.
    pub unclassified: u64,
    /// Records discarded for exceeding the accumulator bound.
    pub overflows: u64,
    /// Records dropped on a full control channel.
    pub control_dropped: u64,
    /// Records dropped on a full position channel.
    pub position_dropped: u64,
}

#[derive(Default)]
struct ClassifierCounters {
    control_responses: AtomicU64,
    control_statuses: AtomicU64,
    position_sentences: AtomicU64,
    unclassified: AtomicU64,
    overflows: AtomicU64,
}

/// The byte-stream classifier.
///
/// Owned by the transport reader worker; [`consume`](Self::consume) is
/// called with each chunk of raw bytes as it arrives.
pub struct StreamClassifier {
    config: ClassifierConfig,
    buffer: BytesMut,
    control_tx: RingProducer<TransportRecord>,
    position_tx: RingProducer<TransportRecord>,
    counters: Arc<ClassifierCounters>,
}

impl StreamClassifier {
    /// Create a classifier routing into the given ring channels.
    pub fn new(
        config: ClassifierConfig,
        control_tx: RingProducer<TransportRecord>,
        position_tx: RingProducer<TransportRecord>,
    ) -> Self {
        StreamClassifier {
            buffer: BytesMut::with_capacity(config.max_record_len),
            config,
            control_tx,
            position_tx,
            counters: Arc::new(ClassifierCounters::default()),
        }
    }

    /// Feed raw bytes from the transport.
    ///
    /// Completed records are classified and routed; partial records stay
    /// buffered. Never blocks: full channels drop the record and count it.
    pub fn consume(&mut self, raw: &[u8]) {
        self.buffer.extend_from_slice(raw);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos);
            self.buffer.advance(1); // delimiter
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.is_empty() {
                continue;
            }
            let kind = classify(&line);
            self.route(TransportRecord::new(kind, line.to_vec()));
        }

        // No delimiter in the whole buffer: enforce the size bound so a
        // misbehaving device cannot stall us.
        if self.buffer.len() > self.config.max_record_len {
            warn!(
                buffered = self.buffer.len(),
                max = self.config.max_record_len,
                "discarding undelimited record"
            );
            self.buffer.clear();
            self.counters.overflows.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_defs::CLASSIFIER_OVERFLOWS.name).increment(1);
        }
    }

    fn route(&self, record: TransportRecord) {
        let kind = record.kind;
        let counter = match kind {
            RecordKind::ControlResponse => &self.counters.control_responses,
            RecordKind::ControlStatus => &self.counters.control_statuses,
            RecordKind::PositionSentence => &self.counters.position_sentences,
            RecordKind::Unclassified => &self.counters.unclassified,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::RECORDS_CLASSIFIED.name, "kind" => kind.as_str())
            .increment(1);

        let producer = match kind {
            RecordKind::PositionSentence => &self.position_tx,
            _ => &self.control_tx,
        };
        match producer.try_send(record) {
            Ok(()) => {}
            Err(RingSendError::Full(_)) => {
                debug!(channel = producer.name(), kind = kind.as_str(), "ring full, record dropped");
                metrics::counter!(metric_defs::RECORDS_DROPPED.name, "channel" => producer.name())
                    .increment(1);
            }
            Err(RingSendError::Disconnected(_)) => {
                // Consumer shut down first; nothing left to deliver to.
                debug!(channel = producer.name(), "ring consumer gone");
            }
        }
    }

    /// Counter snapshot for the observability sink.
    pub fn snapshot(&self) -> ClassifierSnapshot {
        ClassifierSnapshot {
            control_responses: self.counters.control_responses.load(Ordering::Relaxed),
            control_statuses: self.counters.control_statuses.load(Ordering::Relaxed),
            position_sentences: self.counters.position_sentences.load(Ordering::Relaxed),
            unclassified: self.counters.unclassified.load(Ordering::Relaxed),
            overflows: self.counters.overflows.load(Ordering::Relaxed),
            control_dropped: self.control_tx.dropped(),
            position_dropped: self.position_tx.dropped(),
        }
    }
}

/// Classify a delimited record by its prefix.
///
/// Total: every input maps to exactly one kind.
pub fn classify(line: &[u8]) -> RecordKind {
    if line.first() == Some(&b'$') || line.first() == Some(&b'!') {
        return RecordKind::PositionSentence;
    }
    if let Ok(text) = std::str::from_utf8(line) {
        let text = text.trim_end();
        if STATUS_TOKENS.contains(&text) || STATUS_PREFIXES.iter().any(|p| text.starts_with(p)) {
            return RecordKind::ControlStatus;
        }
        if text.starts_with('+') {
            return RecordKind::ControlResponse;
        }
    }
    RecordKind::Unclassified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{ring_channel, RingConsumer};

    fn classifier_pair(
        config: ClassifierConfig,
        capacity: usize,
    ) -> (
        StreamClassifier,
        RingConsumer<TransportRecord>,
        RingConsumer<TransportRecord>,
    ) {
        let (control_tx, control_rx) = ring_channel("control", capacity);
        let (position_tx, position_rx) = ring_channel("position", capacity);
        let classifier = StreamClassifier::new(config, control_tx, position_tx);
        (classifier, control_rx, position_rx)
    }

    #[test]
    fn test_classify_is_total() {
        assert_eq!(classify(b"$GPRMC,123519,A"), RecordKind::PositionSentence);
        assert_eq!(classify(b"!AIVDM,1,1"), RecordKind::PositionSentence);
        assert_eq!(classify(b"OK"), RecordKind::ControlStatus);
        assert_eq!(classify(b"ERROR"), RecordKind::ControlStatus);
        assert_eq!(classify(b"NO CARRIER"), RecordKind::ControlStatus);
        assert_eq!(classify(b"+CME ERROR: 30"), RecordKind::ControlStatus);
        assert_eq!(classify(b"+CREG: 0,1"), RecordKind::ControlResponse);
        assert_eq!(classify(b"AT+CREG?"), RecordKind::Unclassified);
        assert_eq!(classify(b""), RecordKind::Unclassified);
        assert_eq!(classify(&[0xFF, 0xFE]), RecordKind::Unclassified);
    }

    #[test]
    fn test_position_then_status_ordering() {
        // Interleaved kinds land in their own channels, in arrival order.
        let (mut classifier, control_rx, position_rx) =
            classifier_pair(ClassifierConfig::default(), 8);

        classifier.consume(b"$GPRMC,123519,A,4807.038,N\r\nOK\r\n");

        let position = position_rx.try_recv().expect("position record");
        assert_eq!(position.kind, RecordKind::PositionSentence);
        assert!(position.text().starts_with("$GPRMC"));

        let status = control_rx.try_recv().expect("control record");
        assert_eq!(status.kind, RecordKind::ControlStatus);
        assert_eq!(status.text(), "OK");

        // Exactly one channel each, nothing duplicated.
        assert!(position_rx.try_recv().is_none());
        assert!(control_rx.try_recv().is_none());
    }

    #[test]
    fn test_partial_records_buffer_across_calls() {
        let (mut classifier, control_rx, position_rx) =
            classifier_pair(ClassifierConfig::default(), 8);

        classifier.consume(b"$GPGGA,1234");
        assert!(position_rx.try_recv().is_none());

        classifier.consume(b"56\r\n+CSQ: 18,0\r");
        let sentence = position_rx.try_recv().expect("completed sentence");
        assert_eq!(sentence.text(), "$GPGGA,123456");
        assert!(control_rx.try_recv().is_none());

        classifier.consume(b"\n");
        let response = control_rx.try_recv().expect("completed response");
        assert_eq!(response.kind, RecordKind::ControlResponse);
        assert_eq!(response.text(), "+CSQ: 18,0");
    }

    #[test]
    fn test_undelimited_record_discarded() {
        let config = ClassifierConfig::default().with_max_record_len(16);
        let (mut classifier, control_rx, position_rx) = classifier_pair(config, 8);

        classifier.consume(&[b'x'; 64]);

        assert!(control_rx.try_recv().is_none());
        assert!(position_rx.try_recv().is_none());
        assert_eq!(classifier.snapshot().overflows, 1);

        // Forward progress after the discard.
        classifier.consume(b"OK\r\n");
        assert_eq!(control_rx.try_recv().expect("status").text(), "OK");
    }

    #[test]
    fn test_full_channel_drops_record() {
        let (mut classifier, control_rx, _position_rx) =
            classifier_pair(ClassifierConfig::default(), 1);

        classifier.consume(b"+CREG: 0,1\r\n+CSQ: 18,0\r\n");

        // First record fit, second was dropped on the full ring.
        assert_eq!(control_rx.try_recv().expect("first").text(), "+CREG: 0,1");
        assert!(control_rx.try_recv().is_none());
        assert_eq!(classifier.snapshot().control_dropped, 1);
    }

    #[test]
    fn test_unclassified_routes_to_control() {
        let (mut classifier, control_rx, position_rx) =
            classifier_pair(ClassifierConfig::default(), 8);

        classifier.consume(b"AT+CGATT=1\r\n");

        let echo = control_rx.try_recv().expect("echo line");
        assert_eq!(echo.kind, RecordKind::Unclassified);
        assert!(position_rx.try_recv().is_none());
    }

    #[test]
    fn test_empty_lines_skipped() {
        let (mut classifier, control_rx, _position_rx) =
            classifier_pair(ClassifierConfig::default(), 8);

        classifier.consume(b"\r\n\r\nOK\r\n");

        assert_eq!(control_rx.try_recv().expect("status").text(), "OK");
        assert!(control_rx.try_recv().is_none());
    }

    #[test]
    fn test_snapshot_counts_by_kind() {
        let (mut classifier, _control_rx, _position_rx) =
            classifier_pair(ClassifierConfig::default(), 8);

        classifier.consume(b"$GPRMC,1\r\n+CREG: 0,1\r\nOK\r\nhello\r\n");

        let snapshot = classifier.snapshot();
        assert_eq!(snapshot.position_sentences, 1);
        assert_eq!(snapshot.control_responses, 1);
        assert_eq!(snapshot.control_statuses, 1);
        assert_eq!(snapshot.unclassified, 1);
        assert_eq!(snapshot.overflows, 0);
    }
}
