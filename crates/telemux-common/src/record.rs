//! Classified transport records.

use std::time::Instant;

/// The type tag assigned to each delimited record read from the modem.
///
/// Classification is total: every record gets exactly one kind, with
/// [`RecordKind::Unclassified`] as the default rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// An information line belonging to a command exchange (e.g. `+CREG: 0,1`).
    ControlResponse,
    /// A terminal status token ending a command exchange (e.g. `OK`, `ERROR`).
    ControlStatus,
    /// A position sentence from the satnav side of the modem (e.g. `$GPRMC,...`).
    PositionSentence,
    /// Anything else: command echo, boot chatter, unsolicited noise.
    Unclassified,
}

impl RecordKind {
    /// Lowercase name for metric labels and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ControlResponse => "control_response",
            RecordKind::ControlStatus => "control_status",
            RecordKind::PositionSentence => "position_sentence",
            RecordKind::Unclassified => "unclassified",
        }
    }
}

/// One delimited unit of classified modem output.
///
/// Produced once by the classifier, owned by a ring channel until consumed,
/// then moved to the reader. Immutable after creation.
#[derive(Debug, Clone)]
pub struct TransportRecord {
    /// Classification of this record.
    pub kind: RecordKind,
    /// Record payload with the line delimiter stripped.
    pub payload: Vec<u8>,
    /// When the record's delimiter was seen.
    pub received_at: Instant,
}

impl TransportRecord {
    /// Create a record stamped with the current time.
    pub fn new(kind: RecordKind, payload: Vec<u8>) -> Self {
        TransportRecord {
            kind,
            payload,
            received_at: Instant::now(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_labels() {
        assert_eq!(RecordKind::PositionSentence.as_str(), "position_sentence");
        assert_eq!(RecordKind::Unclassified.as_str(), "unclassified");
    }

    #[test]
    fn test_record_text_lossy() {
        let record = TransportRecord::new(RecordKind::Unclassified, vec![b'O', b'K', 0xFF]);
        assert!(record.text().starts_with("OK"));
    }
}
