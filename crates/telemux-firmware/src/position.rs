//! Position-stream glue: the external parser boundary and the shared
//! freshness state the position driver probes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use telemux_common::{SignalFlag, TransportRecord};

/// What the external sentence parser made of one position record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    /// A valid fix (coordinates usable).
    Valid,
    /// Sentence parsed but no fix yet (still searching).
    NoFix,
}

/// Consumer of classified position sentences.
///
/// Sentence-level parsing is the collaborator's job; the core only needs to
/// know whether the sentence carried a valid fix.
pub trait PositionSink: Send {
    fn accept(&mut self, record: &TransportRecord) -> FixStatus;
}

/// Freshness state shared between the position reader worker (writer) and
/// the position subsystem driver (reader).
pub struct PositionShared {
    last_sentence_at: Mutex<Option<Instant>>,
    fix_acquired: SignalFlag,
}

impl PositionShared {
    pub(crate) fn new(fix_acquired: SignalFlag) -> Arc<Self> {
        Arc::new(PositionShared {
            last_sentence_at: Mutex::new(None),
            fix_acquired,
        })
    }

    pub(crate) fn note_sentence(&self) {
        *self.last_sentence_at.lock() = Some(Instant::now());
    }

    pub(crate) fn set_fix(&self, status: FixStatus) {
        match status {
            FixStatus::Valid => self.fix_acquired.raise(),
            FixStatus::NoFix => self.fix_acquired.clear(),
        }
    }

    /// True while the parser reports a valid fix.
    pub fn has_fix(&self) -> bool {
        self.fix_acquired.is_raised()
    }

    /// True when a sentence arrived within `stale_after`.
    pub fn stream_fresh(&self, stale_after: Duration) -> bool {
        self.last_sentence_at
            .lock()
            .is_some_and(|at| at.elapsed() < stale_after)
    }

    /// True once any sentence has ever arrived.
    pub fn stream_seen(&self) -> bool {
        self.last_sentence_at.lock().is_some()
    }
}
