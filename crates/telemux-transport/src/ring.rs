//! Fixed-capacity ring channels for classified records.
//!
//! One ring channel exists per logical stream type (control, position). The
//! producer side never blocks: on a full channel the record is dropped and
//! counted, so the classifier always makes forward progress no matter how
//! slow a consumer is. The consumer side blocks with a timeout, never
//! indefinitely, so reader workers periodically reevaluate their run
//! condition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

/// Error from [`RingProducer::try_send`].
#[derive(Debug, PartialEq, Eq)]
pub enum RingSendError<T> {
    /// The channel was at capacity; the value was dropped and counted.
    Full(T),
    /// All consumers are gone.
    Disconnected(T),
}

/// Error from [`RingConsumer::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingRecvError {
    /// No value arrived within the timeout.
    Timeout,
    /// The producer is gone and the channel is drained.
    Disconnected,
}

/// Create a ring channel with the given capacity.
///
/// The name is used in logs when records are dropped on overflow.
pub fn ring_channel<T>(name: &'static str, capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RingProducer {
            name,
            tx,
            dropped: Arc::clone(&dropped),
        },
        RingConsumer { rx, dropped },
    )
}

/// Non-blocking producer half of a ring channel.
pub struct RingProducer<T> {
    name: &'static str,
    tx: Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> RingProducer<T> {
    /// Offer a value without blocking.
    ///
    /// On a full channel the value is returned in [`RingSendError::Full`]
    /// and the drop counter increments; the caller decides whether to log.
    pub fn try_send(&self, value: T) -> Result<(), RingSendError<T>> {
        match self.tx.try_send(value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(value)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RingSendError::Full(value))
            }
            Err(TrySendError::Disconnected(value)) => Err(RingSendError::Disconnected(value)),
        }
    }

    /// Channel name for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of values dropped on overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Blocking-with-timeout consumer half of a ring channel.
pub struct RingConsumer<T> {
    rx: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> RingConsumer<T> {
    /// Wait for the next value, at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RingRecvError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => RingRecvError::Timeout,
            RecvTimeoutError::Disconnected => RingRecvError::Disconnected,
        })
    }

    /// Take the next value if one is already queued.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Number of values currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the channel is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Number of values the producer dropped on overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_send_recv_in_order() {
        let (tx, rx) = ring_channel("test", 8);
        for i in 0..5u32 {
            tx.try_send(i).unwrap();
        }
        for i in 0..5u32 {
            assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Ok(i));
        }
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let (tx, rx) = ring_channel("test", 2);
        tx.try_send(1u32).unwrap();
        tx.try_send(2).unwrap();

        match tx.try_send(3) {
            Err(RingSendError::Full(3)) => {}
            other => panic!("expected Full(3), got {:?}", other),
        }
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.dropped(), 1);

        // Queued values are intact.
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_recv_timeout_elapses() {
        let (_tx, rx) = ring_channel::<u32>("test", 2);
        let start = Instant::now();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(20)),
            Err(RingRecvError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_disconnected_producer() {
        let (tx, rx) = ring_channel("test", 2);
        tx.try_send(7u32).unwrap();
        drop(tx);

        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Ok(7));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RingRecvError::Disconnected)
        );
    }

    #[test]
    fn test_consumer_wakes_on_send() {
        let (tx, rx) = ring_channel("test", 2);
        let handle = thread::spawn(move || rx.recv_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        tx.try_send(42u32).unwrap();
        assert_eq!(handle.join().unwrap(), Ok(42));
    }
}
