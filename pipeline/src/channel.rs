//! Bounded channels with force-put (drop-head-on-full) semantics, used at
//! the pipeline's fan-out points: distributor → marker/detector, marker →
//! render/record. Normal `put`-with-timeout is used for control/request
//! channels so backpressure stays visible there.
//!
//! Grounded on `secluso-motion-ai`'s bounded `flume`/`crossbeam_channel`
//! queues (`pipeline/src/frame.rs`'s `SAVE_IMAGES` worker channel,
//! `pipeline/src/logic/telemetry.rs`'s `crossbeam_channel::bounded`), wrapped
//! here with a "non-blocking receive then enqueue" force-put policy.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// A bounded MPSC channel. `force_put` is ONLY safe at fan-out points where
/// dropping the oldest queued element is acceptable; control/request
/// channels must use `put` instead.
#[derive(Clone)]
pub struct BoundedChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> BoundedChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        BoundedChannel { tx, rx }
    }

    /// Enqueues `item` on full by first discarding the oldest element
    /// ("force-put"). Readers always observe the freshest suffix of the
    /// producer's output. Never blocks.
    pub fn force_put(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                // Drop the oldest queued element, then retry once. Another
                // producer could race us for the freed slot; on a second
                // full we simply drop `item` rather than spin, since this is
                // an intentionally lossy fan-out point.
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(item);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Normal bounded put with a timeout; backpressure is visible to the
    /// caller via `Err`. Used for control/request channels.
    pub fn put(&self, item: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.tx.send_timeout(item, timeout)
    }

    /// Blocking get with a timeout (the default is 0.5s).
    pub fn get(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Non-blocking latest-value dequeue, used by the camera stage's
    /// `read_latest`: drains to the newest element and returns it.
    pub fn read_latest(&self) -> Option<T> {
        let mut latest = self.rx.try_recv().ok();
        while let Ok(item) = self.rx.try_recv() {
            latest = Some(item);
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_put_drops_oldest_on_full() {
        let chan: BoundedChannel<i32> = BoundedChannel::new(2);
        chan.force_put(1);
        chan.force_put(2);
        chan.force_put(3); // queue full at {1,2}; drops 1, keeps {2,3}
        let mut seen = Vec::new();
        while let Ok(v) = chan.get(Duration::from_millis(10)) {
            seen.push(v);
        }
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn read_latest_drains_to_newest() {
        let chan: BoundedChannel<i32> = BoundedChannel::new(5);
        for v in 0..4 {
            chan.put(v, Duration::from_millis(10)).unwrap();
        }
        assert_eq!(chan.read_latest(), Some(3));
        assert_eq!(chan.read_latest(), None);
    }

    #[test]
    fn put_times_out_when_full_and_no_reader() {
        let chan: BoundedChannel<i32> = BoundedChannel::new(1);
        chan.put(1, Duration::from_millis(10)).unwrap();
        let err = chan.put(2, Duration::from_millis(10));
        assert!(err.is_err());
    }
}
