//! Time-ordered schedule player.
//!
//! Holds a bounded multiset of future frames and emits each at or after
//! its wall-clock time. The container is a fixed-capacity vector kept
//! sorted by insertion -- zero allocation, which matters more on a
//! long-uptime device than the O(n) shift, since ingress runs at ~10 Hz
//! against a four-digit capacity.
//!
//! The player deliberately knows nothing about clock validity: it trusts
//! whatever `now_ms` it is handed. The plan driver gates execution on the
//! sync latch (see [`clock`](crate::clock)) before asking.

use heapless::Vec;

use crate::Frame;

/// Maximum number of queued frames.
pub const CAPACITY: usize = 1000;

/// A frame scheduled for an absolute wall-clock instant, in milliseconds
/// since the Unix epoch, UTC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimedFrame {
    pub ts_ms: u64,
    pub values: Frame,
}

/// Insertion was refused because the queue is at [`CAPACITY`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScheduleFull;

pub struct Schedule {
    /// Sorted by `ts_ms`, non-decreasing.
    queue: Vec<TimedFrame, CAPACITY>,
    /// Values of the most recently executed frame, sticky until
    /// [`Schedule::clear`].
    last: Option<Frame>,
}

impl Schedule {
    pub const fn new() -> Self {
        Schedule {
            queue: Vec::new(),
            last: None,
        }
    }

    /// Queues a frame. Duplicate and past timestamps are accepted;
    /// capacity overflow is not.
    pub fn insert(&mut self, ts_ms: u64, values: Frame) -> Result<(), ScheduleFull> {
        let idx = self
            .queue
            .iter()
            .position(|f| f.ts_ms > ts_ms)
            .unwrap_or_else(|| self.queue.len());
        self.queue
            .push(TimedFrame { ts_ms, values })
            .map_err(|_| ScheduleFull)?;
        self.queue[idx..].rotate_right(1);
        Ok(())
    }

    /// Discards all pending frames and the last-executed memory.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.last = None;
    }

    /// Pops every frame due at `now_ms`, coalescing to the latest of them.
    ///
    /// Returns the coalesced values, or the sticky last-executed values if
    /// nothing is due, or `None` if nothing has ever executed.
    pub fn current_frame(&mut self, now_ms: u64) -> Option<Frame> {
        let due = self
            .queue
            .iter()
            .take_while(|f| f.ts_ms <= now_ms)
            .count();
        if due > 0 {
            self.last = Some(self.queue[due - 1].values);
            let len = self.queue.len();
            self.queue[..].rotate_left(due);
            self.queue.truncate(len - due);
        }
        self.last
    }

    /// True while anything is queued or has ever been executed.
    pub fn has_valid_schedule(&self) -> bool {
        !self.queue.is_empty() || self.last.is_some()
    }

    /// Drops frames older than `ts_ms` without emitting them.
    pub fn prune_older_than(&mut self, ts_ms: u64) {
        let stale = self
            .queue
            .iter()
            .take_while(|f| f.ts_ms < ts_ms)
            .count();
        if stale > 0 {
            let len = self.queue.len();
            self.queue[..].rotate_left(stale);
            self.queue.truncate(len - stale);
        }
    }

    /// Number of frames still pending.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Frame = [10; crate::CHANNELS];
    const B: Frame = [20; crate::CHANNELS];
    const C: Frame = [30; crate::CHANNELS];

    #[test]
    fn emits_in_timestamp_order_regardless_of_arrival() {
        let mut s = Schedule::new();
        s.insert(300, C).unwrap();
        s.insert(100, A).unwrap();
        s.insert(200, B).unwrap();

        assert_eq!(s.current_frame(100), Some(A));
        assert_eq!(s.current_frame(250), Some(B));
        assert_eq!(s.current_frame(9_999), Some(C));
    }

    #[test]
    fn nothing_due_before_first_timestamp() {
        let mut s = Schedule::new();
        s.insert(500, A).unwrap();
        assert_eq!(s.current_frame(499), None);
        assert!(s.has_valid_schedule());
    }

    #[test]
    fn due_frames_coalesce_to_the_latest() {
        let mut s = Schedule::new();
        s.insert(100, A).unwrap();
        s.insert(150, B).unwrap();
        s.insert(160, C).unwrap();
        // All three are past due; only the last is observable.
        assert_eq!(s.current_frame(1_000), Some(C));
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn tied_timestamps_coalesce() {
        let mut s = Schedule::new();
        s.insert(100, A).unwrap();
        s.insert(100, B).unwrap();
        assert_eq!(s.current_frame(100), Some(B));
    }

    #[test]
    fn last_frame_is_sticky_until_clear() {
        let mut s = Schedule::new();
        s.insert(100, A).unwrap();
        assert_eq!(s.current_frame(100), Some(A));
        // Queue drained; the executed frame remains observable.
        assert_eq!(s.current_frame(200), Some(A));
        assert!(s.has_valid_schedule());

        s.clear();
        assert_eq!(s.current_frame(300), None);
        assert!(!s.has_valid_schedule());
    }

    #[test]
    fn past_timestamps_are_accepted_and_run_immediately() {
        let mut s = Schedule::new();
        s.insert(5, A).unwrap();
        assert_eq!(s.current_frame(1_000_000), Some(A));
    }

    #[test]
    fn rejects_beyond_capacity_but_keeps_existing_order() {
        let mut s = Schedule::new();
        for i in 0..CAPACITY {
            s.insert(1_000 + i as u64, A).unwrap();
        }
        assert_eq!(s.insert(999, B), Err(ScheduleFull));
        assert_eq!(s.pending(), CAPACITY);
        // Existing frames still emit, in order.
        assert_eq!(s.current_frame(1_000), Some(A));
        assert_eq!(s.pending(), CAPACITY - 1);
    }

    #[test]
    fn prune_drops_without_emitting() {
        let mut s = Schedule::new();
        s.insert(100, A).unwrap();
        s.insert(200, B).unwrap();
        s.insert(300, C).unwrap();
        s.prune_older_than(250);
        assert_eq!(s.pending(), 1);
        // The pruned frames never became the sticky last frame.
        assert_eq!(s.current_frame(240), None);
        assert_eq!(s.current_frame(300), Some(C));
    }
}
