use tracing::trace;

use crate::error::{FrameError, Result};

/// Accepts sequenced frames in order and rejects stale or replayed ones.
///
/// Comparison uses serial-number arithmetic, so the counter may wrap.
/// Gaps (lost datagrams) are accepted and counted.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u32>,
    lost: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sequence` if it is newer than the last accepted one.
    pub fn accept(&mut self, sequence: u32) -> Result<()> {
        if let Some(last) = self.last {
            let delta = sequence.wrapping_sub(last);
            if delta == 0 || delta > u32::MAX / 2 {
                return Err(FrameError::StaleSequence {
                    last,
                    received: sequence,
                });
            }
            if delta > 1 {
                trace!(last, sequence, gap = delta - 1, "sequence gap");
                self.lost = self.lost.saturating_add(u64::from(delta - 1));
            }
        }
        self.last = Some(sequence);
        Ok(())
    }

    /// Last accepted sequence number.
    pub fn last(&self) -> Option<u32> {
        self.last
    }

    /// Frames skipped over by gaps so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Forget history, e.g. after a reconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_increasing_and_counts_gaps() {
        let mut tracker = SequenceTracker::new();
        tracker.accept(0).unwrap();
        tracker.accept(1).unwrap();
        tracker.accept(5).unwrap();
        assert_eq!(tracker.last(), Some(5));
        assert_eq!(tracker.lost(), 3);
    }

    #[test]
    fn rejects_duplicates_and_reordering() {
        let mut tracker = SequenceTracker::new();
        tracker.accept(10).unwrap();
        assert!(matches!(
            tracker.accept(10),
            Err(FrameError::StaleSequence { last: 10, received: 10 })
        ));
        assert!(tracker.accept(9).is_err());
        assert_eq!(tracker.last(), Some(10));
    }

    #[test]
    fn wraps_around() {
        let mut tracker = SequenceTracker::new();
        tracker.accept(u32::MAX - 1).unwrap();
        tracker.accept(u32::MAX).unwrap();
        tracker.accept(0).unwrap();
        tracker.accept(1).unwrap();
        assert_eq!(tracker.lost(), 0);
    }

    #[test]
    fn reset_forgets_history() {
        let mut tracker = SequenceTracker::new();
        tracker.accept(100).unwrap();
        tracker.reset();
        tracker.accept(3).unwrap();
        assert_eq!(tracker.last(), Some(3));
    }
}
