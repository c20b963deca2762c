use std::sync::Arc;

use tracing::trace;

use crate::frame::{IntegrityTag, INITIAL_SEQUENCE};
use crate::stats::StatsAggregator;

/// Classifies incoming frames in arrival order and feeds the result into the shared stats.
///
/// A frame counts as a single error if its tag does not match or its sequence number is not the
///  expected one - never as two errors, even if both are wrong.
///
/// After each frame, the expected sequence is re-synchronized to the number that was actually
///  received (not the one that was expected). So a single lost frame causes exactly one error on
///  the frame after it, while reordered frames may cause a series of errors until the numbers
///  line up again.
pub struct SequenceTracker {
    expected_sequence: u32,
    stats: Arc<StatsAggregator>,
}

impl SequenceTracker {
    pub fn new(stats: Arc<StatsAggregator>) -> SequenceTracker {
        SequenceTracker {
            expected_sequence: INITIAL_SEQUENCE,
            stats,
        }
    }

    pub fn expected_sequence(&self) -> u32 {
        self.expected_sequence
    }

    pub fn process(&mut self, sequence: u32, received_tag: IntegrityTag, payload: &[u8]) {
        let expected_tag = IntegrityTag::new(sequence, payload);

        let is_corrupt = received_tag != expected_tag;
        let is_out_of_sequence = sequence != self.expected_sequence;
        if is_corrupt || is_out_of_sequence {
            trace!(sequence, expected = self.expected_sequence, is_corrupt, "frame counted as error");
        }

        self.stats.record_frame(payload.len() as u64, is_corrupt || is_out_of_sequence);
        self.expected_sequence = sequence.wrapping_add(1);
    }
}
