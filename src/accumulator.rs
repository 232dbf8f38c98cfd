///
/// accumulator.rs
///
/// Rows buffered between two flushes of the frame log.
///
use tracing::trace;

use crate::can::CanFrame;
use crate::format::{DisplayRow, format_frame};
use crate::frame_log::{FrameLog, LogChange};

#[derive(Debug, Default)]
pub struct FrameAccumulator {
    pending: Vec<DisplayRow>,
    received: u64,
    limit: usize,
    dropped: u64,
}

/// Outcome of moving buffered rows into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flush {
    pub change: LogChange,
    /// Total frames received, including this batch.
    pub received: u64,
}

impl FrameAccumulator {
    /// `limit` bounds the buffered rows (0 = unbounded). Pass the log capacity:
    /// rows beyond it would be evicted by the next flush anyway.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.enforce_limit();
    }

    /// Numbers, formats and buffers one received frame.
    pub fn push(&mut self, frame: &CanFrame, error_text: Option<String>) -> &DisplayRow {
        self.received += 1;
        self.pending
            .push(format_frame(self.received, frame, error_text));
        self.enforce_limit();
        // enforce_limit never removes the newest row
        &self.pending[self.pending.len() - 1]
    }

    fn enforce_limit(&mut self) {
        if self.limit > 0 && self.pending.len() > self.limit {
            let excess = self.pending.len() - self.limit;
            self.pending.drain(..excess);
            self.dropped += excess as u64;
            trace!(excess, "dropped buffered rows beyond log capacity");
        }
    }

    /// Moves every buffered row into `log`. Returns `None` when nothing was buffered.
    pub fn flush_into(&mut self, log: &mut FrameLog) -> Option<Flush> {
        if self.pending.is_empty() {
            return None;
        }
        let change = log.append_batch(self.pending.drain(..));
        Some(Flush {
            change,
            received: self.received,
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Rows discarded by the buffer bound before reaching the log.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic(id: u32) -> CanFrame {
        CanFrame::new(id & 0x7FF, &[0x01, 0x02]).unwrap()
    }

    #[test]
    fn push_numbers_frames_monotonically() {
        let mut acc = FrameAccumulator::new(0);
        assert_eq!(acc.push(&classic(1), None).number, "1");
        assert_eq!(acc.push(&classic(2), None).number, "2");
        assert_eq!(acc.pending(), 2);
        assert_eq!(acc.received(), 2);
    }

    #[test]
    fn flush_moves_rows_and_clears_buffer() {
        let mut acc = FrameAccumulator::new(0);
        let mut log = FrameLog::new(0);
        assert_eq!(acc.flush_into(&mut log), None);

        acc.push(&classic(1), None);
        acc.push(&classic(2), None);
        let flush = acc.flush_into(&mut log).unwrap();
        assert_eq!(flush.received, 2);
        assert_eq!(flush.change, LogChange::Appended { removed: 0, inserted: 2 });
        assert_eq!(acc.pending(), 0);
        assert_eq!(log.row_count(), 2);
        assert_eq!(acc.flush_into(&mut log), None);
    }

    #[test]
    fn numbering_continues_across_flushes() {
        let mut acc = FrameAccumulator::new(0);
        let mut log = FrameLog::new(0);
        acc.push(&classic(1), None);
        acc.flush_into(&mut log);
        acc.push(&classic(2), None);
        acc.flush_into(&mut log);
        assert_eq!(log.field(1, 0).unwrap(), "2");
    }

    #[test]
    fn twelve_hundred_frames_into_thousand_row_log() {
        let mut unbounded = FrameAccumulator::new(0);
        let mut bounded = FrameAccumulator::new(1000);
        let mut log_a = FrameLog::new(1000);
        let mut log_b = FrameLog::new(1000);

        for n in 0..1200 {
            unbounded.push(&classic(n), None);
            bounded.push(&classic(n), None);
        }
        assert_eq!(bounded.pending(), 1000);
        assert_eq!(bounded.dropped(), 200);

        unbounded.flush_into(&mut log_a);
        bounded.flush_into(&mut log_b);

        for log in [&log_a, &log_b] {
            assert_eq!(log.row_count(), 1000);
            assert_eq!(log.field(0, 0).unwrap(), "201");
            assert_eq!(log.field(999, 0).unwrap(), "1200");
            let in_order = log
                .iter()
                .zip(201u64..)
                .all(|(row, n)| row.number == n.to_string());
            assert!(in_order);
        }
    }

    #[test]
    fn error_text_is_used_for_error_frames() {
        let mut acc = FrameAccumulator::new(0);
        let frame = CanFrame::new_error(0x20, &[]).unwrap();
        let row = acc.push(&frame, Some("No acknowledgement".into()));
        assert_eq!(row.data, "No acknowledgement");
    }
}
