///
/// frame_log.rs
///
/// Bounded log of formatted frames, read by the display table.
///
/// Rows are kept in arrival order. When a capacity is set, appending past it
/// evicts the oldest rows first.
///
use std::collections::VecDeque;

use crate::error::{CanBusError, Result};
use crate::format::DisplayRow;

pub const HEADERS: [&str; DisplayRow::COLUMN_COUNT] = ["Num", "Time", "Flags", "ID", "DLC", "Data"];

/// How a mutation changed the log, for incremental view updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChange {
    /// `removed` rows dropped from the head, then `inserted` rows added at the tail.
    Appended { removed: usize, inserted: usize },
    /// All rows were discarded.
    Reset,
}

#[derive(Debug, Clone, Default)]
pub struct FrameLog {
    rows: VecDeque<DisplayRow>,
    capacity: usize,
}

impl FrameLog {
    /// Creates a log holding at most `capacity` rows (0 = unlimited).
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::new(),
            capacity,
        }
    }

    pub fn append(&mut self, row: DisplayRow) -> LogChange {
        self.append_batch(std::iter::once(row))
    }

    /// Appends rows in order, as if by repeated [`FrameLog::append`].
    pub fn append_batch(&mut self, rows: impl IntoIterator<Item = DisplayRow>) -> LogChange {
        let before = self.rows.len();
        self.rows.extend(rows);
        let inserted = self.rows.len() - before;

        let mut removed = 0;
        if self.capacity > 0 && self.rows.len() > self.capacity {
            removed = self.rows.len() - self.capacity;
            self.rows.drain(..removed);
        }

        LogChange::Appended { removed, inserted }
    }

    pub fn clear(&mut self) -> LogChange {
        self.rows.clear();
        LogChange::Reset
    }

    /// Changes the bound. Existing rows are only trimmed by the next append.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        DisplayRow::COLUMN_COUNT
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(column: usize) -> Option<&'static str> {
        HEADERS.get(column).copied()
    }

    pub fn row(&self, index: usize) -> Result<&DisplayRow> {
        self.rows.get(index).ok_or(CanBusError::RowOutOfRange {
            row: index,
            len: self.rows.len(),
        })
    }

    pub fn field(&self, row: usize, column: usize) -> Result<&str> {
        self.row(row)?
            .field(column)
            .ok_or(CanBusError::ColumnOutOfRange {
                column,
                count: DisplayRow::COLUMN_COUNT,
            })
    }

    /// Rows oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &DisplayRow> + ExactSizeIterator {
        self.rows.iter()
    }

    pub fn last(&self) -> Option<&DisplayRow> {
        self.rows.back()
    }
}
