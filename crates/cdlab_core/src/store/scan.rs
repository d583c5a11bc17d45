//! Restartable record sequences.

use crate::record::Record;
use std::sync::Arc;

/// A restartable sequence over the records of one entity.
///
/// A scan captures the records that were live when it was opened; commits
/// made afterwards are not reflected. Records are cloned out one at a time
/// as the scan advances, and [`Scan::restart`] rewinds to the first record
/// of the same captured set.
#[derive(Debug, Clone)]
pub struct Scan {
    records: Arc<[Record]>,
    position: usize,
}

impl Scan {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
            position: 0,
        }
    }

    /// Rewinds to the first record.
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Number of records in the scan, regardless of position.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the scan holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Iterator for Scan {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let record = self.records.get(self.position)?.clone();
        self.position += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.records.len() - self.position;
        (remaining, Some(remaining))
    }
}
