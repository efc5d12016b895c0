// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::{CalibrationTable, Interpolation};

/// A position in a [`CalibrationLog`] that it can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(usize);

/// The accumulated calibration state of a source: an ordered list of tables
/// and how each is interpolated when applied. Tables are only ever appended;
/// a rollback truncates the log to an earlier [`Checkpoint`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationLog {
    entries: Vec<(CalibrationTable, Interpolation)>,
}

impl CalibrationLog {
    pub fn new() -> CalibrationLog {
        CalibrationLog::default()
    }

    pub fn push(&mut self, table: CalibrationTable, interpolation: Interpolation) {
        self.entries.push((table, interpolation));
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.entries.len())
    }

    /// Forget every table appended after `checkpoint`. Truncating to a
    /// checkpoint later than the current end does nothing.
    pub fn truncate(&mut self, checkpoint: Checkpoint) {
        self.entries.truncate(checkpoint.0);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[(CalibrationTable, Interpolation)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&CalibrationTable> {
        self.entries.last().map(|(t, _)| t)
    }
}
