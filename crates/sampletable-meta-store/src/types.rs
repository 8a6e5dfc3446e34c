//! Persisted row representation

use sampletable_common::{Cell, LocationKey};
use serde::{Deserialize, Serialize};

/// Row metadata as stored: one slot per schema column, `None` when the
/// column has never been written
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub sample_id: String,
    pub policy_version: i64,
    pub cells: Vec<Option<Cell>>,
}

impl StoredRow {
    /// Empty row with `width` unwritten columns
    pub fn new(sample_id: impl Into<String>, policy_version: i64, width: usize) -> Self {
        Self {
            sample_id: sample_id.into(),
            policy_version,
            cells: vec![None; width],
        }
    }

    #[must_use]
    pub fn cell(&self, column: usize) -> Option<&Cell> {
        self.cells.get(column).and_then(Option::as_ref)
    }

    /// Every location key the row references
    pub fn location_keys(&self) -> impl Iterator<Item = &LocationKey> {
        self.cells.iter().flatten().filter_map(Cell::as_key)
    }
}
