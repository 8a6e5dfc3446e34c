//! In-memory row metadata in table order

use sampletable_meta_store::StoredRow;
use std::collections::{BTreeMap, HashMap};

/// Rows keyed by insertion sequence, with a sample id index.
///
/// Iteration follows insertion order, which is the order retrieval
/// accepts rows in.
#[derive(Debug, Default)]
pub struct RowStore {
    rows: BTreeMap<u64, StoredRow>,
    index: HashMap<String, u64>,
    next_seq: u64,
}

impl RowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted `(seq, row)` pairs
    pub fn from_persisted(rows: impl IntoIterator<Item = (u64, StoredRow)>) -> Self {
        let mut store = Self::new();
        for (seq, row) in rows {
            store.index.insert(row.sample_id.clone(), seq);
            store.rows.insert(seq, row);
            store.next_seq = store.next_seq.max(seq + 1);
        }
        store
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn contains(&self, sample_id: &str) -> bool {
        self.index.contains_key(sample_id)
    }

    #[must_use]
    pub fn seq_of(&self, sample_id: &str) -> Option<u64> {
        self.index.get(sample_id).copied()
    }

    #[must_use]
    pub fn get(&self, sample_id: &str) -> Option<&StoredRow> {
        self.seq_of(sample_id).and_then(|seq| self.rows.get(&seq))
    }

    #[must_use]
    pub fn get_seq(&self, seq: u64) -> Option<&StoredRow> {
        self.rows.get(&seq)
    }

    pub fn get_mut(&mut self, sample_id: &str) -> Option<&mut StoredRow> {
        let seq = self.seq_of(sample_id)?;
        self.rows.get_mut(&seq)
    }

    /// Append a row, returning its sequence number; `None` if the id is taken
    pub fn insert(&mut self, row: StoredRow) -> Option<u64> {
        if self.index.contains_key(&row.sample_id) {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(row.sample_id.clone(), seq);
        self.rows.insert(seq, row);
        Some(seq)
    }

    pub fn remove_seq(&mut self, seq: u64) -> Option<StoredRow> {
        let row = self.rows.remove(&seq)?;
        self.index.remove(&row.sample_id);
        Some(row)
    }

    /// Rows in table order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &StoredRow)> {
        self.rows.iter().map(|(seq, row)| (*seq, row))
    }

    /// Remove every row, returning them in table order
    pub fn drain(&mut self) -> Vec<(u64, StoredRow)> {
        self.index.clear();
        std::mem::take(&mut self.rows).into_iter().collect()
    }

    /// Row count per policy version
    #[must_use]
    pub fn count_by_version(&self) -> BTreeMap<i64, u64> {
        let mut counts = BTreeMap::new();
        for row in self.rows.values() {
            *counts.entry(row.policy_version).or_insert(0) += 1;
        }
        counts
    }
}
