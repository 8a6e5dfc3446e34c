//! Persistent table metadata store backed by redb.
//!
//! Writes are synchronous (write txn + commit). Reads go through the
//! in-memory row store in the service layer; this module only handles
//! persistence and startup reload.

use crate::tables;
use crate::types::StoredRow;
use redb::{Database, ReadableTable};
use sampletable_common::TableSchema;
use std::path::Path;
use tracing::{debug, error};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<MetaStoreError> for sampletable_common::Error {
    fn from(e: MetaStoreError) -> Self {
        Self::Persistence(e.to_string())
    }
}

pub type MetaStoreResult<T> = Result<T, MetaStoreError>;

/// Row key: table name, NUL, zero-padded hex sequence number.
///
/// Hex padding keeps lexicographic order equal to insertion order.
fn row_key(table: &str, seq: u64) -> String {
    format!("{table}\x00{seq:016x}")
}

fn row_range(table: &str) -> (String, String) {
    (format!("{table}\x00"), format!("{table}\x01"))
}

fn parse_seq(key: &str) -> Option<u64> {
    let (_, seq) = key.rsplit_once('\x00')?;
    u64::from_str_radix(seq, 16).ok()
}

/// Persistent table metadata store backed by redb.
pub struct MetaStore {
    db: Database,
}

impl MetaStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::SCHEMAS)?;
            let _t = write_txn.open_table(tables::ROWS)?;
        }
        write_txn.commit()?;

        debug!("Opened metadata store at {}", path.display());
        Ok(Self { db })
    }

    // ---- Schemas (bincode) ----

    pub fn put_schema(&self, table: &str, schema: &TableSchema) {
        if let Err(e) = self.put_bincode(tables::SCHEMAS, table, schema) {
            error!("Failed to persist schema for table '{}': {}", table, e);
        }
    }

    pub fn load_schemas(&self) -> MetaStoreResult<Vec<(String, TableSchema)>> {
        self.load_bincode_table(tables::SCHEMAS)
    }

    /// Remove a table's schema and every row it owns
    pub fn delete_table(&self, table: &str) {
        if let Err(e) = self.delete_table_inner(table) {
            error!("Failed to delete table '{}': {}", table, e);
        }
    }

    // ---- Rows (bincode, keyed by sequence) ----

    /// Persist a batch of rows in one transaction
    pub fn put_rows<'a>(&self, table: &str, rows: impl IntoIterator<Item = (u64, &'a StoredRow)>) {
        let result = (|| -> MetaStoreResult<usize> {
            let write_txn = self.db.begin_write()?;
            let mut written = 0;
            {
                let mut t = write_txn.open_table(tables::ROWS)?;
                for (seq, row) in rows {
                    let bytes = bincode::serialize(row)?;
                    t.insert(row_key(table, seq).as_str(), bytes.as_slice())?;
                    written += 1;
                }
            }
            write_txn.commit()?;
            Ok(written)
        })();
        if let Err(e) = result {
            error!("Failed to persist rows for table '{}': {}", table, e);
        }
    }

    pub fn delete_rows(&self, table: &str, seqs: &[u64]) {
        if seqs.is_empty() {
            return;
        }
        let result = (|| -> MetaStoreResult<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut t = write_txn.open_table(tables::ROWS)?;
                for seq in seqs {
                    t.remove(row_key(table, *seq).as_str())?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })();
        if let Err(e) = result {
            error!("Failed to delete rows for table '{}': {}", table, e);
        }
    }

    /// Load a table's rows in insertion order
    pub fn load_rows(&self, table: &str) -> MetaStoreResult<Vec<(u64, StoredRow)>> {
        let (start, end) = row_range(table);
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(tables::ROWS)?;
        let mut result = Vec::new();
        for entry in t.range(start.as_str()..end.as_str())? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            let Some(seq) = parse_seq(&key) else {
                error!("Skipping row with malformed key {:?}", key);
                continue;
            };
            match bincode::deserialize::<StoredRow>(entry.1.value()) {
                Ok(row) => result.push((seq, row)),
                Err(e) => error!("Failed to decode row '{}': {}", key, e),
            }
        }
        Ok(result)
    }

    // ---- Generic helpers ----

    fn put_bincode<T: serde::Serialize>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> MetaStoreResult<()> {
        let bytes = bincode::serialize(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_bincode_table<T: serde::de::DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<&str, &[u8]>,
    ) -> MetaStoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            match bincode::deserialize::<T>(entry.1.value()) {
                Ok(val) => result.push((key, val)),
                Err(e) => error!("Failed to decode entry '{}': {}", key, e),
            }
        }
        Ok(result)
    }

    fn delete_table_inner(&self, table: &str) -> MetaStoreResult<()> {
        let (start, end) = row_range(table);
        // Collect keys first (read txn)
        let keys: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let t = read_txn.open_table(tables::ROWS)?;
            let mut keys = Vec::new();
            for entry in t.range(start.as_str()..end.as_str())? {
                keys.push(entry?.0.value().to_string());
            }
            keys
        };
        let write_txn = self.db.begin_write()?;
        {
            let mut rows = write_txn.open_table(tables::ROWS)?;
            for key in &keys {
                rows.remove(key.as_str())?;
            }
            let mut schemas = write_txn.open_table(tables::SCHEMAS)?;
            schemas.remove(table)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampletable_common::{Cell, ColumnSpec, ColumnType, LocationKey, Value};

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSpec::with_default_storage("prompt", ColumnType::Str),
            ColumnSpec::with_default_storage("reward", ColumnType::Float),
        ])
        .unwrap()
    }

    fn row(id: &str, version: i64) -> StoredRow {
        let mut row = StoredRow::new(id, version, 2);
        row.cells[0] = Some(Cell::Key(LocationKey::new(format!("blob-{id}"))));
        row.cells[1] = Some(Cell::Value(Value::Float(0.5)));
        row
    }

    #[test]
    fn test_rows_reload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.redb");
        {
            let store = MetaStore::open(&path).unwrap();
            store.put_schema("t", &schema());
            let rows = [row("c_0_0", 1), row("a_0_0", 1), row("b_0_0", 2)];
            store.put_rows("t", [(2, &rows[0]), (10, &rows[1]), (11, &rows[2])]);
            store.put_rows("other", [(1, &rows[0])]);
        }

        let store = MetaStore::open(&path).unwrap();
        let schemas = store.load_schemas().unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].0, "t");
        assert_eq!(schemas[0].1, schema());

        let rows = store.load_rows("t").unwrap();
        let ids: Vec<_> = rows.iter().map(|(_, r)| r.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["c_0_0", "a_0_0", "b_0_0"]);
        assert_eq!(rows[1].0, 10);
        assert_eq!(rows[0].1, row("c_0_0", 1));
    }

    #[test]
    fn test_delete_rows_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        store.put_schema("t", &schema());
        let rows = [row("a_0_0", 1), row("b_0_0", 1)];
        store.put_rows("t", [(1, &rows[0]), (2, &rows[1])]);
        store.put_rows("t2", [(1, &rows[0])]);

        store.delete_rows("t", &[1]);
        assert_eq!(store.load_rows("t").unwrap().len(), 1);

        store.delete_table("t");
        assert!(store.load_rows("t").unwrap().is_empty());
        assert!(store.load_schemas().unwrap().is_empty());
        assert_eq!(store.load_rows("t2").unwrap().len(), 1);
    }

    #[test]
    fn test_row_key_ordering() {
        assert!(row_key("t", 9) < row_key("t", 10));
        assert_eq!(parse_seq(&row_key("t", 255)), Some(255));
    }
}
