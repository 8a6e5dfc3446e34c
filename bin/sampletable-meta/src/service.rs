//! Table service state and operations
//!
//! One `TableService` owns one table. It is driven by a single worker loop
//! (see [`crate::actor`]), so every operation runs with exclusive access to
//! the table's rows and is applied as a unit relative to other calls.
//!
//! Every request is validated before any blob store I/O. Per-cell blob
//! failures after that point are logged and only reflected in the boolean
//! result of the call.

use crate::rows::RowStore;
use futures::stream::{self, StreamExt, TryStreamExt};
use sampletable_blob::{BlobStore, BlobStoreExt};
use sampletable_common::config::ServiceConfig;
use sampletable_common::{
    Cell, ColumnSpec, DeleteRequest, DetachedSamples, Error, InsertRequest, LocationKey, Result,
    RetrieveRequest, SampleBatch, SampleId, SampleIdGenerator, TableSchema, TableStats, Value,
    VersionFilter, WriteRequest,
};
use sampletable_condition::Condition;
use sampletable_meta_store::{MetaStore, StoredRow};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
struct OpCounters {
    inserts: u64,
    retrieves: u64,
    writes: u64,
    deletes: u64,
    failed_cells: u64,
}

/// A row accepted by a filter, with the values its condition needed
struct Selected {
    seq: u64,
    fetched: HashMap<String, Value>,
}

/// What `select` does with a row whose condition values cannot be read
#[derive(Clone, Copy, PartialEq, Eq)]
enum Unreadable {
    /// Fail the whole selection
    Fail,
    /// Leave the row out and count it
    Skip,
}

pub struct TableService {
    name: String,
    schema: Arc<TableSchema>,
    rows: RowStore,
    blob: Arc<dyn BlobStore>,
    /// Persistent store (None = in-memory only)
    store: Option<Arc<MetaStore>>,
    id_generator: SampleIdGenerator,
    max_concurrent_ops: usize,
    reclaim_overwritten: bool,
    counters: OpCounters,
}

impl TableService {
    pub fn new(
        name: impl Into<String>,
        schema: Arc<TableSchema>,
        blob: Arc<dyn BlobStore>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: RowStore::new(),
            blob,
            store: None,
            id_generator: SampleIdGenerator::new(),
            max_concurrent_ops: config.max_concurrent_backend_ops.max(1),
            reclaim_overwritten: config.reclaim_overwritten_objects,
            counters: OpCounters::default(),
        }
    }

    /// Persist every mutation to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<MetaStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start from previously persisted rows
    #[must_use]
    pub fn with_rows(mut self, rows: RowStore) -> Self {
        self.rows = rows;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    // ---- Single-cell backend access ----

    /// Actual value of one cell, fetching by-reference values from the blob store
    pub async fn read_data(&self, sample_id: &str, column: &str) -> Result<Value> {
        let row = self
            .rows
            .get(sample_id)
            .ok_or_else(|| Error::SampleNotFound(sample_id.to_string()))?;
        let idx = self
            .schema
            .index_of(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;
        self.load_cell(row, idx).await
    }

    /// Write one value to the blob store if its column is stored by reference.
    ///
    /// Returns whether the write succeeded and the key it produced; by-value
    /// columns need no backend write and yield `(true, None)`.
    pub async fn write_data(
        &self,
        sample_id: &str,
        column: &str,
        value: &Value,
    ) -> (bool, Option<LocationKey>) {
        let Some(spec) = self.schema.column(column) else {
            return (false, None);
        };
        if !spec.is_by_reference() {
            return (true, None);
        }
        match self.blob.put_value(value).await {
            Ok(key) => (true, Some(key)),
            Err(e) => {
                warn!(
                    "Failed to write {}.{} for sample {}: {}",
                    self.name, column, sample_id, e
                );
                (false, None)
            }
        }
    }

    async fn load_cell(&self, row: &StoredRow, idx: usize) -> Result<Value> {
        match row.cell(idx) {
            None => Ok(Value::Null),
            Some(Cell::Value(value)) => Ok(value.clone()),
            Some(Cell::Key(key)) => self.blob.get_value(key).await.map_err(|e| {
                warn!(
                    "Failed to read {}.{} for sample {} ({}): {}",
                    self.name,
                    self.schema.columns()[idx].name,
                    row.sample_id,
                    key,
                    e
                );
                Error::from(e)
            }),
        }
    }

    // ---- Insert ----

    pub async fn insert(&mut self, request: InsertRequest) -> Result<bool> {
        request.validate_shape()?;
        let columns = self.schema.resolve_columns(&request.column_names)?;
        let sample_ids = self.assign_sample_ids(&request)?;

        let mut rows = Vec::with_capacity(request.rows.len());
        for (sample_id, cells) in sample_ids.into_iter().zip(request.rows) {
            let mut row = StoredRow::new(sample_id, request.policy_version, self.schema.len());
            for (&idx, cell) in columns.iter().zip(cells) {
                row.cells[idx] = self.check_cell(&self.schema.columns()[idx], cell)?;
            }
            rows.push(row);
        }

        // Literal values of by-reference columns go to the blob store
        let mut pending = Vec::new();
        for (r, row) in rows.iter_mut().enumerate() {
            for &idx in &columns {
                if !self.schema.columns()[idx].is_by_reference() {
                    continue;
                }
                match row.cells[idx].take() {
                    Some(Cell::Value(value)) => pending.push((r, idx, value)),
                    other => row.cells[idx] = other,
                }
            }
        }
        let written = self.offload(&rows, pending).await;
        for (r, idx, key) in written {
            if let Some(key) = key {
                rows[r].cells[idx] = Some(Cell::Key(key));
            }
        }

        let mut failed: u64 = rows
            .iter()
            .map(|row| columns.iter().filter(|&&idx| row.cells[idx].is_none()).count() as u64)
            .sum();
        let mut seqs = Vec::with_capacity(rows.len());
        for row in rows {
            let sample_id = row.sample_id.clone();
            match self.rows.insert(row) {
                Some(seq) => seqs.push(seq),
                None => {
                    warn!("Sample {} appeared in table {} during insert", sample_id, self.name);
                    failed += 1;
                }
            }
        }
        self.persist(seqs.iter().copied());

        self.counters.inserts += 1;
        self.counters.failed_cells += failed;
        debug!(
            "Inserted {} rows into {} (version {}, {} failed cells)",
            seqs.len(),
            self.name,
            request.policy_version,
            failed
        );
        Ok(failed == 0)
    }

    fn assign_sample_ids(&self, request: &InsertRequest) -> Result<Vec<String>> {
        if let Some(ids) = &request.sample_ids {
            let mut seen = HashSet::with_capacity(ids.len());
            for id in ids {
                SampleId::parse(id)?;
                if !seen.insert(id.as_str()) || self.rows.contains(id) {
                    return Err(Error::DuplicateSampleId(id.clone()));
                }
            }
            return Ok(ids.clone());
        }
        let groups = request.rows.len() / request.rollout_n as usize;
        Ok((0..groups)
            .flat_map(|_| self.id_generator.mint(request.rollout_n))
            .map(|id| id.to_string())
            .collect())
    }

    /// Cast literal cells to the column type; location keys are only
    /// accepted for by-reference columns
    fn check_cell(&self, spec: &ColumnSpec, cell: Option<Cell>) -> Result<Option<Cell>> {
        match cell {
            None => Ok(None),
            Some(Cell::Value(value)) => Ok(Some(Cell::Value(self.schema.cast(&spec.name, value)?))),
            Some(Cell::Key(key)) if spec.is_by_reference() => Ok(Some(Cell::Key(key))),
            Some(Cell::Key(_)) => Err(Error::invalid_argument(format!(
                "column {} is stored by value and cannot take a location key",
                spec.name
            ))),
        }
    }

    /// Write `(slot, column, value)` triples to the blob store concurrently
    async fn offload(
        &self,
        rows: &[StoredRow],
        pending: Vec<(usize, usize, Value)>,
    ) -> Vec<(usize, usize, Option<LocationKey>)> {
        let schema = &self.schema;
        stream::iter(pending)
            .map(|(r, idx, value)| async move {
                let column = &schema.columns()[idx].name;
                let (_, key) = self.write_data(&rows[r].sample_id, column, &value).await;
                (r, idx, key)
            })
            .buffer_unordered(self.max_concurrent_ops)
            .collect()
            .await
    }

    // ---- Retrieve ----

    /// Filtered read returning actual values
    pub async fn retrieve(&mut self, request: RetrieveRequest) -> Result<SampleBatch<Value>> {
        let (columns, condition) = self.prepare_read(&request)?;
        let (selected, _) = self
            .select(
                request.version_filter(),
                condition.as_ref(),
                request.limit(),
                Unreadable::Fail,
            )
            .await?;
        let batch = self.materialize(&request.column_names, &columns, selected).await?;
        self.counters.retrieves += 1;
        debug!("Retrieved {} rows from {}", batch.len(), self.name);
        Ok(batch)
    }

    /// Filtered read returning stored cells; location keys are not resolved
    pub async fn retrieve_stored(&mut self, request: RetrieveRequest) -> Result<SampleBatch<Cell>> {
        let (columns, condition) = self.prepare_read(&request)?;
        let (selected, _) = self
            .select(
                request.version_filter(),
                condition.as_ref(),
                request.limit(),
                Unreadable::Fail,
            )
            .await?;

        let mut batch = SampleBatch::empty(&request.column_names);
        for sel in selected {
            let Some(row) = self.rows.get_seq(sel.seq) else {
                continue;
            };
            batch.sample_ids.push(row.sample_id.clone());
            for (name, &idx) in request.column_names.iter().zip(&columns) {
                let cell = row.cell(idx).cloned().unwrap_or(Cell::Value(Value::Null));
                if let Some(column) = batch.columns.get_mut(name) {
                    column.push(cell);
                }
            }
        }
        self.counters.retrieves += 1;
        debug!("Retrieved {} stored rows from {}", batch.len(), self.name);
        Ok(batch)
    }

    fn prepare_read(&self, request: &RetrieveRequest) -> Result<(Vec<usize>, Option<Condition>)> {
        let columns = self.schema.resolve_columns(&request.column_names)?;
        let condition = self.bind_condition(request.condition.as_deref())?;
        Ok((columns, condition))
    }

    fn bind_condition(&self, condition: Option<&str>) -> Result<Option<Condition>> {
        Ok(condition
            .map(|c| Condition::bind(c, &self.schema))
            .transpose()?)
    }

    /// Rows matching the version filter and condition, in table order, and
    /// the number of rows skipped as unreadable.
    ///
    /// Condition columns are resolved to actual values per row; the fetched
    /// values are kept so the output can reuse them.
    async fn select(
        &self,
        filter: VersionFilter,
        condition: Option<&Condition>,
        limit: Option<usize>,
        unreadable: Unreadable,
    ) -> Result<(Vec<Selected>, u64)> {
        let mut selected = Vec::new();
        let mut skipped = 0u64;
        for (seq, row) in self.rows.iter() {
            if limit.is_some_and(|n| selected.len() >= n) {
                break;
            }
            if !filter.matches(row.policy_version) {
                continue;
            }
            let Some(condition) = condition else {
                selected.push(Selected {
                    seq,
                    fetched: HashMap::new(),
                });
                continue;
            };
            let fetched = match self.fetch_columns(row, condition.columns()).await {
                Ok(fetched) => fetched,
                Err(e) if unreadable == Unreadable::Skip => {
                    warn!(
                        "Skipping sample {} in {}: condition values unreadable: {}",
                        row.sample_id, self.name, e
                    );
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if condition.evaluate(&fetched)? {
                selected.push(Selected { seq, fetched });
            }
        }
        Ok((selected, skipped))
    }

    async fn fetch_columns<'a>(
        &self,
        row: &StoredRow,
        columns: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, Value>> {
        let loads = columns
            .filter_map(|name| self.schema.index_of(name).map(|idx| (name, idx)))
            .map(|(name, idx)| async move {
                let value = self.load_cell(row, idx).await?;
                Ok::<_, Error>((name.to_string(), value))
            });
        let pairs = futures::future::try_join_all(loads).await?;
        Ok(pairs.into_iter().collect())
    }

    async fn materialize(
        &self,
        names: &[String],
        columns: &[usize],
        selected: Vec<Selected>,
    ) -> Result<SampleBatch<Value>> {
        let mut sample_ids = Vec::with_capacity(selected.len());
        let mut loads = Vec::with_capacity(selected.len() * names.len());
        for mut sel in selected {
            let Some(row) = self.rows.get_seq(sel.seq) else {
                continue;
            };
            sample_ids.push(row.sample_id.clone());
            for (name, &idx) in names.iter().zip(columns) {
                let cached = sel.fetched.remove(name);
                loads.push(async move {
                    match cached {
                        Some(value) => Ok(value),
                        None => self.load_cell(row, idx).await,
                    }
                });
            }
        }

        // Ordered fan-out keeps values row-major
        let values: Vec<Value> = stream::iter(loads)
            .buffered(self.max_concurrent_ops)
            .try_collect()
            .await?;

        let mut out: HashMap<String, Vec<Value>> = names
            .iter()
            .map(|n| (n.clone(), Vec::with_capacity(sample_ids.len())))
            .collect();
        for (i, value) in values.into_iter().enumerate() {
            if let Some(column) = out.get_mut(&names[i % names.len()]) {
                column.push(value);
            }
        }
        Ok(SampleBatch {
            sample_ids,
            columns: out,
        })
    }

    // ---- Write ----

    /// Overwrite a column subset of existing rows (last writer wins)
    pub async fn write(&mut self, request: WriteRequest) -> Result<bool> {
        request.validate_shape()?;
        let columns = self.schema.resolve_columns(&request.column_names)?;
        let mut seen = HashSet::with_capacity(request.sample_ids.len());
        for id in &request.sample_ids {
            if !self.rows.contains(id) {
                return Err(Error::SampleNotFound(id.clone()));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::DuplicateSampleId(id.clone()));
            }
        }

        let WriteRequest {
            sample_ids,
            column_names,
            mut values,
        } = request;
        let mut updates: Vec<(usize, usize, Option<Cell>)> = Vec::new();
        for (name, &idx) in column_names.iter().zip(&columns) {
            let spec = &self.schema.columns()[idx];
            for (r, cell) in values.remove(name).unwrap_or_default().into_iter().enumerate() {
                updates.push((r, idx, self.check_cell(spec, cell)?));
            }
        }

        let mut pending = Vec::new();
        for (u, (_, idx, cell)) in updates.iter_mut().enumerate() {
            if !self.schema.columns()[*idx].is_by_reference() {
                continue;
            }
            match cell.take() {
                Some(Cell::Value(value)) => pending.push((u, *idx, value)),
                other => *cell = other,
            }
        }
        let written: Vec<(usize, Option<LocationKey>)> = {
            let this = &*self;
            let (updates, sample_ids, schema) = (&updates, &sample_ids, &this.schema);
            stream::iter(pending)
                .map(|(u, idx, value)| async move {
                    let sample_id = &sample_ids[updates[u].0];
                    let column = &schema.columns()[idx].name;
                    (u, this.write_data(sample_id, column, &value).await.1)
                })
                .buffer_unordered(this.max_concurrent_ops)
                .collect()
                .await
        };
        for (u, key) in written {
            if let Some(key) = key {
                updates[u].2 = Some(Cell::Key(key));
            }
        }

        let mut failed = 0u64;
        let mut touched = BTreeSet::new();
        let mut superseded = Vec::new();
        for (r, idx, cell) in updates {
            let Some(cell) = cell else {
                failed += 1;
                continue;
            };
            let Some(seq) = self.rows.seq_of(&sample_ids[r]) else {
                failed += 1;
                continue;
            };
            let Some(row) = self.rows.get_mut(&sample_ids[r]) else {
                failed += 1;
                continue;
            };
            if let Some(Cell::Key(old)) = row.cells[idx].replace(cell) {
                if row.cell(idx).and_then(Cell::as_key) != Some(&old) {
                    superseded.push(old);
                }
            }
            touched.insert(seq);
        }
        self.persist(touched.iter().copied());

        if self.reclaim_overwritten && !superseded.is_empty() {
            failed += self.delete_keys(superseded).await;
        }

        self.counters.writes += 1;
        self.counters.failed_cells += failed;
        debug!(
            "Updated {} rows in {} ({} failed cells)",
            touched.len(),
            self.name,
            failed
        );
        Ok(failed == 0)
    }

    // ---- Delete ----

    /// Remove matching rows from metadata and return their location keys.
    ///
    /// A row whose condition values cannot be read is left in place and
    /// counted in `unreadable`; the other matches are still removed.
    pub async fn detach(&mut self, request: DeleteRequest) -> Result<DetachedSamples> {
        request.validate()?;
        let condition = self.bind_condition(request.condition.as_deref())?;
        let (selected, unreadable) = self
            .select(request.version_filter(), condition.as_ref(), None, Unreadable::Skip)
            .await?;
        let seqs: Vec<u64> = selected.iter().map(|s| s.seq).collect();

        let mut detached = DetachedSamples {
            unreadable,
            ..DetachedSamples::default()
        };
        for &seq in &seqs {
            if let Some(row) = self.rows.remove_seq(seq) {
                detached.keys.extend(row.location_keys().cloned());
                detached.sample_ids.push(row.sample_id);
            }
        }
        if let Some(store) = &self.store {
            store.delete_rows(&self.name, &seqs);
        }
        self.counters.deletes += 1;
        debug!(
            "Detached {} rows from {} ({} location keys)",
            detached.sample_ids.len(),
            self.name,
            detached.keys.len()
        );
        Ok(detached)
    }

    /// Remove matching rows and delete every blob object they reference.
    ///
    /// Row metadata is removed even when one of its object deletes fails.
    pub async fn delete(&mut self, request: DeleteRequest) -> Result<bool> {
        let detached = self.detach(request).await?;
        let failed = self.delete_keys(detached.keys).await + detached.unreadable;
        self.counters.failed_cells += failed;
        Ok(failed == 0)
    }

    /// Remove every row and its blob objects
    pub async fn truncate(&mut self) -> bool {
        let drained = self.rows.drain();
        let seqs: Vec<u64> = drained.iter().map(|(seq, _)| *seq).collect();
        let keys: Vec<LocationKey> = drained
            .iter()
            .flat_map(|(_, row)| row.location_keys().cloned())
            .collect();
        if let Some(store) = &self.store {
            store.delete_rows(&self.name, &seqs);
        }
        let failed = self.delete_keys(keys).await;
        self.counters.deletes += 1;
        self.counters.failed_cells += failed;
        info!("Truncated table {}: {} rows removed", self.name, seqs.len());
        failed == 0
    }

    /// Delete blob objects concurrently, returning the number that failed
    async fn delete_keys(&self, keys: Vec<LocationKey>) -> u64 {
        let results: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                match self.blob.delete(&key).await {
                    Ok(true) => true,
                    Ok(false) => {
                        warn!("Blob object {} was already gone", key);
                        false
                    }
                    Err(e) => {
                        warn!("Failed to delete blob object {}: {}", key, e);
                        false
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_ops)
            .collect()
            .await;
        results.into_iter().filter(|ok| !ok).count() as u64
    }

    // ---- Stats and persistence ----

    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            table_name: self.name.clone(),
            row_count: self.rows.len() as u64,
            rows_by_version: self.rows.count_by_version(),
            inserts: self.counters.inserts,
            retrieves: self.counters.retrieves,
            writes: self.counters.writes,
            deletes: self.counters.deletes,
            failed_cells: self.counters.failed_cells,
        }
    }

    fn persist(&self, seqs: impl IntoIterator<Item = u64>) {
        if let Some(store) = &self.store {
            let rows = seqs
                .into_iter()
                .filter_map(|seq| self.rows.get_seq(seq).map(|row| (seq, row)));
            store.put_rows(&self.name, rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampletable_blob::MemoryBlobStore;
    use sampletable_common::{ColumnType, StorageMode};

    fn schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchema::new(vec![
                ColumnSpec::new("prompt", ColumnType::Str, StorageMode::ByValue),
                ColumnSpec::new("logits", ColumnType::Tensor, StorageMode::ByReference),
                ColumnSpec::with_default_storage("reward", ColumnType::Float),
            ])
            .unwrap(),
        )
    }

    fn service(blob: &Arc<MemoryBlobStore>) -> TableService {
        TableService::new("t", schema(), blob.clone(), &ServiceConfig::default())
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn sample(prompt: &str, logits: &[f64], reward: f64) -> Vec<Value> {
        vec![Value::from(prompt), Value::from(logits.to_vec()), Value::Float(reward)]
    }

    async fn seed(svc: &mut TableService) -> Vec<String> {
        let ids = vec!["a_0_0".to_string(), "b_0_0".to_string(), "c_0_0".to_string()];
        let request = InsertRequest::from_values(
            1,
            cols(&["prompt", "logits", "reward"]),
            vec![
                sample("x", &[0.1], 1.0),
                sample("y", &[0.9], -1.0),
                sample("z", &[0.5], 2.0),
            ],
            Some(ids.clone()),
            1,
        );
        assert!(svc.insert(request).await.unwrap());
        ids
    }

    #[tokio::test]
    async fn test_read_and_write_data() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;

        assert_eq!(svc.read_data("b_0_0", "logits").await.unwrap(), Value::Tensor(vec![0.9]));
        assert_eq!(svc.read_data("b_0_0", "prompt").await.unwrap(), Value::from("y"));
        assert!(matches!(svc.read_data("q_0_0", "prompt").await, Err(Error::SampleNotFound(_))));

        let (ok, key) = svc.write_data("a_0_0", "logits", &Value::Tensor(vec![1.0])).await;
        assert!(ok);
        assert!(blob.contains(&key.unwrap()));
        assert_eq!(svc.write_data("a_0_0", "reward", &Value::Float(1.0)).await, (true, None));

        blob.fail_next_puts(1);
        assert_eq!(svc.write_data("a_0_0", "logits", &Value::Tensor(vec![])).await, (false, None));
    }

    #[tokio::test]
    async fn test_insert_stores_keys_for_reference_columns() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;
        assert_eq!(blob.len(), 3);

        let stored = svc
            .retrieve_stored(RetrieveRequest::new(1, cols(&["prompt", "logits"])))
            .await
            .unwrap();
        assert_eq!(stored.column("prompt").unwrap()[0], Cell::Value(Value::from("x")));
        assert!(stored.column("logits").unwrap().iter().all(|c| c.as_key().is_some()));
    }

    #[tokio::test]
    async fn test_insert_rollout_mints_grouped_ids() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        let request = InsertRequest::from_values(
            2,
            cols(&["prompt"]),
            vec![vec![Value::from("p")], vec![Value::from("q")]],
            None,
            3,
        );
        assert!(svc.insert(request).await.unwrap());
        assert_eq!(svc.row_count(), 6);

        let batch = svc.retrieve(RetrieveRequest::new(2, cols(&["prompt"]))).await.unwrap();
        let ids: Vec<SampleId> = batch.sample_ids.iter().map(|s| SampleId::parse(s).unwrap()).collect();
        assert!(ids[..3].iter().all(|id| id.same_group(&ids[0])));
        assert!(!ids[3].same_group(&ids[0]));
        let trajectories: Vec<u32> = ids[..3].iter().map(SampleId::trajectory_id).collect();
        assert_eq!(trajectories, vec![0, 1, 2]);
        assert_eq!(batch.column("prompt").unwrap()[3], Value::from("q"));
    }

    #[tokio::test]
    async fn test_insert_validation_happens_before_io() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;
        let before = blob.len();

        let duplicate = InsertRequest::from_values(
            1,
            cols(&["logits"]),
            vec![vec![Value::from(vec![1.0])]],
            Some(vec!["a_0_0".into()]),
            1,
        );
        assert!(matches!(svc.insert(duplicate).await, Err(Error::DuplicateSampleId(_))));

        let bad_type = InsertRequest::from_values(
            1,
            cols(&["logits", "reward"]),
            vec![vec![Value::from(vec![1.0]), Value::from("high")]],
            None,
            1,
        );
        assert!(matches!(svc.insert(bad_type).await, Err(Error::TypeMismatch { .. })));

        let malformed = InsertRequest::from_values(
            1,
            cols(&["prompt"]),
            vec![vec![Value::from("p")]],
            Some(vec!["not-an-id".into()]),
            1,
        );
        assert!(matches!(svc.insert(malformed).await, Err(Error::InvalidSampleId(_))));

        assert_eq!(blob.len(), before);
        assert_eq!(svc.row_count(), 3);
    }

    #[tokio::test]
    async fn test_partial_insert_failure_keeps_other_cells() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        blob.fail_next_puts(1);
        let request = InsertRequest::from_values(
            1,
            cols(&["prompt", "logits"]),
            vec![sample("x", &[0.1], 0.0)[..2].to_vec(), sample("y", &[0.2], 0.0)[..2].to_vec()],
            Some(vec!["a_0_0".into(), "b_0_0".into()]),
            1,
        );
        assert!(!svc.insert(request).await.unwrap());
        assert_eq!(svc.row_count(), 2);
        assert_eq!(blob.len(), 1);
        assert_eq!(svc.stats().failed_cells, 1);

        let batch = svc
            .retrieve(RetrieveRequest::new(1, cols(&["prompt", "logits"])))
            .await
            .unwrap();
        let logits = batch.column("logits").unwrap();
        assert_eq!(logits.iter().filter(|v| v.is_null()).count(), 1);
        assert_eq!(batch.column("prompt").unwrap(), &[Value::from("x"), Value::from("y")]);
    }

    #[tokio::test]
    async fn test_retrieve_condition_on_reference_column() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;

        let request = RetrieveRequest::new(-1, cols(&["prompt", "logits"])).condition("logits == reward");
        // tensors never equal floats
        assert!(svc.retrieve(request).await.unwrap().is_empty());

        let request = RetrieveRequest::new(-1, cols(&["prompt"])).condition("reward > 0 and prompt != 'x'");
        let batch = svc.retrieve(request).await.unwrap();
        assert_eq!(batch.sample_ids, vec!["c_0_0"]);

        let unknown = RetrieveRequest::new(-1, cols(&["prompt"])).condition("score > 1");
        assert!(matches!(svc.retrieve(unknown).await, Err(Error::Condition(_))));
    }

    #[tokio::test]
    async fn test_retrieve_batch_size_and_version() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;

        let batch = svc
            .retrieve(RetrieveRequest::new(1, cols(&["reward"])).batch_size(2))
            .await
            .unwrap();
        assert_eq!(batch.sample_ids, vec!["a_0_0", "b_0_0"]);

        let batch = svc.retrieve(RetrieveRequest::new(7, cols(&["reward"]))).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.column("reward").map(<[Value]>::len), Some(0));
    }

    #[tokio::test]
    async fn test_retrieve_fails_on_unreadable_condition_value() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;
        blob.fail_next_gets(1);
        let request = RetrieveRequest::new(-1, cols(&["prompt"])).condition("logits");
        assert!(matches!(svc.retrieve(request).await, Err(Error::Backend(_))));
    }

    #[tokio::test]
    async fn test_write_replaces_and_reclaims() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;
        let old_key = svc.rows.get("a_0_0").and_then(|r| r.cell(1)).and_then(Cell::as_key).cloned().unwrap();

        let mut values = HashMap::new();
        values.insert("logits".to_string(), vec![Value::from(vec![7.0])]);
        values.insert("reward".to_string(), vec![Value::Int(5)]);
        let request = WriteRequest::from_values(vec!["a_0_0".into()], cols(&["logits", "reward"]), values);
        assert!(svc.write(request).await.unwrap());

        assert_eq!(svc.read_data("a_0_0", "logits").await.unwrap(), Value::Tensor(vec![7.0]));
        assert_eq!(svc.read_data("a_0_0", "reward").await.unwrap(), Value::Float(5.0));
        assert!(!blob.contains(&old_key));
        assert_eq!(blob.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_write_failure_keeps_other_cells() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;

        let mut values = HashMap::new();
        values.insert("logits".to_string(), vec![Value::from(vec![7.0]), Value::from(vec![8.0])]);
        values.insert("reward".to_string(), vec![Value::Float(10.0), Value::Float(20.0)]);
        let request = WriteRequest::from_values(
            vec!["a_0_0".into(), "b_0_0".into()],
            cols(&["logits", "reward"]),
            values,
        );
        blob.fail_next_puts(1);
        assert!(!svc.write(request).await.unwrap());
        assert_eq!(svc.stats().failed_cells, 1);

        // no rollback: both by-value cells and one by-reference cell landed
        assert_eq!(svc.read_data("a_0_0", "reward").await.unwrap(), Value::Float(10.0));
        assert_eq!(svc.read_data("b_0_0", "reward").await.unwrap(), Value::Float(20.0));
        let a = svc.read_data("a_0_0", "logits").await.unwrap();
        let b = svc.read_data("b_0_0", "logits").await.unwrap();
        let updated = [a == Value::Tensor(vec![7.0]), b == Value::Tensor(vec![8.0])];
        let kept = [a == Value::Tensor(vec![0.1]), b == Value::Tensor(vec![0.9])];
        assert_eq!(updated.iter().filter(|u| **u).count(), 1);
        assert_eq!(kept.iter().filter(|k| **k).count(), 1);
        assert_eq!(blob.len(), 3);
    }

    #[tokio::test]
    async fn test_write_without_reclaim_leaves_old_object() {
        let blob = Arc::new(MemoryBlobStore::new());
        let config = ServiceConfig {
            reclaim_overwritten_objects: false,
            ..ServiceConfig::default()
        };
        let mut svc = TableService::new("t", schema(), blob.clone(), &config);
        seed(&mut svc).await;

        let mut values = HashMap::new();
        values.insert("logits".to_string(), vec![Value::from(vec![7.0])]);
        let request = WriteRequest::from_values(vec!["a_0_0".into()], cols(&["logits"]), values);
        assert!(svc.write(request).await.unwrap());
        assert_eq!(blob.len(), 4);
    }

    #[tokio::test]
    async fn test_write_rejects_unknown_rows() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;
        let mut values = HashMap::new();
        values.insert("reward".to_string(), vec![Value::Float(1.0), Value::Float(2.0)]);
        let request = WriteRequest::from_values(vec!["a_0_0".into(), "nope_0_0".into()], cols(&["reward"]), values);
        assert!(matches!(svc.write(request).await, Err(Error::SampleNotFound(_))));
        assert_eq!(svc.read_data("a_0_0", "reward").await.unwrap(), Value::Float(1.0));
    }

    #[tokio::test]
    async fn test_delete_removes_rows_and_objects() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;

        assert!(matches!(
            svc.delete(DeleteRequest::new(-1, Some(String::new()))).await,
            Err(Error::UnfilteredDelete)
        ));

        assert!(svc.delete(DeleteRequest::new(-1, Some("reward < 0".into()))).await.unwrap());
        assert_eq!(svc.row_count(), 2);
        assert_eq!(blob.len(), 2);
        assert!(!svc.rows.contains("b_0_0"));

        blob.fail_next_deletes(1);
        assert!(!svc.delete(DeleteRequest::new(1, None)).await.unwrap());
        assert_eq!(svc.row_count(), 0);
        assert_eq!(blob.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_skips_unreadable_rows() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;

        blob.fail_next_gets(1);
        assert!(!svc.delete(DeleteRequest::new(-1, Some("logits".into()))).await.unwrap());
        assert_eq!(svc.row_count(), 1);
        assert!(svc.rows.contains("a_0_0"));
        assert_eq!(blob.len(), 1);
        assert_eq!(svc.stats().failed_cells, 1);

        assert!(svc.delete(DeleteRequest::new(-1, Some("logits".into()))).await.unwrap());
        assert_eq!(svc.row_count(), 0);
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_condition_spans_versions() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        for (version, id) in [(1, "a_0_0"), (2, "b_0_0")] {
            let request = InsertRequest::from_values(
                version,
                cols(&["reward"]),
                vec![vec![Value::Float(0.0)]],
                Some(vec![id.into()]),
                1,
            );
            assert!(svc.insert(request).await.unwrap());
        }

        assert!(svc.delete(DeleteRequest::new(0, Some("reward == 0".into()))).await.unwrap());
        assert_eq!(svc.row_count(), 0);
    }

    #[tokio::test]
    async fn test_truncate() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut svc = service(&blob);
        seed(&mut svc).await;
        assert!(svc.truncate().await);
        assert_eq!(svc.row_count(), 0);
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_rows_reload() {
        let dir = tempfile::tempdir().unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        let store = Arc::new(MetaStore::open(dir.path().join("meta.redb")).unwrap());
        {
            let mut svc = service(&blob).with_store(store.clone());
            seed(&mut svc).await;
            assert!(svc.delete(DeleteRequest::new(-1, Some("prompt == 'y'".into()))).await.unwrap());
        }

        let rows = RowStore::from_persisted(store.load_rows("t").unwrap());
        let svc = service(&blob).with_rows(rows);
        assert_eq!(svc.row_count(), 2);
        assert_eq!(svc.read_data("c_0_0", "logits").await.unwrap(), Value::Tensor(vec![0.5]));
    }
}
