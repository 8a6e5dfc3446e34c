//! Dual-path table client
//!
//! The client resolves a table service by name, caches its schema and then
//! splits every data call: by-reference payloads are written to and read
//! from the blob store directly, while the table service only ever sees
//! location keys for those columns.

use crate::pending::PendingRetrieval;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use sampletable_blob::{BlobStore, BlobStoreExt};
use sampletable_common::config::ClientConfig;
use sampletable_common::{
    Cell, ColumnInfo, ColumnSpec, DeleteRequest, Error, InsertRequest, LocationKey, Result,
    RetrieveRequest, SampleBatch, TableApi, TableRegistry, TableSchema, Value, WriteRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The table a client is bound to and the schema fetched at connect time
struct TableBinding {
    table_name: String,
    service: Arc<dyn TableApi>,
    schema: Arc<TableSchema>,
}

pub struct TableClient {
    registry: Arc<TableRegistry>,
    blob: Arc<dyn BlobStore>,
    max_concurrent_ops: usize,
    binding: RwLock<Option<Arc<TableBinding>>>,
}

fn retrieve_request(
    policy_version: i64,
    column_names: Vec<String>,
    batch_size: i64,
    condition: Option<String>,
) -> RetrieveRequest {
    let request = RetrieveRequest::new(policy_version, column_names).batch_size(batch_size);
    match condition {
        Some(condition) => request.condition(condition),
        None => request,
    }
}

/// Coerce a literal cell in place to its column type
fn cast_cell(schema: &TableSchema, column: &str, cell: &mut Option<Cell>) -> Result<()> {
    if let Some(Cell::Value(value)) = cell {
        *value = schema.cast(column, std::mem::take(value))?;
    }
    Ok(())
}

impl TableClient {
    #[must_use]
    pub fn new(registry: Arc<TableRegistry>, blob: Arc<dyn BlobStore>, config: &ClientConfig) -> Self {
        Self {
            registry,
            blob,
            max_concurrent_ops: config.max_concurrent_blob_ops.max(1),
            binding: RwLock::new(None),
        }
    }

    /// Bind to `table_name`, replacing any previous binding.
    ///
    /// On failure the previous binding (if any) is kept.
    pub async fn connect(&self, table_name: &str) -> bool {
        match self.resolve(table_name).await {
            Ok(binding) => {
                info!(
                    "Connected to table {} ({} columns)",
                    table_name,
                    binding.schema.len()
                );
                *self.binding.write() = Some(Arc::new(binding));
                true
            }
            Err(e) => {
                warn!("Failed to connect to table {}: {}", table_name, e);
                false
            }
        }
    }

    async fn resolve(&self, table_name: &str) -> Result<TableBinding> {
        let service = self.registry.lookup(table_name)?;
        let info = service.column_info().await?;
        let schema = TableSchema::from_info(&info)?;
        Ok(TableBinding {
            table_name: table_name.to_string(),
            service,
            schema: Arc::new(schema),
        })
    }

    fn bound(&self) -> Result<Arc<TableBinding>> {
        self.binding.read().clone().ok_or(Error::NotConnected)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.binding.read().is_some()
    }

    /// Name of the bound table
    #[must_use]
    pub fn table_name(&self) -> Option<String> {
        self.binding.read().as_ref().map(|b| b.table_name.clone())
    }

    /// Schema cached at connect time
    pub fn column_info(&self) -> Result<ColumnInfo> {
        Ok(self.bound()?.schema.column_info())
    }

    // ---- Insert / write ----

    /// Insert rows, writing by-reference payloads to the blob store first.
    ///
    /// A failed client-side blob write leaves that cell unwritten and makes
    /// the call return `false`. If the service rejects the request, the
    /// objects written for it are deleted again.
    pub async fn insert_samples(
        &self,
        policy_version: i64,
        column_names: Vec<String>,
        sample_value: Vec<Vec<Value>>,
        sample_id: Option<Vec<String>>,
        rollout_n: u32,
    ) -> Result<bool> {
        let binding = self.bound()?;
        let mut request =
            InsertRequest::from_values(policy_version, column_names, sample_value, sample_id, rollout_n);
        request.validate_shape()?;
        let columns = binding.schema.resolve_columns(&request.column_names)?;
        for row in &mut request.rows {
            for (name, cell) in request.column_names.iter().zip(row.iter_mut()) {
                cast_cell(&binding.schema, name, cell)?;
            }
        }

        let by_reference: Vec<bool> = columns
            .iter()
            .map(|&idx| binding.schema.columns()[idx].is_by_reference())
            .collect();
        let mut slots = Vec::new();
        for row in &mut request.rows {
            for (cell, &is_ref) in row.iter_mut().zip(&by_reference) {
                if is_ref {
                    slots.push(cell);
                }
            }
        }
        let written = self.offload(slots).await;

        match binding.service.insert(request).await {
            Ok(ok) => Ok(ok),
            Err(e) => {
                self.discard(written).await;
                Err(e)
            }
        }
    }

    /// Overwrite columns of existing rows, writing by-reference payloads to
    /// the blob store first. Entries of `values` outside `column_names` are
    /// ignored.
    pub async fn write_sample_columns(
        &self,
        sample_ids: Vec<String>,
        column_names: Vec<String>,
        values: HashMap<String, Vec<Value>>,
    ) -> Result<bool> {
        let binding = self.bound()?;
        let mut request = WriteRequest::from_values(sample_ids, column_names, values);
        request.validate_shape()?;
        binding.schema.resolve_columns(&request.column_names)?;
        // Only named columns are written; anything else would orphan objects
        let column_names = &request.column_names;
        request.values.retain(|name, _| column_names.contains(name));
        for (name, cells) in &mut request.values {
            for cell in cells.iter_mut() {
                cast_cell(&binding.schema, name, cell)?;
            }
        }

        let slots: Vec<&mut Option<Cell>> = request
            .values
            .iter_mut()
            .filter(|(name, _)| binding.schema.column(name).is_some_and(ColumnSpec::is_by_reference))
            .flat_map(|(_, cells)| cells.iter_mut())
            .collect();
        let written = self.offload(slots).await;

        match binding.service.write(request).await {
            Ok(ok) => Ok(ok),
            Err(e) => {
                self.discard(written).await;
                Err(e)
            }
        }
    }

    /// Replace literal values in `slots` with the keys they were written
    /// under; a failed write empties its slot. Returns the keys written.
    async fn offload(&self, mut slots: Vec<&mut Option<Cell>>) -> Vec<LocationKey> {
        let pending: Vec<(usize, Value)> = slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match slot.take() {
                Some(Cell::Value(value)) => Some((i, value)),
                other => {
                    **slot = other;
                    None
                }
            })
            .collect();

        let blob = &self.blob;
        let results: Vec<(usize, Option<LocationKey>)> = stream::iter(pending)
            .map(|(i, value)| async move {
                match blob.put_value(&value).await {
                    Ok(key) => (i, Some(key)),
                    Err(e) => {
                        warn!("Client-side blob write to {} failed: {}", blob.name(), e);
                        (i, None)
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_ops)
            .collect()
            .await;

        let mut written = Vec::with_capacity(results.len());
        for (i, key) in results {
            if let Some(key) = key {
                written.push(key.clone());
                *slots[i] = Some(Cell::Key(key));
            }
        }
        written
    }

    /// Best-effort removal of objects written for a rejected request
    async fn discard(&self, keys: Vec<LocationKey>) {
        let count = keys.len();
        let failed = self.delete_keys(keys).await;
        debug!("Discarded {} orphaned objects ({} failed)", count, failed);
    }

    /// Delete objects concurrently, returning how many deletes failed
    async fn delete_keys(&self, keys: Vec<LocationKey>) -> usize {
        let blob = &self.blob;
        let results: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                match blob.delete(&key).await {
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
        results.into_iter().filter(|ok| !ok).count()
    }

    // ---- Retrieve ----

    /// Filtered read returning actual values for every requested column
    pub async fn retrieve_sample_columns(
        &self,
        policy_version: i64,
        column_names: Vec<String>,
        batch_size: i64,
        condition: Option<String>,
    ) -> Result<SampleBatch<Value>> {
        let binding = self.bound()?;
        let request = retrieve_request(policy_version, column_names, batch_size, condition);
        let column_names = request.column_names.clone();
        let stored = binding.service.retrieve_stored(request).await?;
        let columns = self
            .retrieve_sample_column_values(&column_names, &stored.sample_ids, stored.columns)
            .await?;
        Ok(SampleBatch {
            sample_ids: stored.sample_ids,
            columns,
        })
    }

    /// Start the metadata half of a retrieval without waiting for it.
    ///
    /// The handle resolves to sample ids and stored cells; pass those to
    /// [`Self::retrieve_sample_column_values`] to fetch the values.
    pub fn retrieve_sample_column_keys_async(
        &self,
        policy_version: i64,
        column_names: Vec<String>,
        batch_size: i64,
        condition: Option<String>,
    ) -> Result<PendingRetrieval> {
        let binding = self.bound()?;
        let request = retrieve_request(policy_version, column_names, batch_size, condition);
        let handle = tokio::spawn(async move { binding.service.retrieve_stored(request).await });
        Ok(PendingRetrieval::new(handle))
    }

    /// Resolve stored cells to typed values, fetching location keys from
    /// the blob store
    pub async fn retrieve_sample_column_values(
        &self,
        column_names: &[String],
        sample_ids: &[String],
        mut sample_keys: HashMap<String, Vec<Cell>>,
    ) -> Result<HashMap<String, Vec<Value>>> {
        let binding = self.bound()?;
        let mut out = HashMap::with_capacity(column_names.len());
        for name in column_names {
            let cells = sample_keys
                .remove(name)
                .ok_or_else(|| Error::shape(format!("no stored cells for column {name}")))?;
            if cells.len() != sample_ids.len() {
                return Err(Error::shape(format!(
                    "column {name} has {} cells for {} samples",
                    cells.len(),
                    sample_ids.len()
                )));
            }
            let values: Vec<Value> = stream::iter(cells)
                .map(|cell| self.resolve_cell(cell))
                .buffered(self.max_concurrent_ops)
                .try_collect()
                .await?;
            let values = values
                .into_iter()
                .map(|value| binding.schema.cast(name, value))
                .collect::<Result<Vec<_>>>()?;
            out.insert(name.clone(), values);
        }
        Ok(out)
    }

    async fn resolve_cell(&self, cell: Cell) -> Result<Value> {
        match cell {
            Cell::Value(value) => Ok(value),
            Cell::Key(key) => self.blob.get_value(&key).await.map_err(|e| {
                warn!("Failed to read blob object {}: {}", key, e);
                Error::from(e)
            }),
        }
    }

    // ---- Delete ----

    /// Delete matching rows, then their by-reference objects.
    ///
    /// Returns `false` if any object could not be deleted or a candidate row
    /// was left in place because its condition values could not be read.
    pub async fn delete_samples(&self, policy_version: i64, condition: Option<String>) -> Result<bool> {
        let binding = self.bound()?;
        let request = DeleteRequest::new(policy_version, condition);
        request.validate()?;
        let detached = binding.service.detach(request).await?;
        let rows = detached.sample_ids.len();
        let objects = detached.keys.len();
        let failed = self.delete_keys(detached.keys).await;
        debug!(
            "Deleted {} rows from {} ({} objects, {} failed, {} rows unreadable)",
            rows, binding.table_name, objects, failed, detached.unreadable
        );
        Ok(failed == 0 && detached.unreadable == 0)
    }

    /// Coerce raw values into the declared type of `column_name`
    pub fn cast_value(&self, column_name: &str, raw_values: Vec<Value>) -> Result<Vec<Value>> {
        let binding = self.bound()?;
        binding.schema.require(column_name)?;
        raw_values
            .into_iter()
            .map(|value| binding.schema.cast(column_name, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sampletable_blob::MemoryBlobStore;
    use sampletable_common::{ColumnType, DetachedSamples, StorageMode, TableStats};

    /// Keeps inserted rows verbatim so tests can inspect what the service saw
    #[derive(Default)]
    struct RecordingTable {
        rows: Mutex<Vec<(String, Vec<Option<Cell>>)>>,
        writes: Mutex<Vec<WriteRequest>>,
        reject: bool,
    }

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSpec::new("prompt", ColumnType::Str, StorageMode::ByValue),
            ColumnSpec::new("logits", ColumnType::Tensor, StorageMode::ByReference),
        ])
        .unwrap()
    }

    #[async_trait]
    impl TableApi for RecordingTable {
        fn table_name(&self) -> &str {
            "t"
        }

        async fn column_info(&self) -> Result<ColumnInfo> {
            Ok(schema().column_info())
        }

        async fn insert(&self, request: InsertRequest) -> Result<bool> {
            if self.reject {
                return Err(Error::DuplicateSampleId("a_0_0".into()));
            }
            let mut rows = self.rows.lock();
            let mut ok = true;
            for cells in request.rows {
                ok &= cells.iter().all(Option::is_some);
                let id = format!("s{}_0_0", rows.len());
                rows.push((id, cells));
            }
            Ok(ok)
        }

        async fn retrieve(&self, _request: RetrieveRequest) -> Result<SampleBatch<Value>> {
            Err(Error::internal("unsupported"))
        }

        async fn retrieve_stored(&self, request: RetrieveRequest) -> Result<SampleBatch<Cell>> {
            let mut batch = SampleBatch::empty(&request.column_names);
            for (id, cells) in self.rows.lock().iter() {
                batch.sample_ids.push(id.clone());
                for (j, name) in ["prompt", "logits"].iter().enumerate() {
                    if let Some(column) = batch.columns.get_mut(*name) {
                        column.push(cells[j].clone().unwrap_or(Cell::Value(Value::Null)));
                    }
                }
            }
            Ok(batch)
        }

        async fn write(&self, request: WriteRequest) -> Result<bool> {
            if self.reject {
                return Err(Error::SampleNotFound("x_0_0".into()));
            }
            self.writes.lock().push(request);
            Ok(true)
        }

        async fn delete(&self, _request: DeleteRequest) -> Result<bool> {
            Err(Error::internal("unsupported"))
        }

        async fn detach(&self, _request: DeleteRequest) -> Result<DetachedSamples> {
            let rows = std::mem::take(&mut *self.rows.lock());
            let mut detached = DetachedSamples::default();
            for (id, cells) in rows {
                detached
                    .keys
                    .extend(cells.iter().flatten().filter_map(Cell::as_key).cloned());
                detached.sample_ids.push(id);
            }
            Ok(detached)
        }

        async fn stats(&self) -> Result<TableStats> {
            Ok(TableStats::default())
        }
    }

    async fn connected(table: RecordingTable) -> (TableClient, Arc<RecordingTable>, Arc<MemoryBlobStore>) {
        let registry = Arc::new(TableRegistry::new());
        let table = Arc::new(table);
        registry.register(table.clone()).unwrap();
        let blob = Arc::new(MemoryBlobStore::new());
        let client = TableClient::new(registry, blob.clone(), &ClientConfig::default());
        assert!(client.connect("t").await);
        (client, table, blob)
    }

    fn cols() -> Vec<String> {
        vec!["prompt".into(), "logits".into()]
    }

    fn values(n: usize) -> Vec<Vec<Value>> {
        (0..n)
            .map(|i| vec![Value::from(format!("p{i}")), Value::List(vec![Value::Int(i as i64)])])
            .collect()
    }

    #[tokio::test]
    async fn test_unbound_client_rejects_calls() {
        let client = TableClient::new(
            Arc::new(TableRegistry::new()),
            Arc::new(MemoryBlobStore::new()),
            &ClientConfig::default(),
        );
        assert!(!client.connect("missing").await);
        assert!(!client.is_connected());
        assert!(matches!(
            client.insert_samples(1, cols(), values(1), None, 1).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            client.retrieve_sample_column_keys_async(1, cols(), -1, None),
            Err(Error::NotConnected)
        ));
        assert!(matches!(client.delete_samples(1, None).await, Err(Error::NotConnected)));
        assert!(matches!(client.cast_value("prompt", vec![]), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_insert_sends_keys_for_reference_columns() {
        let (client, table, blob) = connected(RecordingTable::default()).await;
        assert_eq!(client.table_name().as_deref(), Some("t"));
        assert!(client.insert_samples(1, cols(), values(3), None, 1).await.unwrap());
        assert_eq!(blob.len(), 3);

        let rows = table.rows.lock();
        assert_eq!(rows[0].1[0], Some(Cell::Value(Value::from("p0"))));
        assert!(rows.iter().all(|(_, cells)| cells[1].as_ref().and_then(Cell::as_key).is_some()));
    }

    #[tokio::test]
    async fn test_failed_blob_write_is_reported() {
        let (client, table, blob) = connected(RecordingTable::default()).await;
        blob.fail_next_puts(1);
        assert!(!client.insert_samples(1, cols(), values(2), None, 1).await.unwrap());
        assert_eq!(blob.len(), 1);
        assert_eq!(table.rows.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_insert_discards_objects() {
        let table = RecordingTable {
            reject: true,
            ..RecordingTable::default()
        };
        let (client, _table, blob) = connected(table).await;
        let result = client.insert_samples(1, cols(), values(2), None, 1).await;
        assert!(matches!(result, Err(Error::DuplicateSampleId(_))));
        assert!(blob.is_empty());

        let mut update = HashMap::new();
        update.insert("logits".to_string(), vec![Value::from(vec![1.0])]);
        let result = client
            .write_sample_columns(vec!["x_0_0".into()], vec!["logits".into()], update)
            .await;
        assert!(matches!(result, Err(Error::SampleNotFound(_))));
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn test_write_ignores_values_outside_named_columns() {
        let (client, table, blob) = connected(RecordingTable::default()).await;
        let mut update = HashMap::new();
        update.insert("prompt".to_string(), vec![Value::from("b")]);
        update.insert("logits".to_string(), vec![Value::from(vec![9.0])]);
        assert!(
            client
                .write_sample_columns(vec!["s0_0_0".into()], vec!["prompt".into()], update)
                .await
                .unwrap()
        );
        assert!(blob.is_empty());

        let writes = table.writes.lock();
        assert_eq!(writes.len(), 1);
        assert!(!writes[0].values.contains_key("logits"));
        assert_eq!(writes[0].values["prompt"], vec![Some(Cell::Value(Value::from("b")))]);
    }

    #[tokio::test]
    async fn test_type_errors_precede_blob_writes() {
        let (client, _table, blob) = connected(RecordingTable::default()).await;
        let bad = vec![vec![Value::from("p"), Value::from("not a tensor")]];
        assert!(matches!(
            client.insert_samples(1, cols(), bad, None, 1).await,
            Err(Error::TypeMismatch { .. })
        ));
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_dereferences_and_casts() {
        let (client, _table, _blob) = connected(RecordingTable::default()).await;
        client.insert_samples(1, cols(), values(2), None, 1).await.unwrap();

        let batch = client.retrieve_sample_columns(1, cols(), -1, None).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.column("logits").unwrap()[1], Value::Tensor(vec![1.0]));

        let pending = client
            .retrieve_sample_column_keys_async(1, vec!["logits".into()], -1, None)
            .unwrap();
        let stored = pending.wait().await.unwrap();
        assert!(stored.column("logits").unwrap()[0].as_key().is_some());
        let values = client
            .retrieve_sample_column_values(&["logits".to_string()], &stored.sample_ids, stored.columns)
            .await
            .unwrap();
        assert_eq!(values["logits"][0], Value::Tensor(vec![0.0]));
    }

    #[tokio::test]
    async fn test_delete_removes_objects() {
        let (client, _table, blob) = connected(RecordingTable::default()).await;
        client.insert_samples(1, cols(), values(2), None, 1).await.unwrap();
        assert!(matches!(client.delete_samples(-1, None).await, Err(Error::UnfilteredDelete)));
        assert!(client.delete_samples(1, None).await.unwrap());
        assert!(blob.is_empty());
    }

    #[tokio::test]
    async fn test_cast_value() {
        let (client, _table, _blob) = connected(RecordingTable::default()).await;
        let cast = client
            .cast_value("logits", vec![Value::List(vec![Value::Int(1), Value::Float(0.5)]), Value::Null])
            .unwrap();
        assert_eq!(cast, vec![Value::Tensor(vec![1.0, 0.5]), Value::Null]);
        assert!(client.cast_value("nope", vec![]).is_err());
    }
}
