//! Client-facing handle to a table worker

use crate::actor::TableCommand;
use async_trait::async_trait;
use sampletable_common::{
    Cell, ColumnInfo, DeleteRequest, DetachedSamples, Error, InsertRequest, Result,
    RetrieveRequest, SampleBatch, TableApi, TableSchema, TableStats, Value, WriteRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Cheap, cloneable handle to one table's worker.
///
/// Calls are queued on the worker's channel; once the worker has stopped
/// every call fails with [`Error::ServiceUnavailable`].
#[derive(Clone)]
pub struct TableHandle {
    name: String,
    schema: Arc<TableSchema>,
    tx: mpsc::Sender<TableCommand>,
}

impl TableHandle {
    #[must_use]
    pub const fn new(name: String, schema: Arc<TableSchema>, tx: mpsc::Sender<TableCommand>) -> Self {
        Self { name, schema, tx }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// True while the worker accepts commands
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> TableCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| Error::ServiceUnavailable(self.name.clone()))?;
        reply_rx
            .await
            .map_err(|_| Error::ServiceUnavailable(self.name.clone()))
    }

    /// Insert literal rows; the service offloads by-reference columns itself
    pub async fn insert_samples(
        &self,
        policy_version: i64,
        column_names: Vec<String>,
        sample_value: Vec<Vec<Value>>,
        sample_id: Option<Vec<String>>,
        rollout_n: u32,
    ) -> Result<bool> {
        let request =
            InsertRequest::from_values(policy_version, column_names, sample_value, sample_id, rollout_n);
        self.insert(request).await
    }

    pub async fn retrieve_sample_columns(
        &self,
        policy_version: i64,
        column_names: Vec<String>,
        batch_size: i64,
        condition: Option<String>,
    ) -> Result<SampleBatch<Value>> {
        let mut request = RetrieveRequest::new(policy_version, column_names).batch_size(batch_size);
        if let Some(condition) = condition {
            request = request.condition(condition);
        }
        self.retrieve(request).await
    }

    pub async fn write_sample_columns(
        &self,
        sample_ids: Vec<String>,
        column_names: Vec<String>,
        values: HashMap<String, Vec<Value>>,
    ) -> Result<bool> {
        self.write(WriteRequest::from_values(sample_ids, column_names, values))
            .await
    }

    pub async fn delete_samples(&self, policy_version: i64, condition: Option<String>) -> Result<bool> {
        self.delete(DeleteRequest::new(policy_version, condition)).await
    }

    /// Remove every row and blob object in the table
    pub async fn truncate(&self) -> Result<bool> {
        self.call(TableCommand::Truncate).await
    }

    /// Stop the worker; later calls fail with `ServiceUnavailable`
    pub async fn shutdown(&self) -> Result<()> {
        self.call(TableCommand::Shutdown).await
    }
}

#[async_trait]
impl TableApi for TableHandle {
    fn table_name(&self) -> &str {
        &self.name
    }

    async fn column_info(&self) -> Result<ColumnInfo> {
        if self.tx.is_closed() {
            return Err(Error::ServiceUnavailable(self.name.clone()));
        }
        Ok(self.schema.column_info())
    }

    async fn insert(&self, request: InsertRequest) -> Result<bool> {
        self.call(|reply| TableCommand::Insert(request, reply)).await?
    }

    async fn retrieve(&self, request: RetrieveRequest) -> Result<SampleBatch<Value>> {
        self.call(|reply| TableCommand::Retrieve(request, reply)).await?
    }

    async fn retrieve_stored(&self, request: RetrieveRequest) -> Result<SampleBatch<Cell>> {
        self.call(|reply| TableCommand::RetrieveStored(request, reply)).await?
    }

    async fn write(&self, request: WriteRequest) -> Result<bool> {
        self.call(|reply| TableCommand::Write(request, reply)).await?
    }

    async fn delete(&self, request: DeleteRequest) -> Result<bool> {
        self.call(|reply| TableCommand::Delete(request, reply)).await?
    }

    async fn detach(&self, request: DeleteRequest) -> Result<DetachedSamples> {
        self.call(|reply| TableCommand::Detach(request, reply)).await?
    }

    async fn stats(&self) -> Result<TableStats> {
        self.call(TableCommand::Stats).await
    }
}
