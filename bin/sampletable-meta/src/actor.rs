//! Per-table worker loop
//!
//! Requests reach a table's [`TableService`] through a bounded channel and
//! are processed one at a time, in arrival order.

use crate::service::TableService;
use sampletable_common::{
    Cell, DeleteRequest, DetachedSamples, InsertRequest, Result, RetrieveRequest, SampleBatch,
    TableStats, Value, WriteRequest,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

type Reply<T> = oneshot::Sender<T>;

/// Commands accepted by the table worker
pub enum TableCommand {
    Insert(InsertRequest, Reply<Result<bool>>),
    Retrieve(RetrieveRequest, Reply<Result<SampleBatch<Value>>>),
    RetrieveStored(RetrieveRequest, Reply<Result<SampleBatch<Cell>>>),
    Write(WriteRequest, Reply<Result<bool>>),
    Delete(DeleteRequest, Reply<Result<bool>>),
    Detach(DeleteRequest, Reply<Result<DetachedSamples>>),
    Truncate(Reply<bool>),
    Stats(Reply<TableStats>),
    /// Stop; acknowledged once the service has been dropped. Queued
    /// commands behind it are dropped.
    Shutdown(Reply<()>),
}

impl TableCommand {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Insert(..) => "insert",
            Self::Retrieve(..) => "retrieve",
            Self::RetrieveStored(..) => "retrieve_stored",
            Self::Write(..) => "write",
            Self::Delete(..) => "delete",
            Self::Detach(..) => "detach",
            Self::Truncate(..) => "truncate",
            Self::Stats(..) => "stats",
            Self::Shutdown(..) => "shutdown",
        }
    }
}

/// Spawn the worker for `service`, returning its command channel
pub fn spawn(service: TableService, queue_depth: usize) -> mpsc::Sender<TableCommand> {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    tokio::spawn(run(service, rx));
    tx
}

/// Serve commands until the channel closes or a shutdown arrives.
///
/// A caller that stopped waiting for its reply does not stop the worker.
pub async fn run(mut service: TableService, mut rx: mpsc::Receiver<TableCommand>) {
    info!("Table worker for {} started", service.name());
    let mut shutdown_ack = None;
    while let Some(command) = rx.recv().await {
        debug!("{}: {}", service.name(), command.kind());
        match command {
            TableCommand::Insert(request, reply) => {
                let _ = reply.send(service.insert(request).await);
            }
            TableCommand::Retrieve(request, reply) => {
                let _ = reply.send(service.retrieve(request).await);
            }
            TableCommand::RetrieveStored(request, reply) => {
                let _ = reply.send(service.retrieve_stored(request).await);
            }
            TableCommand::Write(request, reply) => {
                let _ = reply.send(service.write(request).await);
            }
            TableCommand::Delete(request, reply) => {
                let _ = reply.send(service.delete(request).await);
            }
            TableCommand::Detach(request, reply) => {
                let _ = reply.send(service.detach(request).await);
            }
            TableCommand::Truncate(reply) => {
                let _ = reply.send(service.truncate().await);
            }
            TableCommand::Stats(reply) => {
                let _ = reply.send(service.stats());
            }
            TableCommand::Shutdown(reply) => {
                shutdown_ack = Some(reply);
                break;
            }
        }
    }
    let name = service.name().to_string();
    drop(rx);
    drop(service);
    info!("Table worker for {} stopped", name);
    if let Some(reply) = shutdown_ack {
        let _ = reply.send(());
    }
}
