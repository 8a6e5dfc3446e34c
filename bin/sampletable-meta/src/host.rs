//! Table lifecycle: create, restore, drop
//!
//! The host owns the shared blob store and optional metadata store, spawns a
//! worker per table and keeps the registry clients resolve names through.

use crate::actor;
use crate::handle::TableHandle;
use crate::rows::RowStore;
use crate::service::TableService;
use parking_lot::RwLock;
use sampletable_blob::BlobStore;
use sampletable_common::config::{ServiceConfig, TableConfig};
use sampletable_common::{Error, Result, TableApi, TableRegistry, TableSchema, TableStats};
use sampletable_meta_store::MetaStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the metadata database inside `data_dir`
pub const META_DB_FILE: &str = "sampletable.redb";

pub struct TableHost {
    registry: Arc<TableRegistry>,
    blob: Arc<dyn BlobStore>,
    store: Option<Arc<MetaStore>>,
    config: ServiceConfig,
    tables: RwLock<HashMap<String, TableHandle>>,
}

impl TableHost {
    /// Create a host; opens the metadata store when `config.data_dir` is set
    pub fn new(config: ServiceConfig, blob: Arc<dyn BlobStore>) -> Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => {
                let store = MetaStore::open(dir.join(META_DB_FILE))?;
                info!("Persisting table metadata under {}", dir.display());
                Some(Arc::new(store))
            }
            None => None,
        };
        Ok(Self {
            registry: Arc::new(TableRegistry::new()),
            blob,
            store,
            config,
            tables: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn registry(&self) -> Arc<TableRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn blob(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.blob)
    }

    /// Create a table and start serving it
    pub fn create_table(&self, name: &str, schema: TableSchema) -> Result<TableHandle> {
        if name.is_empty() {
            return Err(Error::invalid_argument("table name must not be empty"));
        }
        let handle = self.start(name, Arc::new(schema), RowStore::new(), true)?;
        info!("Created table {}", name);
        Ok(handle)
    }

    /// Create the tables declared in configuration that do not exist yet
    pub fn create_configured(&self, tables: &[TableConfig]) -> Result<usize> {
        let mut created = 0;
        for table in tables {
            if self.tables.read().contains_key(&table.name) {
                let existing = self.handle(&table.name)?;
                if **existing.schema() != table.schema()? {
                    warn!(
                        "Table {} already exists with a different schema; keeping the stored one",
                        table.name
                    );
                }
                continue;
            }
            self.create_table(&table.name, table.schema()?)?;
            created += 1;
        }
        Ok(created)
    }

    /// Restart every table found in the metadata store
    pub fn restore(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let schemas = store.load_schemas()?;
        let count = schemas.len();
        for (name, schema) in schemas {
            let rows = RowStore::from_persisted(store.load_rows(&name)?);
            info!("Restoring table {} with {} rows", name, rows.len());
            self.start(&name, Arc::new(schema), rows, false)?;
        }
        Ok(count)
    }

    /// Spawn and register a table worker; with `persist_schema` the schema
    /// is written to the metadata store once the table is registered
    fn start(
        &self,
        name: &str,
        schema: Arc<TableSchema>,
        rows: RowStore,
        persist_schema: bool,
    ) -> Result<TableHandle> {
        let mut service = TableService::new(name, Arc::clone(&schema), Arc::clone(&self.blob), &self.config)
            .with_rows(rows);
        if let Some(store) = &self.store {
            service = service.with_store(Arc::clone(store));
        }

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(Error::TableAlreadyExists(name.to_string()));
        }
        let tx = actor::spawn(service, self.config.request_queue_depth);
        let handle = TableHandle::new(name.to_string(), schema, tx);
        // Dropping the only handle on failure closes the channel and stops the worker
        self.registry.register(Arc::new(handle.clone()))?;
        tables.insert(name.to_string(), handle.clone());
        if persist_schema {
            if let Some(store) = &self.store {
                store.put_schema(name, handle.schema());
            }
        }
        Ok(handle)
    }

    pub fn handle(&self, name: &str) -> Result<TableHandle> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete every row and blob object, stop the worker and forget the table
    pub async fn drop_table(&self, name: &str) -> Result<bool> {
        let handle = self
            .tables
            .write()
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        self.registry.unregister(name);
        let clean = handle.truncate().await?;
        handle.shutdown().await?;
        if let Some(store) = &self.store {
            store.delete_table(name);
        }
        info!("Dropped table {}", name);
        Ok(clean)
    }

    /// Stats for every table, sorted by name
    pub async fn stats(&self) -> Vec<TableStats> {
        let handles: Vec<TableHandle> = {
            let tables = self.tables.read();
            let mut handles: Vec<_> = tables.values().cloned().collect();
            handles.sort_by(|a, b| a.table_name().cmp(b.table_name()));
            handles
        };
        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.stats().await {
                Ok(s) => stats.push(s),
                Err(e) => warn!("Failed to collect stats: {}", e),
            }
        }
        stats
    }

    /// Stop every worker; rows stay persisted when a metadata store is open
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, TableHandle)> = self.tables.write().drain().collect();
        for (name, handle) in handles {
            self.registry.unregister(&name);
            if let Err(e) = handle.shutdown().await {
                warn!("Table {} did not shut down cleanly: {}", name, e);
            }
        }
    }
}
