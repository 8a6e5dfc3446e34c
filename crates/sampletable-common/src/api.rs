//! Table service interface and named-instance registry

use crate::error::{Error, Result};
use crate::schema::ColumnInfo;
use crate::types::{
    DeleteRequest, DetachedSamples, InsertRequest, RetrieveRequest, SampleBatch, TableStats,
    WriteRequest,
};
use crate::value::{Cell, Value};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix under which table services are registered
pub const INSTANCE_PREFIX: &str = "SampleTable-";

/// Operations a table service exposes to clients.
///
/// Every call acts on the one table the service owns and is applied as an
/// indivisible unit relative to other calls on the same table.
#[async_trait]
pub trait TableApi: Send + Sync {
    /// Name of the table this service owns
    fn table_name(&self) -> &str;

    /// Schema exchange: names, types and by-value mask
    async fn column_info(&self) -> Result<ColumnInfo>;

    /// Insert rows whose cells are literals or already-written location keys.
    ///
    /// Literal cells in by-reference columns are offloaded by the service.
    async fn insert(&self, request: InsertRequest) -> Result<bool>;

    /// Filtered read returning dereferenced values
    async fn retrieve(&self, request: RetrieveRequest) -> Result<SampleBatch<Value>>;

    /// Filtered read returning stored cells (literals or location keys)
    async fn retrieve_stored(&self, request: RetrieveRequest) -> Result<SampleBatch<Cell>>;

    /// Overwrite a column subset of existing rows
    async fn write(&self, request: WriteRequest) -> Result<bool>;

    /// Delete matching rows and every blob object they reference
    async fn delete(&self, request: DeleteRequest) -> Result<bool>;

    /// Remove matching rows from metadata only, handing their location keys
    /// back to the caller for deletion
    async fn detach(&self, request: DeleteRequest) -> Result<DetachedSamples>;

    async fn stats(&self) -> Result<TableStats>;
}

/// Maps instance names to live table services
#[derive(Default)]
pub struct TableRegistry {
    tables: DashMap<String, Arc<dyn TableApi>>,
}

impl TableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered instance name for a table
    #[must_use]
    pub fn instance_name(table_name: &str) -> String {
        format!("{INSTANCE_PREFIX}{table_name}")
    }

    /// Register a service under its table's instance name
    pub fn register(&self, service: Arc<dyn TableApi>) -> Result<()> {
        let name = Self::instance_name(service.table_name());
        match self.tables.entry(name) {
            Entry::Occupied(_) => {
                Err(Error::TableAlreadyExists(service.table_name().to_string()))
            }
            Entry::Vacant(slot) => {
                info!("Registered table service {}", slot.key());
                slot.insert(service);
                Ok(())
            }
        }
    }

    /// Resolve a table name to its service handle
    pub fn lookup(&self, table_name: &str) -> Result<Arc<dyn TableApi>> {
        let name = Self::instance_name(table_name);
        self.tables
            .get(&name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))
    }

    pub fn unregister(&self, table_name: &str) -> Option<Arc<dyn TableApi>> {
        let removed = self
            .tables
            .remove(&Self::instance_name(table_name))
            .map(|(_, service)| service);
        if removed.is_some() {
            debug!("Unregistered table service for {table_name}");
        }
        removed
    }

    /// Names of every registered table, sorted
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .iter()
            .map(|entry| entry.value().table_name().to_string())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTable(String);

    #[async_trait]
    impl TableApi for StubTable {
        fn table_name(&self) -> &str {
            &self.0
        }

        async fn column_info(&self) -> Result<ColumnInfo> {
            Ok(ColumnInfo {
                column_name: vec![],
                column_type: vec![],
                column_value_mask: vec![],
            })
        }

        async fn insert(&self, _request: InsertRequest) -> Result<bool> {
            Ok(true)
        }

        async fn retrieve(&self, request: RetrieveRequest) -> Result<SampleBatch<Value>> {
            Ok(SampleBatch::empty(&request.column_names))
        }

        async fn retrieve_stored(&self, request: RetrieveRequest) -> Result<SampleBatch<Cell>> {
            Ok(SampleBatch::empty(&request.column_names))
        }

        async fn write(&self, _request: WriteRequest) -> Result<bool> {
            Ok(true)
        }

        async fn delete(&self, _request: DeleteRequest) -> Result<bool> {
            Ok(true)
        }

        async fn detach(&self, _request: DeleteRequest) -> Result<DetachedSamples> {
            Ok(DetachedSamples::default())
        }

        async fn stats(&self) -> Result<TableStats> {
            Ok(TableStats::default())
        }
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(TableRegistry::instance_name("rollouts"), "SampleTable-rollouts");
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = TableRegistry::new();
        registry.register(Arc::new(StubTable("b".into()))).unwrap();
        registry.register(Arc::new(StubTable("a".into()))).unwrap();

        let handle = registry.lookup("a").unwrap();
        assert_eq!(handle.table_name(), "a");
        assert!(handle.column_info().await.unwrap().column_name.is_empty());
        assert_eq!(registry.table_names(), vec!["a", "b"]);

        assert!(matches!(
            registry.register(Arc::new(StubTable("a".into()))),
            Err(Error::TableAlreadyExists(_))
        ));
        assert!(matches!(registry.lookup("c"), Err(Error::TableNotFound(_))));

        assert!(registry.unregister("a").is_some());
        assert!(registry.lookup("a").is_err());
        assert_eq!(registry.len(), 1);
    }
}
