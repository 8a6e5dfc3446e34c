//! SampleTable Metadata Store - durable row metadata
//!
//! Persists table schemas and row metadata (literal cells and location keys)
//! so a restarted service can reload its tables.

pub mod store;
pub mod tables;
pub mod types;

// Re-exports
pub use store::{MetaStore, MetaStoreError, MetaStoreResult};
pub use types::StoredRow;
