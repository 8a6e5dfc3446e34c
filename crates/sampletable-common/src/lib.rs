//! SampleTable Common - Shared types and utilities
//!
//! This crate provides the value model, table schema, sample identifiers,
//! error definitions, configuration and the service interface used by
//! every SampleTable component.

pub mod api;
pub mod config;
pub mod error;
pub mod sample_id;
pub mod schema;
pub mod types;
pub mod value;

pub use api::{TableApi, TableRegistry};
pub use config::Config;
pub use error::{Error, Result};
pub use sample_id::{SampleId, SampleIdGenerator};
pub use schema::{ColumnInfo, ColumnSpec, ColumnType, StorageMode, TableSchema};
pub use types::*;
pub use value::{Cell, LocationKey, Value};
