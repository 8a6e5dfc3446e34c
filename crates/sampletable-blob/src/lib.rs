//! SampleTable Blob - large-object store interface
//!
//! By-reference column values live in an external object store addressed by
//! opaque [`LocationKey`]s. This crate defines that interface, the framing
//! used for stored values, and an in-process adapter.

pub mod codec;
pub mod memory;

pub use codec::{decode_value, encode_value};
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use sampletable_common::{LocationKey, Value};
use thiserror::Error;

/// Blob store errors
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(LocationKey),
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt payload for {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("injected {0} failure")]
    Injected(&'static str),
}

pub type BlobResult<T> = Result<T, BlobError>;

impl From<BlobError> for sampletable_common::Error {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Codec(msg) => Self::Codec(msg),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Opaque key-value object store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &str;

    /// Write a payload, returning the key it can be fetched by
    async fn put(&self, payload: Bytes) -> BlobResult<LocationKey>;

    async fn get(&self, key: &LocationKey) -> BlobResult<Bytes>;

    /// Delete an object; `false` when nothing was deleted
    async fn delete(&self, key: &LocationKey) -> BlobResult<bool>;
}

/// Typed value access on top of any [`BlobStore`]
#[async_trait]
pub trait BlobStoreExt: BlobStore {
    async fn put_value(&self, value: &Value) -> BlobResult<LocationKey> {
        self.put(encode_value(value)?).await
    }

    async fn get_value(&self, key: &LocationKey) -> BlobResult<Value> {
        let payload = self.get(key).await?;
        decode_value(&payload).map_err(|e| match e {
            BlobError::Corrupt { reason, .. } => BlobError::Corrupt {
                key: key.to_string(),
                reason,
            },
            other => other,
        })
    }
}

impl<T: BlobStore + ?Sized> BlobStoreExt for T {}
