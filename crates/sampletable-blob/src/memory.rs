//! In-process blob store
//!
//! Used when no external store is configured and by tests. Failures can be
//! injected per operation kind to exercise partial-failure paths.

use crate::{BlobError, BlobResult, BlobStore};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sampletable_common::LocationKey;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Faults {
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

/// Consume one pending fault, if any
fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<LocationKey, Bytes>,
    faults: Faults,
    latency: Option<Duration>,
    bytes_stored: AtomicU64,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, to make in-flight calls observable
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `n` puts
    pub fn fail_next_puts(&self, n: usize) {
        self.faults.puts.store(n, Ordering::Release);
    }

    /// Fail the next `n` gets
    pub fn fail_next_gets(&self, n: usize) {
        self.faults.gets.store(n, Ordering::Release);
    }

    /// Fail the next `n` deletes
    pub fn fail_next_deletes(&self, n: usize) {
        self.faults.deletes.store(n, Ordering::Release);
    }

    #[must_use]
    pub fn contains(&self, key: &LocationKey) -> bool {
        self.objects.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn bytes_stored(&self) -> u64 {
        self.bytes_stored.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, payload: Bytes) -> BlobResult<LocationKey> {
        self.simulate_latency().await;
        if take_fault(&self.faults.puts) {
            return Err(BlobError::Injected("put"));
        }
        let key = LocationKey::new(format!("blob-{}", Uuid::new_v4().simple()));
        self.bytes_stored.fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.objects.insert(key.clone(), payload);
        debug!("Stored {}", key);
        Ok(key)
    }

    async fn get(&self, key: &LocationKey) -> BlobResult<Bytes> {
        self.simulate_latency().await;
        if take_fault(&self.faults.gets) {
            return Err(BlobError::Injected("get"));
        }
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobError::NotFound(key.clone()))
    }

    async fn delete(&self, key: &LocationKey) -> BlobResult<bool> {
        self.simulate_latency().await;
        if take_fault(&self.faults.deletes) {
            return Err(BlobError::Injected("delete"));
        }
        Ok(match self.objects.remove(key) {
            Some((_, payload)) => {
                self.bytes_stored.fetch_sub(payload.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        })
    }
}
