//! SampleTable Client - dual-path table access
//!
//! A [`TableClient`] binds to one table service at a time. Bulk values of
//! by-reference columns move directly between the caller and the blob store;
//! only location keys travel through the table service.

pub mod client;
pub mod pending;

pub use client::TableClient;
pub use pending::PendingRetrieval;
