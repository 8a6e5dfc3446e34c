//! SampleTable Table Service
//!
//! Each table is owned by one [`service::TableService`] driven by a single
//! worker loop. Clients reach it through a [`handle::TableHandle`], which
//! implements [`sampletable_common::TableApi`] and is registered by name in
//! the host's [`sampletable_common::TableRegistry`].

pub mod actor;
pub mod handle;
pub mod host;
pub mod rows;
pub mod service;

pub use handle::TableHandle;
pub use host::TableHost;
pub use service::TableService;
