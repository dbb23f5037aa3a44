//! # Costwise Model Registry
//!
//! Enumerates candidate models across the provider classes and owns every
//! `ModelInfo` in the process. Discovery goes through the [`ModelCatalog`]
//! capability trait so the registry can be exercised without network
//! access; the `costwise-backends` crate provides the real catalogs.
//!
//! Refresh policy: a per-provider TTL (default 24 h) gates automatic
//! refresh, `free_models(true)` forces one, and all remote lookups share a
//! five-minute in-memory window that suppresses thundering herds. Refresh
//! is serialized behind one async mutex; concurrent callers share the
//! in-flight result. A provider failure never invalidates prior data.

mod catalog;
mod error;
mod registry;

pub use catalog::ModelCatalog;
pub use error::{RegistryError, Result};
pub use registry::{ModelRegistry, ProviderStatus, RegistryCachePaths};
