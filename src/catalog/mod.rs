//! Catalog module
//!
//! Provider, endpoint, key and model-mapping data consumed read-only by routing.

pub mod models;
pub mod store;

pub use models::{BillingType, Capability, Endpoint, GlobalModel, Key, ModelMapping, Provider};
pub use store::{Catalog, CatalogData, CatalogError, CatalogStore};
