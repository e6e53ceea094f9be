//! Catalog snapshot store
//!
//! Holds the current catalog behind an `Arc` so readers take a cheap
//! snapshot per request while reloads swap the whole thing atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::models::{Endpoint, GlobalModel, Key, ModelMapping, Provider};

/// Errors raised while loading or validating a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("{kind} {id} references unknown {target} {target_id}")]
    DanglingReference {
        kind: &'static str,
        id: String,
        target: &'static str,
        target_id: String,
    },

    #[error("catalog was not loaded from a file")]
    NoSource,
}

/// On-disk catalog layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(default)]
    pub global_models: Vec<GlobalModel>,
    #[serde(default)]
    pub model_mappings: Vec<ModelMapping>,
}

/// Validated, indexed catalog
#[derive(Debug, Default)]
pub struct Catalog {
    providers: HashMap<String, Provider>,
    endpoints: HashMap<String, Endpoint>,
    keys: HashMap<String, Key>,
    global_models: HashMap<String, GlobalModel>,
    mappings: Vec<ModelMapping>,
    keys_by_endpoint: HashMap<String, Vec<String>>,
    endpoints_by_provider: HashMap<String, Vec<String>>,
}

impl Catalog {
    /// Build an indexed catalog, rejecting duplicate ids and dangling references
    pub fn build(data: CatalogData) -> Result<Self, CatalogError> {
        let mut catalog = Catalog::default();

        for provider in data.providers {
            if catalog.providers.contains_key(&provider.id) {
                return Err(CatalogError::DuplicateId {
                    kind: "provider",
                    id: provider.id,
                });
            }
            catalog.providers.insert(provider.id.clone(), provider);
        }

        for endpoint in data.endpoints {
            if !catalog.providers.contains_key(&endpoint.provider_id) {
                return Err(CatalogError::DanglingReference {
                    kind: "endpoint",
                    id: endpoint.id,
                    target: "provider",
                    target_id: endpoint.provider_id,
                });
            }
            if catalog.endpoints.contains_key(&endpoint.id) {
                return Err(CatalogError::DuplicateId {
                    kind: "endpoint",
                    id: endpoint.id,
                });
            }
            catalog
                .endpoints_by_provider
                .entry(endpoint.provider_id.clone())
                .or_default()
                .push(endpoint.id.clone());
            catalog.endpoints.insert(endpoint.id.clone(), endpoint);
        }

        for key in data.keys {
            if !catalog.endpoints.contains_key(&key.endpoint_id) {
                return Err(CatalogError::DanglingReference {
                    kind: "key",
                    id: key.id,
                    target: "endpoint",
                    target_id: key.endpoint_id,
                });
            }
            if catalog.keys.contains_key(&key.id) {
                return Err(CatalogError::DuplicateId {
                    kind: "key",
                    id: key.id,
                });
            }
            catalog
                .keys_by_endpoint
                .entry(key.endpoint_id.clone())
                .or_default()
                .push(key.id.clone());
            catalog.keys.insert(key.id.clone(), key);
        }

        for model in data.global_models {
            if catalog.global_models.contains_key(&model.name) {
                return Err(CatalogError::DuplicateId {
                    kind: "global model",
                    id: model.name,
                });
            }
            catalog.global_models.insert(model.name.clone(), model);
        }

        for mapping in data.model_mappings {
            if !catalog.global_models.contains_key(&mapping.global_model) {
                return Err(CatalogError::DanglingReference {
                    kind: "model mapping",
                    id: mapping.provider_model_name,
                    target: "global model",
                    target_id: mapping.global_model,
                });
            }
            if !catalog.providers.contains_key(&mapping.provider_id) {
                return Err(CatalogError::DanglingReference {
                    kind: "model mapping",
                    id: mapping.provider_model_name,
                    target: "provider",
                    target_id: mapping.provider_id,
                });
            }
            catalog.mappings.push(mapping);
        }

        Ok(catalog)
    }

    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.get(id)
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn key(&self, id: &str) -> Option<&Key> {
        self.keys.get(id)
    }

    pub fn global_model(&self, name: &str) -> Option<&GlobalModel> {
        self.global_models.get(name)
    }

    pub fn providers(&self) -> impl Iterator<Item = &Provider> {
        self.providers.values()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    /// Mappings exposing `global_model`
    pub fn mappings_for<'a>(&'a self, global_model: &'a str) -> impl Iterator<Item = &'a ModelMapping> {
        self.mappings
            .iter()
            .filter(move |m| m.global_model == global_model)
    }

    pub fn endpoints_of(&self, provider_id: &str) -> impl Iterator<Item = &Endpoint> {
        self.endpoints_by_provider
            .get(provider_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.endpoints.get(id))
    }

    pub fn keys_of(&self, endpoint_id: &str) -> impl Iterator<Item = &Key> {
        self.keys_by_endpoint
            .get(endpoint_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.keys.get(id))
    }

    fn to_data(&self) -> CatalogData {
        CatalogData {
            providers: self.providers.values().cloned().collect(),
            endpoints: self.endpoints.values().cloned().collect(),
            keys: self.keys.values().cloned().collect(),
            global_models: self.global_models.values().cloned().collect(),
            model_mappings: self.mappings.clone(),
        }
    }
}

/// Shared, swappable catalog
///
/// Stand-in for the external catalog persistence: the gateway reads a JSON
/// file at startup and on reload.
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
    source: Option<PathBuf>,
}

impl CatalogStore {
    /// Create a store from an already-built catalog
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            source: None,
        }
    }

    /// Load and validate the catalog file at `path`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let catalog = read_catalog(&path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(catalog)),
            source: Some(path),
        })
    }

    /// Current catalog; cheap to clone, stable for the caller's lifetime
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().clone()
    }

    /// Swap in a new catalog
    pub fn replace(&self, catalog: Catalog) {
        *self.current.write() = Arc::new(catalog);
    }

    /// Re-read the source file. A failed reload keeps the current catalog.
    pub fn reload(&self) -> Result<Arc<Catalog>, CatalogError> {
        let path = self.source.as_ref().ok_or(CatalogError::NoSource)?;
        match read_catalog(path) {
            Ok(catalog) => {
                let catalog = Arc::new(catalog);
                *self.current.write() = catalog.clone();
                info!(path = %path.display(), keys = catalog.keys.len(), "Catalog reloaded");
                Ok(catalog)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Catalog reload failed, keeping previous");
                Err(e)
            }
        }
    }

    /// Set a key's active flag. Returns `false` if the key is unknown.
    pub fn set_key_active(&self, key_id: &str, active: bool) -> bool {
        let mut current = self.current.write();
        let Some(key) = current.keys.get(key_id) else {
            return false;
        };
        if key.is_active == active {
            return true;
        }

        let mut data = current.to_data();
        if let Some(key) = data.keys.iter_mut().find(|k| k.id == key_id) {
            key.is_active = active;
        }
        match Catalog::build(data) {
            Ok(rebuilt) => {
                *current = Arc::new(rebuilt);
                true
            }
            Err(e) => {
                // Rebuilding an already-valid catalog cannot introduce new references
                warn!(key_id = %key_id, error = %e, "Failed to rebuild catalog after key update");
                false
            }
        }
    }
}

fn read_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let data: CatalogData = serde_json::from_str(&raw)?;
    Catalog::build(data)
}
