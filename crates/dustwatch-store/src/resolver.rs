//! Model source resolution
//!
//! A registered model name resolves to exactly one source, in fixed
//! priority: a file in the local model directory, then a usable file in the
//! cache directory, then the registry URL. Unregistered names never resolve,
//! whatever is on disk.

use dustwatch_core::{
    is_valid_model_name, DustwatchError, DustwatchResult, ModelEntry, ModelRegistry, ModelSource,
    ModelsConfig,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Looks up the source for a model name
pub trait SourceResolver: Send + Sync {
    /// Resolve a model name to the location its weights will be loaded from
    fn resolve(&self, name: &str) -> DustwatchResult<ModelSource>;
}

/// Filesystem and registry backed resolver
#[derive(Debug, Clone)]
pub struct ModelResolver {
    /// Operator-provided weights
    local_dir: PathBuf,
    /// Downloaded weights
    cache_dir: PathBuf,
    /// Static name to URL table
    registry: ModelRegistry,
    /// Smaller cache files are ignored as partial downloads
    min_cache_file_size: u64,
}

impl ModelResolver {
    /// Create a new resolver
    pub fn new(
        local_dir: PathBuf,
        cache_dir: PathBuf,
        registry: ModelRegistry,
        min_cache_file_size: u64,
    ) -> Self {
        Self {
            local_dir,
            cache_dir,
            registry,
            min_cache_file_size,
        }
    }

    /// Create a resolver from the `[models]` configuration section
    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(
            config.local_dir.clone(),
            config.cache_dir.clone(),
            config.registry.clone(),
            config.min_cache_file_size,
        )
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path a model would occupy in the local directory
    pub fn local_path(&self, name: &str) -> PathBuf {
        self.local_dir.join(name)
    }

    /// Path a model would occupy in the cache directory
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// List every registered model with its current source
    pub fn list(&self) -> Vec<ModelEntry> {
        self.registry
            .iter()
            .map(|(name, url)| {
                let source = self
                    .resolve(name)
                    .unwrap_or_else(|_| ModelSource::Remote(url.to_string()));
                ModelEntry {
                    name: name.to_string(),
                    url: url.to_string(),
                    available: source.path().is_some(),
                    source: source.kind(),
                }
            })
            .collect()
    }

    fn is_local_file(path: &Path) -> bool {
        std::fs::metadata(path).map_or(false, |m| m.is_file())
    }

    fn is_usable_cache_file(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                if meta.len() >= self.min_cache_file_size {
                    true
                } else {
                    warn!(
                        path = %path.display(),
                        size = meta.len(),
                        min_size = self.min_cache_file_size,
                        "Ignoring undersized cache file (partial download?)"
                    );
                    false
                }
            }
            _ => false,
        }
    }
}

impl SourceResolver for ModelResolver {
    fn resolve(&self, name: &str) -> DustwatchResult<ModelSource> {
        if !is_valid_model_name(name) {
            return Err(DustwatchError::ModelNotFound(name.to_string()));
        }
        let url = self
            .registry
            .url(name)
            .ok_or_else(|| DustwatchError::ModelNotFound(name.to_string()))?;

        let local = self.local_path(name);
        if Self::is_local_file(&local) {
            debug!(model = name, path = %local.display(), "Resolved model from local directory");
            return Ok(ModelSource::Local(local));
        }

        let cached = self.cache_path(name);
        if self.is_usable_cache_file(&cached) {
            debug!(model = name, path = %cached.display(), "Resolved model from cache directory");
            return Ok(ModelSource::Cache(cached));
        }

        debug!(model = name, url = url, "Resolved model to remote URL");
        Ok(ModelSource::Remote(url.to_string()))
    }
}
