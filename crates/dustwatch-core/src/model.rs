//! Model registry, source and deployment mode definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{DustwatchError, DustwatchResult};

/// Base URL used for the built-in registry entries
pub const DEFAULT_MODEL_REPO_URL: &str =
    "https://huggingface.co/mars-dust/mars-dust-models/resolve/main";

/// Model served when a request does not name a registered model
pub const DEFAULT_MODEL_NAME: &str = "best.pt";

/// Check that a model name is a plain file name.
///
/// Names are joined onto the local and cache directories, so anything that
/// could escape those directories is rejected.
pub fn is_valid_model_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && name.trim() == name
}

/// Static mapping from model name to the remote URL of its weights.
///
/// Every registered name maps to exactly one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ModelRegistry {
    entries: BTreeMap<String, String>,
}

impl ModelRegistry {
    /// Build a registry from `(name, url)` pairs, rejecting invalid names,
    /// non-HTTP URLs and duplicate names.
    pub fn from_pairs<I, N, U>(pairs: I) -> DustwatchResult<Self>
    where
        I: IntoIterator<Item = (N, U)>,
        N: Into<String>,
        U: Into<String>,
    {
        let mut entries = BTreeMap::new();
        for (name, url) in pairs {
            let name = name.into();
            let url = url.into();

            if !is_valid_model_name(&name) {
                return Err(DustwatchError::Config(format!(
                    "Invalid model name in registry: {:?}",
                    name
                )));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(DustwatchError::Config(format!(
                    "Model {} has a non-HTTP URL: {}",
                    name, url
                )));
            }
            if entries.insert(name.clone(), url).is_some() {
                return Err(DustwatchError::Config(format!(
                    "Model {} is registered more than once",
                    name
                )));
            }
        }

        if entries.is_empty() {
            return Err(DustwatchError::Config(
                "Model registry must contain at least one model".to_string(),
            ));
        }

        Ok(Self { entries })
    }

    /// Parse the `name=url,name=url` form used by environment overrides
    pub fn parse_env(value: &str) -> DustwatchResult<Self> {
        let mut pairs = Vec::new();
        for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, url) = item.split_once('=').ok_or_else(|| {
                DustwatchError::Config(format!("Expected name=url in registry entry: {}", item))
            })?;
            pairs.push((name.trim().to_string(), url.trim().to_string()));
        }
        Self::from_pairs(pairs)
    }

    /// Remote URL registered for a model name
    pub fn url(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Whether a model name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Registered `(name, url)` pairs in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, u)| (n.as_str(), u.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let entries = ["best.pt", "last.pt"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    format!("{}/{}", DEFAULT_MODEL_REPO_URL, name),
                )
            })
            .collect();
        Self { entries }
    }
}

impl TryFrom<BTreeMap<String, String>> for ModelRegistry {
    type Error = DustwatchError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_pairs(map)
    }
}

impl From<ModelRegistry> for BTreeMap<String, String> {
    fn from(registry: ModelRegistry) -> Self {
        registry.entries
    }
}

/// Where the weights for a model are loaded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum ModelSource {
    /// Operator-provided file in the local model directory
    Local(PathBuf),
    /// Previously downloaded file in the cache directory
    Cache(PathBuf),
    /// Registry URL; must be fetched before loading
    Remote(String),
}

impl ModelSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ModelSource::Local(_) => SourceKind::Local,
            ModelSource::Cache(_) => SourceKind::Cache,
            ModelSource::Remote(_) => SourceKind::Remote,
        }
    }

    /// Filesystem path for on-disk sources
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            ModelSource::Local(p) | ModelSource::Cache(p) => Some(p),
            ModelSource::Remote(_) => None,
        }
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Local(p) | ModelSource::Cache(p) => write!(f, "{}", p.display()),
            ModelSource::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Variant tag of a [`ModelSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Cache,
    Remote,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Local => write!(f, "local"),
            SourceKind::Cache => write!(f, "cache"),
            SourceKind::Remote => write!(f, "remote"),
        }
    }
}

/// Deployment mode, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Honor the requested model, falling back to the default
    #[default]
    Open,
    /// Serve a single permitted model regardless of the request
    Restricted,
}

impl std::str::FromStr for DeploymentMode {
    type Err = DustwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(DeploymentMode::Open),
            "restricted" => Ok(DeploymentMode::Restricted),
            other => Err(DustwatchError::Config(format!(
                "Unknown deployment mode: {} (expected open or restricted)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Open => write!(f, "open"),
            DeploymentMode::Restricted => write!(f, "restricted"),
        }
    }
}

/// Listing entry for a registered model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model name
    pub name: String,
    /// Registered remote URL
    pub url: String,
    /// Which source would be used right now
    pub source: SourceKind,
    /// Whether weights are present on disk (local or cache)
    pub available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_model_names() {
        assert!(is_valid_model_name("best.pt"));
        assert!(is_valid_model_name("yolo-v8_dust.onnx"));
        assert!(!is_valid_model_name(""));
        assert!(!is_valid_model_name(".."));
        assert!(!is_valid_model_name("../etc/passwd"));
        assert!(!is_valid_model_name("dir/best.pt"));
        assert!(!is_valid_model_name("dir\\best.pt"));
        assert!(!is_valid_model_name(" best.pt"));
    }

    #[test]
    fn test_default_registry() {
        let registry = ModelRegistry::default();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("best.pt"));
        assert!(registry.contains("last.pt"));
        assert_eq!(
            registry.url("best.pt"),
            Some("https://huggingface.co/mars-dust/mars-dust-models/resolve/main/best.pt")
        );
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["best.pt", "last.pt"]);
    }

    #[test]
    fn test_registry_parse_env() {
        let registry =
            ModelRegistry::parse_env("best.pt=https://a.example/best.pt, last.pt=https://a.example/last.pt")
                .unwrap();
        assert_eq!(registry.url("last.pt"), Some("https://a.example/last.pt"));

        let dup = ModelRegistry::parse_env("a.pt=https://x/a, a.pt=https://x/b");
        assert!(matches!(dup, Err(DustwatchError::Config(_))));

        assert!(ModelRegistry::parse_env("a.pt").is_err());
        assert!(ModelRegistry::parse_env("a.pt=ftp://x/a").is_err());
        assert!(ModelRegistry::parse_env("../a.pt=https://x/a").is_err());
        assert!(ModelRegistry::parse_env("").is_err());
    }

    #[test]
    fn test_registry_toml_validation() {
        #[derive(Deserialize)]
        struct Wrapper {
            registry: ModelRegistry,
        }

        let ok: Wrapper = toml::from_str(
            r#"
[registry]
"best.pt" = "https://example.com/best.pt"
"#,
        )
        .unwrap();
        assert!(ok.registry.contains("best.pt"));

        let bad = toml::from_str::<Wrapper>(
            r#"
[registry]
"sub/best.pt" = "https://example.com/best.pt"
"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_model_source_display() {
        let local = ModelSource::Local(PathBuf::from("/models/best.pt"));
        assert_eq!(local.to_string(), "/models/best.pt");
        assert_eq!(local.kind(), SourceKind::Local);
        assert!(local.path().is_some());

        let remote = ModelSource::Remote("https://example.com/best.pt".to_string());
        assert_eq!(remote.to_string(), "https://example.com/best.pt");
        assert_eq!(remote.kind().to_string(), "remote");
        assert!(remote.path().is_none());
    }

    #[test]
    fn test_deployment_mode_parse() {
        assert_eq!("open".parse::<DeploymentMode>().unwrap(), DeploymentMode::Open);
        assert_eq!(
            " Restricted ".parse::<DeploymentMode>().unwrap(),
            DeploymentMode::Restricted
        );
        assert!("locked".parse::<DeploymentMode>().is_err());
        assert_eq!(DeploymentMode::default(), DeploymentMode::Open);
    }
}
