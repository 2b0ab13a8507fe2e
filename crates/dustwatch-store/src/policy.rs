//! Deployment policy: maps a requested model name to the one actually served

use dustwatch_core::{DeploymentMode, DustwatchError, DustwatchResult, ModelRegistry, ModelsConfig};
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of normalizing a requested model name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveModel {
    /// Name that will be loaded
    pub name: String,
    /// True when `name` differs from what was asked for
    pub overridden: bool,
}

/// Decides which registered model a request is served with
#[derive(Debug, Clone)]
pub struct ModelPolicy {
    mode: DeploymentMode,
    registry: ModelRegistry,
    default_model: String,
    restricted_model: String,
}

impl ModelPolicy {
    /// Create a policy. Both the default and the restricted model must be
    /// registered.
    pub fn new(
        mode: DeploymentMode,
        registry: ModelRegistry,
        default_model: String,
        restricted_model: String,
    ) -> DustwatchResult<Self> {
        for name in [&default_model, &restricted_model] {
            if !registry.contains(name) {
                return Err(DustwatchError::Config(format!(
                    "Model {} is not in the registry",
                    name
                )));
            }
        }
        Ok(Self {
            mode,
            registry,
            default_model,
            restricted_model,
        })
    }

    /// Create a policy from the `[models]` configuration section
    pub fn from_config(config: &ModelsConfig) -> DustwatchResult<Self> {
        Self::new(
            config.mode,
            config.registry.clone(),
            config.default_model.clone(),
            config.restricted_model.clone(),
        )
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Model that startup preloading should warm
    pub fn startup_model(&self) -> &str {
        match self.mode {
            DeploymentMode::Open => &self.default_model,
            DeploymentMode::Restricted => &self.restricted_model,
        }
    }

    /// Map a requested name (possibly absent) to the effective model name.
    pub fn normalize(&self, requested: Option<&str>) -> EffectiveModel {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());

        match self.mode {
            DeploymentMode::Restricted => {
                let overridden = requested != Some(self.restricted_model.as_str());
                if overridden {
                    info!(
                        requested = requested.unwrap_or("<none>"),
                        served = %self.restricted_model,
                        "Restricted mode: overriding requested model"
                    );
                }
                EffectiveModel {
                    name: self.restricted_model.clone(),
                    overridden,
                }
            }
            DeploymentMode::Open => match requested {
                Some(name) if self.registry.contains(name) => EffectiveModel {
                    name: name.to_string(),
                    overridden: false,
                },
                other => {
                    debug!(
                        requested = other.unwrap_or("<none>"),
                        served = %self.default_model,
                        "Falling back to default model"
                    );
                    EffectiveModel {
                        name: self.default_model.clone(),
                        overridden: other.is_some(),
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::from_pairs([
            ("best.pt", "https://example.com/best.pt"),
            ("last.pt", "https://example.com/last.pt"),
        ])
        .unwrap()
    }

    fn policy(mode: DeploymentMode) -> ModelPolicy {
        ModelPolicy::new(mode, registry(), "best.pt".into(), "best.pt".into()).unwrap()
    }

    #[test]
    fn test_restricted_always_returns_permitted_name() {
        let policy = policy(DeploymentMode::Restricted);
        for requested in [Some("last.pt"), Some("best.pt"), Some("unknown.pt"), Some(""), None] {
            assert_eq!(policy.normalize(requested).name, "best.pt");
        }
    }

    #[test]
    fn test_restricted_records_override() {
        let policy = policy(DeploymentMode::Restricted);
        assert!(policy.normalize(Some("last.pt")).overridden);
        assert!(policy.normalize(None).overridden);
        assert!(!policy.normalize(Some("best.pt")).overridden);
    }

    #[test]
    fn test_open_is_identity_for_registered_names() {
        let policy = policy(DeploymentMode::Open);
        for name in registry().names() {
            let effective = policy.normalize(Some(name));
            assert_eq!(effective.name, name);
            assert!(!effective.overridden);
        }
    }

    #[test]
    fn test_open_falls_back_to_default() {
        let policy = policy(DeploymentMode::Open);

        let effective = policy.normalize(Some("yolov9.pt"));
        assert_eq!(effective.name, "best.pt");
        assert!(effective.overridden);

        let effective = policy.normalize(None);
        assert_eq!(effective.name, "best.pt");
        assert!(!effective.overridden);

        assert_eq!(policy.normalize(Some("   ")).name, "best.pt");
    }

    #[test]
    fn test_effective_model_serializes() {
        let effective = policy(DeploymentMode::Restricted).normalize(Some("last.pt"));
        assert_eq!(
            serde_json::to_value(&effective).unwrap(),
            serde_json::json!({"name": "best.pt", "overridden": true})
        );
    }

    #[test]
    fn test_unregistered_policy_models_rejected() {
        let result = ModelPolicy::new(
            DeploymentMode::Open,
            registry(),
            "missing.pt".into(),
            "best.pt".into(),
        );
        assert!(matches!(result, Err(DustwatchError::Config(_))));
    }

    #[test]
    fn test_startup_model() {
        let policy = ModelPolicy::new(
            DeploymentMode::Restricted,
            registry(),
            "best.pt".into(),
            "last.pt".into(),
        )
        .unwrap();
        assert_eq!(policy.startup_model(), "last.pt");
        assert_eq!(policy.normalize(Some("best.pt")).name, "last.pt");
    }
}
