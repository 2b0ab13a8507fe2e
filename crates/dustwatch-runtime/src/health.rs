//! Readiness probing for detector workers

use dustwatch_core::{DustwatchError, DustwatchResult};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Outcome of a single readiness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Worker answered 2xx
    Healthy,
    /// Worker answered with a non-success status
    Unhealthy(u16),
    /// No answer (not listening yet, timed out, reset)
    Unreachable(String),
}

impl Probe {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Probe::Healthy)
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Healthy => write!(f, "healthy"),
            Probe::Unhealthy(status) => write!(f, "health endpoint returned {}", status),
            Probe::Unreachable(reason) => write!(f, "unreachable: {}", reason),
        }
    }
}

/// Probes `GET <base_url><path>` on a worker
pub struct HealthChecker {
    client: reqwest::Client,
    path: String,
}

impl HealthChecker {
    /// Create a checker whose probes give up after `timeout`
    pub fn new(path: impl Into<String>, timeout: Duration) -> DustwatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DustwatchError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }

    /// Probe the worker at `base_url` once
    pub async fn probe(&self, base_url: &str) -> Probe {
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.path);

        let probe = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Probe::Healthy,
            Ok(response) => Probe::Unhealthy(response.status().as_u16()),
            Err(e) => Probe::Unreachable(e.to_string()),
        };
        trace!(endpoint = %url, result = %probe, "Health probe");
        probe
    }
}
