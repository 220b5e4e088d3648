use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{BackendApi, LocalBackend, RemoteBackend};
use crate::storage::config::{BackendKind, BackendsConfig};
use crate::storage::ConfigError;

/// One registered backend.
#[derive(Clone)]
pub struct Backend {
    pub id: String,
    pub enabled: bool,
    api: Arc<dyn BackendApi>,
}

impl Backend {
    pub fn new(id: &str, enabled: bool, api: Arc<dyn BackendApi>) -> Self {
        Self {
            id: id.to_string(),
            enabled,
            api,
        }
    }

    pub fn api(&self) -> &dyn BackendApi {
        self.api.as_ref()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Ordered set of backends plus the one used when a request names none.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
    default: usize,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Backend>, default: &str) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for backend in &backends {
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "backend '{}' is configured twice",
                    backend.id
                )));
            }
        }

        let default = backends
            .iter()
            .position(|b| b.id == default)
            .ok_or_else(|| {
                ConfigError::Invalid(format!("default backend '{}' is not configured", default))
            })?;

        Ok(Self { backends, default })
    }

    pub fn from_config(config: &BackendsConfig) -> Result<Self, ConfigError> {
        let backends = config
            .available
            .iter()
            .map(|entry| {
                let api: Arc<dyn BackendApi> = match entry.kind {
                    BackendKind::Local => Arc::new(LocalBackend::new()),
                    BackendKind::Remote => {
                        let base_url = entry.base_url.clone().ok_or_else(|| {
                            ConfigError::Invalid(format!(
                                "remote backend '{}' needs a base_url",
                                entry.id
                            ))
                        })?;
                        Arc::new(
                            RemoteBackend::new(base_url)
                                .with_token(entry.token.clone())
                                .read_only(entry.read_only),
                        )
                    }
                };
                Ok(Backend::new(&entry.id, entry.enabled, api))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Self::new(backends, &config.default)
    }

    /// Ids of all backends currently switched on.
    pub fn enabled(&self) -> HashSet<String> {
        self.backends
            .iter()
            .filter(|b| b.enabled)
            .map(|b| b.id.clone())
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// The designated default backend.
    pub fn reset(&self) -> &Backend {
        &self.backends[self.default]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }
}
