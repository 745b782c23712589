//! Provider registry loaded from a JSON document on disk.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProviderRegistry;
use crate::domain::ports::ProviderRegistrySource;

/// Reads the registry file on every `load`, so edits take effect on the
/// next request without a restart.
#[derive(Debug, Clone)]
pub struct FileRegistrySource {
    path: PathBuf,
}

impl FileRegistrySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProviderRegistrySource for FileRegistrySource {
    async fn load(&self) -> DomainResult<ProviderRegistry> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // No registry yet means no providers, not an outage.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no provider registry file; using an empty registry");
                return Ok(ProviderRegistry::new(Vec::new()));
            }
            Err(e) => {
                return Err(DomainError::RegistryUnavailable(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let registry: ProviderRegistry = serde_json::from_slice(&bytes).map_err(|e| {
            DomainError::RegistryUnavailable(format!("invalid registry {}: {e}", self.path.display()))
        })?;
        registry.validate()?;
        Ok(registry)
    }
}
