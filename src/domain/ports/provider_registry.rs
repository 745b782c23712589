/// Provider registry source port.
///
/// The hub reads the registry through this trait on every request; sources
/// must not cache across calls unless the underlying document is immutable.
use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::ProviderRegistry;

#[async_trait]
pub trait ProviderRegistrySource: Send + Sync {
    async fn load(&self) -> DomainResult<ProviderRegistry>;
}

/// Fixed in-memory registry.
#[derive(Debug, Clone)]
pub struct StaticRegistry(pub ProviderRegistry);

#[async_trait]
impl ProviderRegistrySource for StaticRegistry {
    async fn load(&self) -> DomainResult<ProviderRegistry> {
        Ok(self.0.clone())
    }
}
