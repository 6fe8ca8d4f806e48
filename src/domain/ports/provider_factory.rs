//! Provider Factory Port
//!
//! Constructs lookup providers. Which variant to construct is decided by
//! the resolver; the factory only knows how to build each one.

use crate::domain::errors::ProviderError;
use crate::domain::ports::CountryProvider;
use crate::domain::value_objects::RemoteServiceConfig;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Open a file-backed database provider.
    async fn open_database(&self, path: &Path) -> Result<Arc<dyn CountryProvider>, ProviderError>;

    /// Create a client for the remote lookup service.
    async fn connect_remote(
        &self,
        config: &RemoteServiceConfig,
    ) -> Result<Arc<dyn CountryProvider>, ProviderError>;
}
