//! Default Provider Factory
//!
//! Builds the production backends: a MaxMind database reader or a
//! web service client.

use super::{MaxMindCountryProvider, WebServiceCountryProvider};
use crate::domain::errors::ProviderError;
use crate::domain::ports::{CountryProvider, ProviderFactory};
use crate::domain::value_objects::RemoteServiceConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProviderFactory;

impl DefaultProviderFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderFactory for DefaultProviderFactory {
    async fn open_database(&self, path: &Path) -> Result<Arc<dyn CountryProvider>, ProviderError> {
        // The reader slurps the whole file; keep that off the async workers.
        let path: PathBuf = path.to_path_buf();
        let err_path = path.clone();
        let provider = tokio::task::spawn_blocking(move || MaxMindCountryProvider::open(path))
            .await
            .map_err(|e| ProviderError::Database {
                path: err_path,
                reason: format!("spawn_blocking error: {}", e),
            })??;
        Ok(Arc::new(provider))
    }

    async fn connect_remote(
        &self,
        config: &RemoteServiceConfig,
    ) -> Result<Arc<dyn CountryProvider>, ProviderError> {
        let provider = WebServiceCountryProvider::new(config.clone())?;
        Ok(Arc::new(provider))
    }
}
