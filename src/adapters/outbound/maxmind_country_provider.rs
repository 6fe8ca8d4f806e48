//! MaxMind Country Provider
//!
//! Implements CountryProvider using a local MaxMind GeoIP2/GeoLite2
//! country database file.

use crate::domain::entities::CountryResult;
use crate::domain::errors::{LookupError, ProviderError};
use crate::domain::ports::CountryProvider;
use crate::domain::value_objects::ProviderKind;
use async_trait::async_trait;
use maxminddb::{MaxMindDBError, Reader};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CountryRecord {
    iso_code: Option<String>,
    names: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CountryResp {
    country: Option<CountryRecord>,
}

/// File-backed country provider.
///
/// The reader is loaded fully into memory when opened, so the provider is
/// stateless afterwards. It stays valid until the file on disk changes.
pub struct MaxMindCountryProvider {
    path: PathBuf,
    reader: RwLock<Option<Reader<Vec<u8>>>>,
}

impl MaxMindCountryProvider {
    /// Load a GeoIP database from a file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref().to_path_buf();
        let reader = Reader::open_readfile(&path).map_err(|e| ProviderError::Database {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            "maxmind database opened"
        );

        Ok(Self {
            path,
            reader: RwLock::new(Some(reader)),
        })
    }

    fn lookup_sync(&self, ip: IpAddr) -> Result<CountryResult, LookupError> {
        let guard = self.reader.read();
        let reader = guard
            .as_ref()
            .ok_or_else(|| LookupError::unavailable("database reader closed"))?;

        match reader.lookup::<CountryResp>(ip) {
            Ok(resp) => Ok(match resp.country {
                Some(country) => CountryResult {
                    name: country.names.and_then(|mut n| n.remove("en")),
                    iso_code: country.iso_code,
                },
                None => CountryResult::unknown(),
            }),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(CountryResult::unknown()),
            Err(e) => Err(LookupError::unavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl CountryProvider for MaxMindCountryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalDatabase
    }

    async fn lookup(&self, ip: IpAddr) -> Result<CountryResult, LookupError> {
        self.lookup_sync(ip)
    }

    fn close(&self) {
        if self.reader.write().take().is_some() {
            tracing::debug!(path = %self.path.display(), "maxmind database closed");
        }
    }
}
