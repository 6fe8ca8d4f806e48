//! Country Provider Port
//!
//! Defines the interface for resolving IP addresses to countries.

use crate::domain::entities::CountryResult;
use crate::domain::errors::LookupError;
use crate::domain::value_objects::ProviderKind;
use async_trait::async_trait;
use std::net::IpAddr;

/// Lookup backend for IP address to country.
///
/// This is an outbound port that abstracts the GeoIP backend.
/// Implementations may read a local MaxMind database or call a
/// remote lookup service.
#[async_trait]
pub trait CountryProvider: Send + Sync {
    /// Which backend variant this is.
    fn kind(&self) -> ProviderKind;

    /// Resolve an IP address to its country.
    ///
    /// An address the backend knows nothing about resolves to an empty
    /// [`CountryResult`], not an error.
    async fn lookup(&self, ip: IpAddr) -> Result<CountryResult, LookupError>;

    /// Release backend resources. Idempotent; later lookups fail with
    /// [`LookupError::BackendUnavailable`].
    fn close(&self);
}
