//! Web Service Country Provider
//!
//! Implements CountryProvider against the GeoIP2 Precision web service
//! country endpoint.

use crate::domain::entities::CountryResult;
use crate::domain::errors::{LookupError, ProviderError};
use crate::domain::ports::CountryProvider;
use crate::domain::value_objects::{ProviderKind, RemoteServiceConfig};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Deserialize)]
struct CountryRecord {
    iso_code: Option<String>,
    names: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CountryResp {
    country: Option<CountryRecord>,
}

/// Error body returned by the service for non-2xx responses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceError {
    code: String,
    error: String,
}

/// Remote country provider.
///
/// Holds a pooled HTTP client. The resolver closes it after a period of
/// inactivity so idle connections are not kept open.
pub struct WebServiceCountryProvider {
    config: RemoteServiceConfig,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl WebServiceCountryProvider {
    /// Create a new client for the given account.
    pub fn new(config: RemoteServiceConfig) -> Result<Self, ProviderError> {
        if config.account_id.is_empty() || config.license_key.is_empty() {
            return Err(ProviderError::Remote(
                "account id and license key are both required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Remote(e.to_string()))?;

        Ok(Self {
            config,
            client,
            closed: AtomicBool::new(false),
        })
    }

    fn country_url(&self, ip: IpAddr) -> String {
        format!(
            "{}/geoip/v2.1/country/{}",
            self.config.base_url.trim_end_matches('/'),
            ip
        )
    }

    /// Map an error response to a lookup outcome.
    ///
    /// Addresses the service knows but cannot place resolve to an empty
    /// result; malformed addresses are unresolvable; everything else means
    /// the backend is unusable right now.
    fn map_error(ip: IpAddr, status: StatusCode, err: ServiceError) -> Result<CountryResult, LookupError> {
        match err.code.as_str() {
            "IP_ADDRESS_NOT_FOUND" | "IP_ADDRESS_RESERVED" => Ok(CountryResult::unknown()),
            "IP_ADDRESS_INVALID" | "IP_ADDRESS_REQUIRED" => {
                Err(LookupError::unresolvable(ip.to_string(), err.error))
            }
            _ if status == StatusCode::NOT_FOUND => Ok(CountryResult::unknown()),
            _ if status == StatusCode::BAD_REQUEST => Err(LookupError::unresolvable(
                ip.to_string(),
                format!("{} {}", err.code, err.error),
            )),
            _ => Err(LookupError::unavailable(format!(
                "{} {} {}",
                status, err.code, err.error
            ))),
        }
    }
}

#[async_trait]
impl CountryProvider for WebServiceCountryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::RemoteService
    }

    async fn lookup(&self, ip: IpAddr) -> Result<CountryResult, LookupError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LookupError::unavailable("web service client closed"));
        }

        let response = self
            .client
            .get(self.country_url(ip))
            .basic_auth(&self.config.account_id, Some(&self.config.license_key))
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| LookupError::unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: CountryResp = response
                .json()
                .await
                .map_err(|e| LookupError::unavailable(format!("invalid response body: {}", e)))?;

            return Ok(match body.country {
                Some(country) => CountryResult {
                    name: country.names.and_then(|mut n| n.remove("en")),
                    iso_code: country.iso_code,
                },
                None => CountryResult::unknown(),
            });
        }

        let err: ServiceError = response.json().await.unwrap_or_default();
        Self::map_error(ip, status, err)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(account_id = %self.config.account_id, "web service client closed");
        }
    }
}
