use crate::application::{AccessPolicyConfig, ResolverConfig};
use crate::domain::value_objects::RemoteServiceConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Remote lookup service
    pub account_id: Option<String>,
    pub license_key: Option<String>,
    pub service_url: String,
    pub remote_timeout_ms: u64,

    // Local database
    pub database_path: String,

    // Resolution cache
    pub cache_capacity: usize,
    pub eviction_target: f64,
    pub maintenance_interval_ms: u64,
    pub remote_idle_timeout_ms: u64,

    // Access policy
    pub countries: String,
    pub match_allow: bool,
    pub allowed_ips: String,
    pub allowed_encoders: String,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: None,
            license_key: None,
            service_url: "https://geoip.maxmind.com".to_string(),
            remote_timeout_ms: 5000,
            database_path: "conf/GeoIP2-Country.mmdb".to_string(),
            cache_capacity: 4096,
            eviction_target: 0.75,
            maintenance_interval_ms: 1000,
            remote_idle_timeout_ms: 30_000,
            countries: "*".to_string(),
            match_allow: true,
            allowed_ips: String::new(),
            allowed_encoders: String::new(),
            debug: false,
        }
    }
}

impl Config {
    /// Remote service account, present only when both id and key are set.
    pub fn remote_service(&self) -> Option<RemoteServiceConfig> {
        let account_id = self.account_id.as_deref().filter(|s| !s.is_empty())?;
        let license_key = self.license_key.as_deref().filter(|s| !s.is_empty())?;
        Some(
            RemoteServiceConfig::new(account_id, license_key)
                .base_url(self.service_url.clone())
                .timeout(Duration::from_millis(self.remote_timeout_ms)),
        )
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        let mut config = ResolverConfig::new()
            .capacity(self.cache_capacity)
            .eviction_target(self.eviction_target)
            .maintenance_interval(Duration::from_millis(self.maintenance_interval_ms))
            .remote_idle_timeout(Duration::from_millis(self.remote_idle_timeout_ms))
            .database_path(PathBuf::from(&self.database_path));
        if let Some(remote) = self.remote_service() {
            config = config.remote(remote);
        }
        config
    }

    pub fn policy_config(&self) -> AccessPolicyConfig {
        AccessPolicyConfig {
            countries: self.countries.clone(),
            match_allow: self.match_allow,
            allowed_ips: self.allowed_ips.clone(),
            allowed_encoders: self.allowed_encoders.clone(),
            debug_log: self.debug,
        }
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the configuration from an arbitrary variable source.
pub fn load_config_from<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let parse_bool = |key: &str, default: bool| {
        var(key)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(default)
    };

    let account_id = var("GEOGATE_ACCOUNT_ID");
    let license_key = var("GEOGATE_LICENSE_KEY");

    let service_url = var("GEOGATE_SERVICE_URL").unwrap_or(defaults.service_url);

    let remote_timeout_ms = var("GEOGATE_REMOTE_TIMEOUT_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.remote_timeout_ms);

    let database_path = var("GEOGATE_DATABASE_PATH")
        .map(|p| expand_vars(&p, &var))
        .unwrap_or(defaults.database_path);

    let cache_capacity = var("GEOGATE_CACHE_CAPACITY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.cache_capacity);

    let eviction_target = var("GEOGATE_EVICTION_TARGET")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.eviction_target);

    let maintenance_interval_ms = var("GEOGATE_MAINTENANCE_INTERVAL_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.maintenance_interval_ms);

    let remote_idle_timeout_ms = var("GEOGATE_REMOTE_IDLE_TIMEOUT_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.remote_idle_timeout_ms);

    let countries = var("GEOGATE_COUNTRIES").unwrap_or(defaults.countries);
    let match_allow = parse_bool("GEOGATE_MATCH_ALLOW", defaults.match_allow);
    let allowed_ips = var("GEOGATE_ALLOWED_IPS").unwrap_or_default();
    let allowed_encoders = var("GEOGATE_ALLOWED_ENCODERS").unwrap_or_default();

    let debug = var("DEBUG").is_some();

    let config = Config {
        account_id,
        license_key,
        service_url,
        remote_timeout_ms,
        database_path,
        cache_capacity,
        eviction_target,
        maintenance_interval_ms,
        remote_idle_timeout_ms,
        countries,
        match_allow,
        allowed_ips,
        allowed_encoders,
        debug,
    };

    config.resolver_config().validate()?;
    Ok(config)
}

/// Expand `${NAME}` references; unknown names expand to nothing.
fn expand_vars<F>(input: &str, var: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
