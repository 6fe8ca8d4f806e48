//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use std::time::Duration;

/// Which lookup backend is currently open.
///
/// `None` is a valid transient state: no provider is open and the next
/// resolution attempt must create one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    /// No provider open
    #[default]
    None,
    /// File-backed database, invalidated when the file changes
    LocalDatabase,
    /// Network-backed service, closed after a period of inactivity
    RemoteService,
}

impl ProviderKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LocalDatabase => "local-database",
            Self::RemoteService => "remote-service",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of an access check for a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDecision {
    Allow,
    Reject,
}

impl AccessDecision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Reject
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl std::fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Credentials and endpoint for the remote lookup service.
///
/// The license key never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteServiceConfig {
    pub account_id: String,
    pub license_key: String,
    /// Base URL, e.g. `https://geoip.maxmind.com`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RemoteServiceConfig {
    pub fn new(account_id: impl Into<String>, license_key: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            license_key: license_key.into(),
            base_url: "https://geoip.maxmind.com".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for RemoteServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServiceConfig")
            .field("account_id", &self.account_id)
            .field("license_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}
