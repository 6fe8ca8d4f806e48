//! Access Policy - country based allow/deny decisions
//!
//! Consumes the country resolver to accept or reject streaming sessions.
//! Trusted IPs and encoders bypass the country check.

use super::country_resolver::CountryResolver;
use crate::domain::entities::CountryResult;
use crate::domain::value_objects::AccessDecision;
use ipnet::IpNet;
use regex::Regex;
use std::net::IpAddr;
use std::sync::Arc;

/// Access policy settings.
#[derive(Debug, Clone)]
pub struct AccessPolicyConfig {
    /// Country patterns, split on `,` or `|` (default: "*")
    pub countries: String,
    /// Whether a country match allows (true) or denies (false) the session
    pub match_allow: bool,
    /// Addresses that always pass: exact IPs, CIDRs or `10.0.*.*` wildcards
    pub allowed_ips: String,
    /// User agent prefixes of encoders that always pass when publishing
    pub allowed_encoders: String,
    /// Log every decision at info level
    pub debug_log: bool,
}

impl Default for AccessPolicyConfig {
    fn default() -> Self {
        Self {
            countries: "*".to_string(),
            match_allow: true,
            allowed_ips: String::new(),
            allowed_encoders: String::new(),
            debug_log: false,
        }
    }
}

/// The session event an access check is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Client connection (publish or play)
    Connect,
    /// RTSP DESCRIBE (playback)
    RtspDescribe,
    /// RTSP ANNOUNCE (publish)
    RtspAnnounce,
    /// HTTP streaming session creation
    HttpSessionCreate,
}

impl SessionKind {
    /// Publishing events may be bypassed by a trusted encoder.
    fn honours_encoder_bypass(&self) -> bool {
        matches!(self, Self::Connect | Self::RtspAnnounce)
    }
}

/// An incoming session to decide on.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub kind: SessionKind,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

impl SessionRequest {
    pub fn new(kind: SessionKind, client_ip: impl Into<String>) -> Self {
        Self {
            kind,
            client_ip: client_ip.into(),
            user_agent: None,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// What an access decision was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    TrustedEncoder,
    TrustedAddress,
    CountryRule,
}

/// An access decision and the country it was made from.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessCheck {
    pub decision: AccessDecision,
    pub source: DecisionSource,
    /// Set only when the country rule ran and the address resolved
    pub country: Option<CountryResult>,
}

impl AccessCheck {
    fn bypass(source: DecisionSource) -> Self {
        Self {
            decision: AccessDecision::Allow,
            source,
            country: None,
        }
    }
}

#[derive(Debug, Clone)]
enum CountryPattern {
    Any,
    Regex(Regex),
}

impl CountryPattern {
    fn parse(item: &str) -> Option<Self> {
        if item == "*" {
            return Some(Self::Any);
        }
        match Regex::new(&format!("^(?:{})$", item)) {
            Ok(re) => Some(Self::Regex(re)),
            Err(e) => {
                tracing::warn!(pattern = %item, error = %e, "invalid country pattern, skipped");
                None
            }
        }
    }
}

/// A trusted address, network or IPv4 wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpMatcher {
    Exact(IpAddr),
    Network(IpNet),
    /// IPv4 octets, `None` matching any value
    Wildcard([Option<u8>; 4]),
}

impl IpMatcher {
    pub fn parse(item: &str) -> Option<Self> {
        if item.contains('/') {
            return item.parse().ok().map(Self::Network);
        }
        if item.contains('*') {
            let parts: Vec<&str> = item.split('.').collect();
            if parts.is_empty() || parts.len() > 4 {
                return None;
            }
            let mut octets = [None; 4];
            for (slot, part) in octets.iter_mut().zip(parts.iter()) {
                *slot = match *part {
                    "*" => None,
                    n => Some(n.parse().ok()?),
                };
            }
            return Some(Self::Wildcard(octets));
        }
        item.parse().ok().map(Self::Exact)
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            Self::Exact(addr) => *addr == ip,
            Self::Network(net) => net.contains(&ip),
            Self::Wildcard(pattern) => match ip {
                IpAddr::V4(v4) => pattern
                    .iter()
                    .zip(v4.octets())
                    .all(|(p, o)| p.map_or(true, |p| p == o)),
                IpAddr::V6(_) => false,
            },
        }
    }
}

/// Split a `,` or `|` separated property into trimmed, non-empty items.
pub fn split_list(list: &str) -> Vec<String> {
    list.split([',', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Country based access policy.
pub struct GeoAccessPolicy {
    resolver: Arc<CountryResolver>,
    countries: Vec<CountryPattern>,
    match_allow: bool,
    allowed_ips: Vec<IpMatcher>,
    allowed_encoders: Vec<String>,
    debug_log: bool,
}

impl GeoAccessPolicy {
    pub fn new(config: &AccessPolicyConfig, resolver: Arc<CountryResolver>) -> Self {
        let countries = split_list(&config.countries)
            .iter()
            .filter_map(|item| CountryPattern::parse(item))
            .collect();

        let allowed_ips = split_list(&config.allowed_ips)
            .iter()
            .filter_map(|item| {
                let matcher = IpMatcher::parse(item);
                if matcher.is_none() {
                    tracing::warn!(entry = %item, "invalid allowed IP entry, skipped");
                }
                matcher
            })
            .collect();

        let policy = Self {
            resolver,
            countries,
            match_allow: config.match_allow,
            allowed_ips,
            allowed_encoders: split_list(&config.allowed_encoders),
            debug_log: config.debug_log,
        };

        tracing::info!(
            countries = %config.countries,
            match_allow = policy.match_allow,
            allowed_ips = policy.allowed_ips.len(),
            allowed_encoders = policy.allowed_encoders.len(),
            "geo access policy configured"
        );
        policy
    }

    /// Whether the client address is on the trusted list.
    pub fn is_allowed_ip(&self, ip_address: &str) -> bool {
        match ip_address.trim().parse::<IpAddr>() {
            Ok(ip) => self.allowed_ips.iter().any(|m| m.matches(ip)),
            Err(_) => false,
        }
    }

    /// Whether the user agent belongs to a trusted encoder.
    pub fn is_allowed_encoder(&self, user_agent: &str) -> bool {
        self.allowed_encoders
            .iter()
            .any(|prefix| user_agent.starts_with(prefix.as_str()))
    }

    /// Country check for a single address.
    ///
    /// Patterns are tried in order and the first decisive one wins: `*`
    /// matches everything, an address without a country never matches.
    /// Unresolved addresses never match either.
    pub async fn check_address(&self, ip_address: &str) -> bool {
        self.check_country(ip_address).await.0
    }

    async fn check_country(&self, ip_address: &str) -> (bool, Option<CountryResult>) {
        let Some(result) = self.resolver.resolve_country(ip_address).await else {
            if self.debug_log {
                tracing::info!(ip = %ip_address, allowed = !self.match_allow, "country unresolved");
            }
            return (!self.match_allow, None);
        };

        let iso_code = result.iso_code.as_deref().unwrap_or_default();
        let mut valid = !self.match_allow;
        for pattern in &self.countries {
            if let CountryPattern::Any = pattern {
                valid = self.match_allow;
                break;
            }
            if iso_code.is_empty() {
                valid = !self.match_allow;
                break;
            }
            if let CountryPattern::Regex(re) = pattern {
                if re.is_match(iso_code) {
                    valid = self.match_allow;
                    break;
                }
            }
        }

        if self.debug_log {
            tracing::info!(ip = %ip_address, country = %iso_code, allowed = valid, "country checked");
        }
        (valid, Some(result))
    }

    /// Decide whether a session may proceed.
    pub async fn decide(&self, request: &SessionRequest) -> AccessDecision {
        self.check(request).await.decision
    }

    /// Decide on a session and report what the decision rested on.
    ///
    /// Trusted encoders and addresses are allowed without a resolution.
    pub async fn check(&self, request: &SessionRequest) -> AccessCheck {
        if self.debug_log {
            tracing::info!(
                kind = ?request.kind,
                ip = %request.client_ip,
                user_agent = request.user_agent.as_deref().unwrap_or_default(),
                "access check"
            );
        }

        if request.kind.honours_encoder_bypass() {
            if let Some(user_agent) = request.user_agent.as_deref() {
                if self.is_allowed_encoder(user_agent) {
                    return AccessCheck::bypass(DecisionSource::TrustedEncoder);
                }
            }
        }

        if self.is_allowed_ip(&request.client_ip) {
            return AccessCheck::bypass(DecisionSource::TrustedAddress);
        }

        let (allowed, country) = self.check_country(&request.client_ip).await;
        AccessCheck {
            decision: AccessDecision::from_allowed(allowed),
            source: DecisionSource::CountryRule,
            country,
        }
    }
}
