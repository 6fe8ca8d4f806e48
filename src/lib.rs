//! geogate Library
//!
//! Resolves client IP addresses to countries through a cached,
//! hot-swappable lookup provider, and uses the answer to allow or deny
//! streaming sessions.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::outbound::{DefaultProviderFactory, MaxMindCountryProvider, WebServiceCountryProvider};
pub use application::{AccessPolicyConfig, CountryResolver, GeoAccessPolicy, ResolverConfig};
pub use config::load_config;
pub use domain::entities::CountryResult;
pub use domain::ports::{CountryProvider, ProviderFactory};
pub use domain::value_objects::{AccessDecision, ProviderKind, RemoteServiceConfig};
