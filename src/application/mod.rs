//! Application Layer
//!
//! Use cases built on the domain ports: country resolution and the
//! access policy that consumes it.

pub mod access_policy;
pub mod country_resolver;
pub mod resolver_config;

pub use access_policy::{
    AccessCheck, AccessPolicyConfig, DecisionSource, GeoAccessPolicy, SessionKind, SessionRequest,
};
pub use country_resolver::{CountryResolver, ResolverStats};
pub use resolver_config::{ConfigError, ResolverConfig};
