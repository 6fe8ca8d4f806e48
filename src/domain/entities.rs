//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the geogate domain.
//! They have no external dependencies beyond serde.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Country answer produced by a lookup provider.
///
/// A result without an ISO code is still a valid answer: the backend knows
/// the address but has no country for it. Such results are cached like any
/// other so the backend is not queried again for the same address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryResult {
    /// ISO 3166-1 alpha-2 code (BR, US, FR, etc)
    pub iso_code: Option<String>,
    /// English country name, when the backend provides one
    pub name: Option<String>,
}

impl CountryResult {
    pub fn new(iso_code: impl Into<String>, name: Option<String>) -> Self {
        Self {
            iso_code: Some(iso_code.into()),
            name,
        }
    }

    /// An answer that carries no country.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Whether the answer carries a non-empty ISO code.
    pub fn has_country(&self) -> bool {
        self.iso_code.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// A memoized lookup held by the resolution cache.
///
/// The access stamp is updated lock-free on every cache hit and is used to
/// order entries for eviction. Larger stamps are more recent.
#[derive(Debug)]
pub struct CachedResult {
    /// The resolved country payload
    pub result: CountryResult,
    /// Last access stamp
    last_access: AtomicU64,
}

impl CachedResult {
    pub fn new(result: CountryResult, stamp: u64) -> Self {
        Self {
            result,
            last_access: AtomicU64::new(stamp),
        }
    }

    /// Record an access with the given stamp. Never moves backwards.
    pub fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}
