//! Domain errors
//!
//! Provider-level failures. None of these escape the resolution facade;
//! callers only ever see a resolved or unresolved outcome.

use std::path::PathBuf;
use thiserror::Error;

/// A single lookup failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// The address is malformed or the backend refused to resolve it.
    /// Not cached, so the next resolution retries.
    #[error("address {address} could not be resolved: {reason}")]
    AddressUnresolvable { address: String, reason: String },

    /// The backend itself is unreachable, closed or rejecting requests.
    #[error("lookup backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl LookupError {
    pub fn unresolvable(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressUnresolvable {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }
}

/// A provider could not be constructed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to open database {path}: {reason}")]
    Database { path: PathBuf, reason: String },

    #[error("failed to create remote service client: {0}")]
    Remote(String),
}
