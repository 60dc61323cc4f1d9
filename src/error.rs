//! Error types for netsentry.
//!
//! Only [`Error`] crosses the engine boundary. Probe and DNS errors are
//! absorbed by the signal layer and turned into result values; they exist as
//! types so the classification can be logged and tested.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::ProbeErrorCode;

/// Result type alias for netsentry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for netsentry.
#[derive(Error, Debug)]
pub enum Error {
    // Signal layer (only surfaced by diagnostic entry points such as the CLI)
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("dns error: {0}")]
    Dns(#[from] DnsError),

    // State errors
    #[error("state corruption: expected version {expected}, found {found}")]
    StateCorruption { expected: u64, found: u64 },

    #[error("monitor is stopped")]
    Stopped,

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Endpoint probe failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0}ms")]
    Timeout(u64),

    #[error("connection refused")]
    Refused,

    /// Address not available. Usually a VPN restricting routes rather than
    /// a dead network, so it is never taken as proof of being offline.
    #[error("address not available: {0}")]
    Ambiguous(String),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("network unreachable: {0}")]
    Unreachable(String),

    #[error("invalid HTTP response: {0}")]
    Http(String),

    #[error("{0}")]
    Io(String),
}

impl ProbeError {
    /// Serializable code carried by probe results.
    pub fn code(&self) -> ProbeErrorCode {
        match self {
            Self::Timeout(_) => ProbeErrorCode::Timeout,
            Self::Refused => ProbeErrorCode::Refused,
            Self::Ambiguous(_) => ProbeErrorCode::AddressNotAvailable,
            Self::Resolve(_) => ProbeErrorCode::DnsFailure,
            Self::Unreachable(_) => ProbeErrorCode::Unreachable,
            Self::Http(_) | Self::Io(_) => ProbeErrorCode::Other,
        }
    }

    /// Whether the failure is inconclusive and needs a secondary probe.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous(_))
    }
}

/// DNS resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("all resolver strategies failed for {host}")]
    StrategyExhausted { host: String },

    #[error("lookup subprocess failed: {0}")]
    Subprocess(String),

    #[error("resolution timed out after {0}ms")]
    Timeout(u64),

    #[error("no IPv4 addresses for {0}")]
    NoAddresses(String),

    #[error("resolver error: {0}")]
    Resolve(String),
}

/// Context attached to suppression and corruption log lines.
#[derive(Debug)]
pub struct MutationContext {
    pub source: &'static str,
    pub expected_version: u64,
    pub proposed_online: Option<bool>,
}

impl fmt::Display for MutationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source={}, expected_version={}", self.source, self.expected_version)?;
        if let Some(online) = self.proposed_online {
            write!(f, ", proposed_online={online}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_codes() {
        assert_eq!(ProbeError::Refused.code(), ProbeErrorCode::Refused);
        assert_eq!(
            ProbeError::Ambiguous("10.0.0.1:443".into()).code(),
            ProbeErrorCode::AddressNotAvailable
        );
        assert!(ProbeError::Ambiguous(String::new()).is_ambiguous());
        assert!(!ProbeError::Timeout(3000).is_ambiguous());
    }

    #[test]
    fn test_mutation_context_display() {
        let ctx = MutationContext {
            source: "quick",
            expected_version: 4,
            proposed_online: Some(false),
        };
        assert_eq!(
            ctx.to_string(),
            "source=quick, expected_version=4, proposed_online=false"
        );
    }
}
