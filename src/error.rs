//! Error types for hub construction and registry operations.

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, HubError>;

/// Error type for hub and registry operations
#[derive(Debug)]
pub enum HubError {
    /// No UDP address was supplied to the hub constructor
    NoAddresses,
    /// A `host:port` string could not be resolved to an IPv4 address
    InvalidAddress(String),
    /// Every bind attempt failed; carries the last underlying socket error
    Bind(io::Error),
    /// The operation targeted a hub that is already closed
    HubClosed,
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::NoAddresses => write!(f, "at least one UDP address is required"),
            HubError::InvalidAddress(addr) => write!(f, "invalid UDP address: {}", addr),
            HubError::Bind(err) => write!(f, "all bind attempts failed: {}", err),
            HubError::HubClosed => write!(f, "stream hub closed"),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::Bind(err) => Some(err),
            _ => None,
        }
    }
}
