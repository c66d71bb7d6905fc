//! Error types for host bus operations.

use thiserror::Error;

/// Result type for host bus operations.
pub type BleResult<T> = Result<T, BleError>;

/// Error type for the BlueZ object-manager facade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BleError {
    /// The bus rejected a call or the connection failed
    #[error("Host bus error: {0}")]
    Bus(String),

    /// A method call did not complete within its deadline
    #[error("BLE call timeout: {method} did not complete within {timeout_ms}ms")]
    CallTimeout { method: String, timeout_ms: u64 },

    /// No object in the cache matched
    #[error("interface {interface} not found")]
    NotFound { interface: String },

    /// More than one object matched where exactly one was expected
    #[error("found {count} instances of interface {interface}")]
    Ambiguous { interface: String, count: usize },

    /// A property the host stack guarantees was missing from the object
    #[error("{interface} object is missing required property {property}")]
    MissingProperty { interface: String, property: String },

    /// A signal body did not have the expected shape
    #[error("Malformed signal: {0}")]
    MalformedSignal(String),

    /// A UUID string could not be parsed
    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    /// A discovery window is already running
    #[error("A discovery window is already active")]
    DiscoveryActive,
}

impl From<zbus::Error> for BleError {
    fn from(e: zbus::Error) -> Self {
        Self::Bus(e.to_string())
    }
}

impl From<zbus::fdo::Error> for BleError {
    fn from(e: zbus::fdo::Error) -> Self {
        Self::Bus(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = BleError::CallTimeout {
            method: "org.bluez.Adapter1.StartDiscovery".to_string(),
            timeout_ms: 5000,
        };
        assert!(err.to_string().contains("BLE call timeout"));
    }

    #[test]
    fn test_not_found_display() {
        let err = BleError::NotFound {
            interface: "org.bluez.Device1".to_string(),
        };
        assert_eq!(err.to_string(), "interface org.bluez.Device1 not found");
    }
}
