//! Error types for the adapter coordinator.

use bleadapter_bluez::BleError;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type for the adapter coordinator.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Invalid flags or malformed remote configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authenticate, subscribe or publish failed
    #[error("Broker error: {0}")]
    Broker(String),

    /// Cache refresh, method call or match rule failure on the host bus
    #[error(transparent)]
    HostBus(#[from] BleError),

    /// A command could not be executed
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The component was asked to stop
    #[error("Stopped")]
    Stopped,
}

impl AdapterError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }
}

/// Failure of a single inbound command.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    /// The payload was not a JSON object
    #[error("Unable to parse BLE command: {0}")]
    Malformed(String),

    /// A field the command requires was absent
    #[error("BLE command is missing required field {0}")]
    MissingField(&'static str),

    /// A field was present with the wrong type or range
    #[error("Invalid BLE command value: {0}")]
    InvalidValue(String),

    #[error("Unsupported BLE command \"{0}\"")]
    UnknownCommand(String),

    /// The target device was not in the object cache
    #[error(
        "Unable to execute BLE command \"{command}\". Error received when retrieving BLE device from DBUS object cache: {source}"
    )]
    DeviceLookup { command: String, source: BleError },

    /// A pipeline step failed; the rest of the pipeline was skipped
    #[error("{name}:Process - Unable to {action}: {source}")]
    SubCommand {
        name: &'static str,
        action: &'static str,
        source: BleError,
    },
}

impl CommandError {
    /// The host bus error behind this failure, if any.
    pub fn host_error(&self) -> Option<&BleError> {
        match self {
            Self::DeviceLookup { source, .. } | Self::SubCommand { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_command_names_step_and_cause() {
        let err = CommandError::SubCommand {
            name: "Connect",
            action: "connect to BLE device",
            source: BleError::Bus("org.bluez.Error.Failed".into()),
        };
        let text = err.to_string();
        assert!(text.starts_with("Connect:Process - Unable to connect to BLE device"));
        assert!(text.ends_with("org.bluez.Error.Failed"));
    }

    #[test]
    fn test_host_errors_convert() {
        let err: AdapterError = BleError::DiscoveryActive.into();
        assert!(matches!(err, AdapterError::HostBus(BleError::DiscoveryActive)));

        let lookup = CommandError::DeviceLookup {
            command: "read".into(),
            source: BleError::NotFound {
                interface: "org.bluez.Device1".into(),
            },
        };
        assert!(lookup.host_error().is_some());
        assert!(CommandError::MissingField("deviceAddress").host_error().is_none());
    }
}
