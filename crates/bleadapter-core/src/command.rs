//! BLE command processor.
//!
//! Every inbound command is parsed, expanded into an ordered pipeline of
//! sub-commands and executed against the device it addresses. The outcome
//! is published back as the received command object with `err` and
//! `response` fields added.

use std::fmt;
use std::sync::Arc;

use bleadapter_bluez::{BleResult, Device, ObjectCache};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::{AdapterDefaults, Qos};
use crate::error::CommandError;

pub const FIELD_COMMAND: &str = "command";
pub const FIELD_DEVICE_ADDRESS: &str = "deviceAddress";
pub const FIELD_CHARACTERISTIC: &str = "gattCharacteristic";
pub const FIELD_VALUE: &str = "gattCharacteristicValue";
pub const FIELD_STAY_CONNECTED: &str = "stayConnected";
pub const FIELD_ERR: &str = "err";
pub const FIELD_RESPONSE: &str = "response";
pub const FIELD_PAYLOAD: &str = "payload";

/// Top-level commands accepted from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Pair,
    CancelPairing,
    Remove,
    Connect,
    Disconnect,
    Read,
    Write,
}

impl CommandKind {
    /// Parse a command name, ignoring case.
    pub fn parse(name: &str) -> Result<Self, CommandError> {
        match name.to_ascii_lowercase().as_str() {
            "pair" => Ok(Self::Pair),
            "cancelpairing" => Ok(Self::CancelPairing),
            "remove" => Ok(Self::Remove),
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pair => "pair",
            Self::CancelPairing => "cancelpairing",
            Self::Remove => "remove",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Ordered sub-commands for this command.
    ///
    /// A trailing [`SubCommand::Disconnect`] is appended unless the caller
    /// asked to stay connected or the command already ends the connection.
    pub fn pipeline(&self, stay_connected: bool) -> Vec<SubCommand> {
        let mut steps = match self {
            Self::Pair => vec![SubCommand::Pair],
            Self::CancelPairing => vec![SubCommand::CancelPairing],
            Self::Remove => vec![SubCommand::Remove],
            Self::Connect => vec![SubCommand::Connect],
            Self::Disconnect => vec![SubCommand::Disconnect],
            Self::Read => vec![SubCommand::Connect, SubCommand::Read],
            Self::Write => vec![SubCommand::Connect, SubCommand::Write],
        };
        let ends_connection = matches!(self, Self::Disconnect | Self::Remove);
        if !stay_connected && !ends_connection {
            steps.push(SubCommand::Disconnect);
        }
        steps
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of a command pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand {
    Pair,
    CancelPairing,
    Remove,
    Connect,
    Disconnect,
    Read,
    Write,
}

impl SubCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pair => "Pair",
            Self::CancelPairing => "CancelPairing",
            Self::Remove => "Remove",
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::Read => "Read",
            Self::Write => "Write",
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Self::Pair => "pair with BLE device",
            Self::CancelPairing => "cancel pairing with BLE device",
            Self::Remove => "remove BLE device",
            Self::Connect => "connect to BLE device",
            Self::Disconnect => "disconnect from BLE device",
            Self::Read => "read data from BLE device",
            Self::Write => "write BLE data to BLE device",
        }
    }

    /// Run the step against `device`.
    pub async fn run(
        &self,
        cache: &ObjectCache,
        device: &Device,
        command: &mut BleCommand,
    ) -> Result<(), CommandError> {
        self.execute(cache, device, command)
            .await
            .map_err(|source| CommandError::SubCommand {
                name: self.name(),
                action: self.action(),
                source,
            })
    }

    async fn execute(
        &self,
        cache: &ObjectCache,
        device: &Device,
        command: &mut BleCommand,
    ) -> BleResult<()> {
        match self {
            Self::Pair => device.pair().await,
            Self::CancelPairing => device.cancel_pairing().await,
            Self::Remove => cache.adapter()?.remove_device(device).await,
            Self::Connect => device.connect().await,
            Self::Disconnect => device.disconnect().await,
            Self::Read => {
                // GATT objects appear once the connection resolves services.
                cache.update().await?;
                let characteristic =
                    cache.device_characteristic(device, command.characteristic())?;
                let value = characteristic.read_value().await?;
                debug!("Value read from {}: {:?}", characteristic.path(), value);
                command.read_value = Some(value);
                Ok(())
            }
            Self::Write => {
                cache.update().await?;
                let characteristic =
                    cache.device_characteristic(device, command.characteristic())?;
                characteristic.write_value(command.write_value()).await
            }
        }
    }
}

/// A validated command.
#[derive(Debug, Clone, PartialEq)]
pub struct BleCommand {
    pub kind: CommandKind,
    pub device_address: String,
    /// Lowercased characteristic UUID, set for `read` and `write`.
    pub characteristic: Option<String>,
    /// Bytes to write, set for `write`.
    pub value: Option<Vec<u8>>,
    pub stay_connected: bool,
    /// Value produced by a `Read` step.
    pub read_value: Option<Vec<u8>>,
    body: Map<String, Value>,
}

impl BleCommand {
    /// Parse and validate a command payload.
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        Self::from_body(decode_body(payload)?)
    }

    pub fn from_body(body: Map<String, Value>) -> Result<Self, CommandError> {
        let kind = CommandKind::parse(required_str(&body, FIELD_COMMAND)?)?;
        let device_address = required_str(&body, FIELD_DEVICE_ADDRESS)?.to_string();

        let characteristic = match kind {
            CommandKind::Read | CommandKind::Write => {
                Some(required_str(&body, FIELD_CHARACTERISTIC)?.to_ascii_lowercase())
            }
            _ => None,
        };
        let value = match kind {
            CommandKind::Write => Some(byte_array(&body)?),
            _ => None,
        };
        let stay_connected = body.get(FIELD_STAY_CONNECTED) == Some(&Value::Bool(true));

        Ok(Self {
            kind,
            device_address,
            characteristic,
            value,
            stay_connected,
            read_value: None,
            body,
        })
    }

    pub fn pipeline(&self) -> Vec<SubCommand> {
        self.kind.pipeline(self.stay_connected)
    }

    fn characteristic(&self) -> &str {
        self.characteristic.as_deref().unwrap_or_default()
    }

    fn write_value(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }

    /// The received command object with the outcome fields added.
    pub fn response(&self, outcome: &Result<(), CommandError>) -> Value {
        let mut body = self.body.clone();
        if let Some(value) = &self.read_value {
            body.insert(FIELD_VALUE.to_string(), Value::from(value.clone()));
        }
        let (err, message) = match outcome {
            Ok(()) => (false, format!("BLE command {} executed successfully", self.kind)),
            Err(e) => (true, e.to_string()),
        };
        body.insert(FIELD_ERR.to_string(), Value::Bool(err));
        body.insert(FIELD_RESPONSE.to_string(), Value::String(message));
        Value::Object(body)
    }
}

/// Decode a payload into a JSON object without validating its fields.
pub fn decode_body(payload: &[u8]) -> Result<Map<String, Value>, CommandError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| CommandError::Malformed(e.to_string()))?;
    match value {
        Value::Object(body) => Ok(body),
        other => Err(CommandError::Malformed(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn required_str<'a>(body: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, CommandError> {
    match body.get(field) {
        None | Some(Value::Null) => Err(CommandError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(CommandError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(CommandError::InvalidValue(format!(
            "{} must be a string, got {}",
            field, other
        ))),
    }
}

fn byte_array(body: &Map<String, Value>) -> Result<Vec<u8>, CommandError> {
    let items = match body.get(FIELD_VALUE) {
        None | Some(Value::Null) => return Err(CommandError::MissingField(FIELD_VALUE)),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(CommandError::InvalidValue(format!(
                "{} must be an array of bytes, got {}",
                FIELD_VALUE, other
            )))
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| {
                    CommandError::InvalidValue(format!(
                        "{} entries must be integers in 0..=255, got {}",
                        FIELD_VALUE, item
                    ))
                })
        })
        .collect()
}

/// Response published for a payload that could not be parsed.
pub fn malformed_response(payload: &[u8], error: &CommandError) -> Value {
    serde_json::json!({
        FIELD_COMMAND: "",
        FIELD_ERR: true,
        FIELD_RESPONSE: error.to_string(),
        FIELD_PAYLOAD: String::from_utf8_lossy(payload),
    })
}

/// Response published for a command object that failed validation.
pub fn rejected_response(mut body: Map<String, Value>, error: &CommandError) -> Value {
    body.insert(FIELD_ERR.to_string(), Value::Bool(true));
    body.insert(FIELD_RESPONSE.to_string(), Value::String(error.to_string()));
    Value::Object(body)
}

/// Executes commands and publishes their responses.
pub struct CommandProcessor {
    cache: Arc<ObjectCache>,
    broker: Arc<dyn Broker>,
    response_topic: String,
    qos: Qos,
}

impl CommandProcessor {
    pub fn new(cache: Arc<ObjectCache>, broker: Arc<dyn Broker>, defaults: &AdapterDefaults) -> Self {
        Self {
            cache,
            broker,
            response_topic: defaults.response_topic(),
            qos: defaults.qos,
        }
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Handle one inbound payload and publish the response.
    pub async fn handle(&self, payload: &[u8]) -> Result<(), CommandError> {
        let body = match decode_body(payload) {
            Ok(body) => body,
            Err(e) => {
                error!("Rejecting BLE command: {}", e);
                self.respond(malformed_response(payload, &e)).await;
                return Err(e);
            }
        };
        let mut command = match BleCommand::from_body(body.clone()) {
            Ok(command) => command,
            Err(e) => {
                error!("Rejecting BLE command: {}", e);
                self.respond(rejected_response(body, &e)).await;
                return Err(e);
            }
        };

        info!(
            "Executing BLE command {} for device {}",
            command.kind, command.device_address
        );
        let outcome = self.execute(&mut command).await;
        if let Err(e) = &outcome {
            error!("{}", e);
        }
        self.respond(command.response(&outcome)).await;
        outcome
    }

    /// Resolve the device and run the pipeline, stopping at the first failure.
    pub async fn execute(&self, command: &mut BleCommand) -> Result<(), CommandError> {
        let pipeline = command.pipeline();
        debug!("Pipeline for {}: {:?}", command.kind, pipeline);

        let lookup = match self.cache.update().await {
            Ok(()) => self.cache.device_by_address(&command.device_address),
            Err(e) => Err(e),
        };
        let device = lookup.map_err(|source| CommandError::DeviceLookup {
            command: command.kind.to_string(),
            source,
        })?;

        for step in pipeline {
            debug!("Executing subcommand {}", step.name());
            step.run(&self.cache, &device, command).await?;
            debug!("Subcommand {} complete", step.name());
        }
        Ok(())
    }

    async fn respond(&self, response: Value) {
        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error encoding command response: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .broker
            .publish(&self.response_topic, payload, self.qos)
            .await
        {
            warn!("Error publishing command response: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: Value) -> Result<BleCommand, CommandError> {
        BleCommand::parse(value.to_string().as_bytes())
    }

    #[test]
    fn test_pipelines() {
        use SubCommand::*;
        assert_eq!(CommandKind::Pair.pipeline(false), vec![Pair, Disconnect]);
        assert_eq!(CommandKind::CancelPairing.pipeline(false), vec![CancelPairing, Disconnect]);
        assert_eq!(CommandKind::Remove.pipeline(false), vec![Remove]);
        assert_eq!(CommandKind::Connect.pipeline(true), vec![Connect]);
        assert_eq!(CommandKind::Disconnect.pipeline(false), vec![Disconnect]);
        assert_eq!(CommandKind::Read.pipeline(false), vec![Connect, Read, Disconnect]);
        assert_eq!(CommandKind::Write.pipeline(true), vec![Connect, Write]);
    }

    #[test]
    fn test_command_names_ignore_case() {
        assert_eq!(CommandKind::parse("CancelPairing").unwrap(), CommandKind::CancelPairing);
        assert_eq!(CommandKind::parse("READ").unwrap(), CommandKind::Read);
        assert!(matches!(
            CommandKind::parse("scan"),
            Err(CommandError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_validates_fields() {
        assert!(matches!(
            BleCommand::parse(b"not-json"),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            BleCommand::parse(b"[1,2]"),
            Err(CommandError::Malformed(_))
        ));
        assert_eq!(
            parse(serde_json::json!({"command": "pair"})).unwrap_err(),
            CommandError::MissingField(FIELD_DEVICE_ADDRESS)
        );
        assert_eq!(
            parse(serde_json::json!({"command": "read", "deviceAddress": "A0:E6:F8:8A:4D:5C"}))
                .unwrap_err(),
            CommandError::MissingField(FIELD_CHARACTERISTIC)
        );
        assert!(matches!(
            parse(serde_json::json!({
                "command": "write",
                "deviceAddress": "A0:E6:F8:8A:4D:5C",
                "gattCharacteristic": "2a19",
                "gattCharacteristicValue": [1, 256]
            })),
            Err(CommandError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_stay_connected_requires_true() {
        let command = parse(serde_json::json!({
            "command": "connect",
            "deviceAddress": "A0:E6:F8:8A:4D:5C",
            "stayConnected": "true"
        }))
        .unwrap();
        assert!(!command.stay_connected);
        assert_eq!(command.pipeline().last(), Some(&SubCommand::Disconnect));
    }

    #[test]
    fn test_write_value_and_characteristic() {
        let command = parse(serde_json::json!({
            "command": "Write",
            "deviceAddress": "A0:E6:F8:8A:4D:5C",
            "gattCharacteristic": "32F9169F-4FEB-4883-ADE6-1F0127018DB3",
            "gattCharacteristicValue": [1, 2, 255]
        }))
        .unwrap();
        assert_eq!(command.kind, CommandKind::Write);
        assert_eq!(command.value, Some(vec![1, 2, 255]));
        assert_eq!(
            command.characteristic.as_deref(),
            Some("32f9169f-4feb-4883-ade6-1f0127018db3")
        );
    }

    #[test]
    fn test_response_echoes_command() {
        let mut command = parse(serde_json::json!({
            "command": "read",
            "deviceAddress": "A0:E6:F8:8A:4D:5C",
            "gattCharacteristic": "2a19",
            "requestId": 7
        }))
        .unwrap();
        command.read_value = Some(vec![0x2a]);

        let response = command.response(&Ok(()));
        assert_eq!(response["requestId"], 7);
        assert_eq!(response["err"], false);
        assert_eq!(response["gattCharacteristicValue"], serde_json::json!([42]));

        let failed = command.response(&Err(CommandError::MissingField(FIELD_VALUE)));
        assert_eq!(failed["err"], true);
        assert!(failed["response"].as_str().unwrap().contains(FIELD_VALUE));
    }

    #[test]
    fn test_malformed_response() {
        let response = malformed_response(b"not-json", &CommandError::Malformed("eof".into()));
        assert_eq!(response["command"], "");
        assert_eq!(response["err"], true);
        assert_eq!(response["payload"], "not-json");
    }
}
