//! System bus implementation of [`BluezBus`] on top of `zbus`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use zbus::message::Type as MessageType;
use zbus::zvariant::{DynamicType, ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{proxy, Connection, Message, MessageStream};

use crate::bus::{BluezBus, CallReply, MatchRule, MethodCall, RawSignal, SignalArg};
use crate::constants::{
    BLUEZ_SERVICE, INTERFACES_ADDED, INTERFACES_REMOVED, PROPERTIES_CHANGED,
};
use crate::error::{BleError, BleResult};
use crate::variant::{InterfaceMap, ManagedObjects, Properties, Variant};

const DBUS_SERVICE: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Capacity of the shared raw signal channel.
const SIGNAL_CAPACITY: usize = 256;

type RawObjects = HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>;

#[proxy(
    interface = "org.freedesktop.DBus.ObjectManager",
    default_service = "org.bluez",
    default_path = "/"
)]
trait BluezObjectManager {
    fn get_managed_objects(&self) -> zbus::Result<RawObjects>;
}

/// Connection to the BlueZ daemon on the system bus.
pub struct SystemBus {
    conn: Connection,
    signals: broadcast::Sender<RawSignal>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SystemBus {
    /// Connect to the system bus and start the signal pump.
    pub async fn connect() -> BleResult<Self> {
        let conn = Connection::system().await?;
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let pump = tokio::spawn(pump_signals(conn.clone(), signals.clone()));
        debug!("Connected to system bus as {:?}", conn.unique_name());

        Ok(Self {
            conn,
            signals,
            pump: Mutex::new(Some(pump)),
        })
    }

    async fn invoke<B>(&self, path: &str, call: &MethodCall, body: &B) -> BleResult<Message>
    where
        B: serde::Serialize + DynamicType,
    {
        trace!("Calling {} on {}", call.qualified_name(), path);
        let reply = self
            .conn
            .call_method(
                Some(BLUEZ_SERVICE),
                path,
                Some(call.interface()),
                call.member(),
                body,
            )
            .await?;
        Ok(reply)
    }

    async fn bus_call(&self, member: &str, rule: MatchRule) -> BleResult<()> {
        self.conn
            .call_method(
                Some(DBUS_SERVICE),
                DBUS_PATH,
                Some(DBUS_SERVICE),
                member,
                &(rule.rule(),),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BluezBus for SystemBus {
    async fn managed_objects(&self) -> BleResult<ManagedObjects> {
        let proxy = BluezObjectManagerProxy::new(&self.conn).await?;
        let raw = proxy.get_managed_objects().await?;
        Ok(raw
            .into_iter()
            .map(|(path, interfaces)| (path.to_string(), decode_interfaces(interfaces)))
            .collect())
    }

    async fn call(&self, path: &str, call: MethodCall) -> BleResult<CallReply> {
        let no_options: HashMap<&str, Value<'_>> = HashMap::new();
        match &call {
            MethodCall::SetDiscoveryFilter { uuids } => {
                let mut filter: HashMap<&str, Value<'_>> = HashMap::new();
                filter.insert("Transport", Value::from("le"));
                if !uuids.is_empty() {
                    filter.insert("UUIDs", Value::from(uuids.clone()));
                }
                self.invoke(path, &call, &(filter,)).await?;
                Ok(CallReply::Unit)
            }
            MethodCall::RemoveDevice { device } => {
                let device = ObjectPath::try_from(device.as_str())
                    .map_err(|e| BleError::Bus(format!("invalid object path {}: {}", device, e)))?;
                self.invoke(path, &call, &(device,)).await?;
                Ok(CallReply::Unit)
            }
            MethodCall::ReadValue => {
                let reply = self.invoke(path, &call, &(no_options,)).await?;
                let bytes: Vec<u8> = reply.body().deserialize()?;
                Ok(CallReply::Bytes(bytes))
            }
            MethodCall::WriteValue { value } => {
                self.invoke(path, &call, &(value.clone(), no_options)).await?;
                Ok(CallReply::Unit)
            }
            MethodCall::StartDiscovery
            | MethodCall::StopDiscovery
            | MethodCall::Connect
            | MethodCall::Disconnect
            | MethodCall::Pair
            | MethodCall::CancelPairing => {
                self.invoke(path, &call, &()).await?;
                Ok(CallReply::Unit)
            }
        }
    }

    async fn add_match(&self, rule: MatchRule) -> BleResult<()> {
        debug!("Adding match rule {}", rule);
        self.bus_call("AddMatch", rule).await
    }

    async fn remove_match(&self, rule: MatchRule) -> BleResult<()> {
        debug!("Removing match rule {}", rule);
        self.bus_call("RemoveMatch", rule).await
    }

    fn signals(&self) -> broadcast::Receiver<RawSignal> {
        self.signals.subscribe()
    }

    async fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        debug!("System bus connection closed");
    }
}

/// Forward every signal received on the connection to the broadcast channel.
async fn pump_signals(conn: Connection, tx: broadcast::Sender<RawSignal>) {
    let mut stream = MessageStream::from(&conn);
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Error receiving message from system bus: {}", e);
                continue;
            }
        };
        if message.message_type() != MessageType::Signal {
            continue;
        }
        match decode_signal(&message) {
            Ok(Some(signal)) => {
                // No receivers outside of a discovery window is normal.
                let _ = tx.send(signal);
            }
            Ok(None) => {}
            Err(e) => warn!("Dropping signal: {}", e),
        }
    }
    debug!("System bus signal stream ended");
}

fn decode_signal(message: &Message) -> BleResult<Option<RawSignal>> {
    let header = message.header();
    let (Some(interface), Some(member)) = (header.interface(), header.member()) else {
        return Ok(None);
    };
    let name = format!("{}.{}", interface, member);
    let path = header.path().map(|p| p.to_string()).unwrap_or_default();
    let malformed = |e: zbus::Error| BleError::MalformedSignal(format!("{}: {}", name, e));

    let body = match name.as_str() {
        INTERFACES_ADDED => {
            let (object, interfaces): (OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>) =
                message.body().deserialize().map_err(malformed)?;
            vec![
                SignalArg::ObjectPath(object.to_string()),
                SignalArg::Interfaces(decode_interfaces(interfaces)),
            ]
        }
        INTERFACES_REMOVED => {
            let (object, interfaces): (OwnedObjectPath, Vec<String>) =
                message.body().deserialize().map_err(malformed)?;
            vec![
                SignalArg::ObjectPath(object.to_string()),
                SignalArg::StrList(interfaces),
            ]
        }
        PROPERTIES_CHANGED => {
            let (interface, changed, invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
                message.body().deserialize().map_err(malformed)?;
            vec![
                SignalArg::Str(interface),
                SignalArg::Properties(decode_properties(changed)),
                SignalArg::StrList(invalidated),
            ]
        }
        _ => Vec::new(),
    };

    Ok(Some(RawSignal { name, path, body }))
}

fn decode_interfaces(raw: HashMap<String, HashMap<String, OwnedValue>>) -> InterfaceMap {
    raw.into_iter()
        .map(|(interface, props)| (interface, decode_properties(props)))
        .collect()
}

fn decode_properties(raw: HashMap<String, OwnedValue>) -> Properties {
    raw.into_iter()
        .map(|(name, value)| (name, decode_value(value)))
        .collect()
}

fn decode_value(value: OwnedValue) -> Variant {
    let signature = value.value_signature().to_string();
    let value = Value::from(value);

    let decoded = match signature.as_str() {
        "s" => value.downcast::<String>().map(Variant::Str),
        "b" => value.downcast::<bool>().map(Variant::Bool),
        "q" => value.downcast::<u16>().map(Variant::U16),
        "n" => value.downcast::<i16>().map(Variant::I16),
        "u" => value.downcast::<u32>().map(Variant::U32),
        "o" => value
            .downcast::<OwnedObjectPath>()
            .map(|p| Variant::ObjectPath(p.to_string())),
        "ay" => value.downcast::<Vec<u8>>().map(Variant::Bytes),
        "as" => value.downcast::<Vec<String>>().map(Variant::StrList),
        "ao" => value
            .downcast::<Vec<OwnedObjectPath>>()
            .map(|paths| Variant::PathList(paths.into_iter().map(|p| p.to_string()).collect())),
        "a{qv}" => value.downcast::<HashMap<u16, OwnedValue>>().map(|entries| {
            Variant::U16Bytes(
                entries
                    .into_iter()
                    .filter_map(|(id, data)| bytes_of(data).map(|data| (id, data)))
                    .collect(),
            )
        }),
        "a{sv}" => value.downcast::<HashMap<String, OwnedValue>>().map(|entries| {
            Variant::StrBytes(
                entries
                    .into_iter()
                    .filter_map(|(id, data)| bytes_of(data).map(|data| (id, data)))
                    .collect(),
            )
        }),
        _ => return Variant::Other(signature.clone()),
    };

    decoded.unwrap_or(Variant::Other(signature))
}

fn bytes_of(value: OwnedValue) -> Option<Vec<u8>> {
    Value::from(value).downcast::<Vec<u8>>().ok()
}
