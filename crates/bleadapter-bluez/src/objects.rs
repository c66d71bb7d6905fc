//! Typed snapshots of BlueZ objects.
//!
//! Each snapshot is a copy of the object's properties taken from the cache
//! at lookup time, plus a handle to the bus so methods can be invoked on the
//! object. Accessors return a safe default when a property is absent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bus::{BluezBus, CallReply, MethodCall};
use crate::constants::{props, DEVICE_INTERFACE};
use crate::error::{BleError, BleResult};
use crate::uuid;
use crate::variant::{Properties, PropertyExt, Variant};

/// Sentinel for absent signed readings (RSSI, TX power).
pub const NO_READING: i16 = -1;

/// Bus handle with a per-call deadline.
#[derive(Clone)]
pub struct Caller {
    bus: Arc<dyn BluezBus>,
    timeout: Duration,
}

impl Caller {
    pub fn new(bus: Arc<dyn BluezBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke `call` on `path`, failing with [`BleError::CallTimeout`] when
    /// the deadline expires first.
    pub async fn call(&self, path: &str, call: MethodCall) -> BleResult<CallReply> {
        let method = call.qualified_name();
        match tokio::time::timeout(self.timeout, self.bus.call(path, call)).await {
            Ok(result) => result,
            Err(_) => Err(BleError::CallTimeout {
                method,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn call_unit(&self, path: &str, call: MethodCall) -> BleResult<()> {
        self.call(path, call).await.map(|_| ())
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller").field("timeout", &self.timeout).finish()
    }
}

fn u16_of(props: &Properties, key: &str) -> u16 {
    props.get(key).and_then(Variant::as_u16).unwrap_or(0)
}

fn u32_of(props: &Properties, key: &str) -> u32 {
    props.get(key).and_then(Variant::as_u32).unwrap_or(0)
}

fn reading_of(props: &Properties, key: &str) -> i16 {
    props.get(key).and_then(Variant::as_i16).unwrap_or(NO_READING)
}

/// The local radio controller (`org.bluez.Adapter1`).
#[derive(Debug, Clone)]
pub struct Adapter {
    path: String,
    props: Properties,
    caller: Caller,
}

impl Adapter {
    pub(crate) fn new(path: String, props: Properties, caller: Caller) -> Self {
        Self { path, props, caller }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn properties(&self) -> &Properties {
        &self.props
    }

    pub fn address(&self) -> String {
        self.props.str_or_default(props::ADDRESS)
    }

    pub fn alias(&self) -> String {
        self.props.str_or_default(props::ALIAS)
    }

    pub fn class(&self) -> u32 {
        u32_of(&self.props, props::CLASS)
    }

    pub fn powered(&self) -> bool {
        self.props.bool_or(props::POWERED, false)
    }

    pub fn discoverable(&self) -> bool {
        self.props.bool_or(props::DISCOVERABLE, false)
    }

    pub fn pairable(&self) -> bool {
        self.props.bool_or(props::PAIRABLE, false)
    }

    pub fn pairable_timeout(&self) -> u32 {
        u32_of(&self.props, props::PAIRABLE_TIMEOUT)
    }

    pub fn discoverable_timeout(&self) -> u32 {
        u32_of(&self.props, props::DISCOVERABLE_TIMEOUT)
    }

    /// Whether a discovery procedure was active when the snapshot was taken.
    pub fn discovering(&self) -> bool {
        self.props.bool_or(props::DISCOVERING, false)
    }

    pub fn uuids(&self) -> Vec<String> {
        self.props.strings(props::UUIDS)
    }

    pub fn modalias(&self) -> String {
        self.props.str_or_default(props::MODALIAS)
    }

    pub async fn start_discovery(&self) -> BleResult<()> {
        self.caller.call_unit(&self.path, MethodCall::StartDiscovery).await
    }

    pub async fn stop_discovery(&self) -> BleResult<()> {
        self.caller.call_unit(&self.path, MethodCall::StopDiscovery).await
    }

    /// Restrict discovery to LE peripherals advertising one of `uuids`.
    /// An empty list only sets the LE transport.
    pub async fn set_discovery_filter(&self, uuids: &[String]) -> BleResult<()> {
        let call = MethodCall::SetDiscoveryFilter {
            uuids: uuids.to_vec(),
        };
        self.caller.call_unit(&self.path, call).await
    }

    /// Ask the adapter to forget `device`.
    pub async fn remove_device(&self, device: &Device) -> BleResult<()> {
        debug!("Removing device {} ({})", device.address(), device.path());
        let call = MethodCall::RemoveDevice {
            device: device.path().to_string(),
        };
        self.caller.call_unit(&self.path, call).await
    }
}

/// A discovered peripheral (`org.bluez.Device1`).
#[derive(Debug, Clone)]
pub struct Device {
    path: String,
    address: String,
    props: Properties,
    caller: Caller,
}

impl Device {
    /// Build a snapshot; BlueZ guarantees `Address` on every device.
    pub(crate) fn new(path: String, props: Properties, caller: Caller) -> BleResult<Self> {
        let address = props
            .opt_str(props::ADDRESS)
            .ok_or_else(|| BleError::MissingProperty {
                interface: DEVICE_INTERFACE.to_string(),
                property: props::ADDRESS.to_string(),
            })?;
        Ok(Self {
            path,
            address,
            props,
            caller,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn properties(&self) -> &Properties {
        &self.props
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn alias(&self) -> String {
        self.props.str_or_default(props::ALIAS)
    }

    pub fn name(&self) -> String {
        self.props.str_or_default(props::NAME)
    }

    pub fn icon(&self) -> String {
        self.props.str_or_default(props::ICON)
    }

    pub fn class(&self) -> u32 {
        u32_of(&self.props, props::CLASS)
    }

    pub fn appearance(&self) -> u16 {
        u16_of(&self.props, props::APPEARANCE)
    }

    /// Advertised service UUIDs.
    pub fn uuids(&self) -> Vec<String> {
        self.props.strings(props::UUIDS)
    }

    pub fn paired(&self) -> bool {
        self.props.bool_or(props::PAIRED, false)
    }

    pub fn connected(&self) -> bool {
        self.props.bool_or(props::CONNECTED, false)
    }

    pub fn trusted(&self) -> bool {
        self.props.bool_or(props::TRUSTED, false)
    }

    pub fn blocked(&self) -> bool {
        self.props.bool_or(props::BLOCKED, false)
    }

    pub fn legacy_pairing(&self) -> bool {
        self.props.bool_or(props::LEGACY_PAIRING, false)
    }

    pub fn modalias(&self) -> String {
        self.props.str_or_default(props::MODALIAS)
    }

    /// Signal strength, [`NO_READING`] when absent.
    pub fn rssi(&self) -> i16 {
        reading_of(&self.props, props::RSSI)
    }

    /// Advertised TX power, [`NO_READING`] when absent.
    pub fn tx_power(&self) -> i16 {
        reading_of(&self.props, props::TX_POWER)
    }

    pub fn manufacturer_data(&self) -> BTreeMap<u16, Vec<u8>> {
        self.props
            .get(props::MANUFACTURER_DATA)
            .and_then(Variant::as_u16_bytes)
            .cloned()
            .unwrap_or_default()
    }

    pub fn service_data(&self) -> BTreeMap<String, Vec<u8>> {
        self.props
            .get(props::SERVICE_DATA)
            .and_then(Variant::as_str_bytes)
            .cloned()
            .unwrap_or_default()
    }

    pub fn services_resolved(&self) -> bool {
        self.props.bool_or(props::SERVICES_RESOLVED, false)
    }

    pub fn advertising_flags(&self) -> Vec<u8> {
        self.props.bytes(props::ADVERTISING_FLAGS)
    }

    /// Object path of the owning adapter.
    pub fn adapter(&self) -> String {
        self.props.str_or_default(props::ADAPTER)
    }

    /// Whether the device advertises any of `filters` (or `filters` is empty).
    pub fn matches_filters(&self, filters: &[String]) -> bool {
        filters.is_empty() || uuid::intersects(&self.uuids(), filters)
    }

    pub async fn connect(&self) -> BleResult<()> {
        self.caller.call_unit(&self.path, MethodCall::Connect).await
    }

    pub async fn disconnect(&self) -> BleResult<()> {
        self.caller.call_unit(&self.path, MethodCall::Disconnect).await
    }

    pub async fn pair(&self) -> BleResult<()> {
        self.caller.call_unit(&self.path, MethodCall::Pair).await
    }

    pub async fn cancel_pairing(&self) -> BleResult<()> {
        self.caller.call_unit(&self.path, MethodCall::CancelPairing).await
    }
}

/// `org.bluez.GattService1`
#[derive(Debug, Clone)]
pub struct GattService {
    path: String,
    props: Properties,
}

impl GattService {
    pub(crate) fn new(path: String, props: Properties) -> Self {
        Self { path, props }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical 128-bit UUID.
    pub fn uuid(&self) -> String {
        uuid::normalize(&self.props.str_or_default(props::UUID))
    }

    pub fn primary(&self) -> bool {
        self.props.bool_or(props::PRIMARY, false)
    }

    /// Object path of the owning device.
    pub fn device(&self) -> String {
        self.props.str_or_default(props::DEVICE)
    }

    pub fn includes(&self) -> Vec<String> {
        self.props.strings(props::INCLUDES)
    }
}

/// `org.bluez.GattCharacteristic1`
#[derive(Debug, Clone)]
pub struct GattCharacteristic {
    path: String,
    props: Properties,
    caller: Caller,
}

impl GattCharacteristic {
    pub(crate) fn new(path: String, props: Properties, caller: Caller) -> Self {
        Self { path, props, caller }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uuid(&self) -> String {
        uuid::normalize(&self.props.str_or_default(props::UUID))
    }

    /// Object path of the parent service.
    pub fn service(&self) -> String {
        self.props.str_or_default(props::SERVICE)
    }

    /// Cached value from the last read or notification.
    pub fn value(&self) -> Vec<u8> {
        self.props.bytes(props::VALUE)
    }

    pub fn notifying(&self) -> bool {
        self.props.bool_or(props::NOTIFYING, false)
    }

    pub fn flags(&self) -> Vec<String> {
        self.props.strings(props::FLAGS)
    }

    pub async fn read_value(&self) -> BleResult<Vec<u8>> {
        match self.caller.call(&self.path, MethodCall::ReadValue).await? {
            CallReply::Bytes(bytes) => Ok(bytes),
            CallReply::Unit => Ok(Vec::new()),
        }
    }

    pub async fn write_value(&self, value: &[u8]) -> BleResult<()> {
        let call = MethodCall::WriteValue {
            value: value.to_vec(),
        };
        self.caller.call_unit(&self.path, call).await
    }
}

/// `org.bluez.GattDescriptor1`
#[derive(Debug, Clone)]
pub struct GattDescriptor {
    path: String,
    props: Properties,
}

impl GattDescriptor {
    pub(crate) fn new(path: String, props: Properties) -> Self {
        Self { path, props }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uuid(&self) -> String {
        uuid::normalize(&self.props.str_or_default(props::UUID))
    }

    /// Object path of the parent characteristic.
    pub fn characteristic(&self) -> String {
        self.props.str_or_default(props::CHARACTERISTIC)
    }

    pub fn value(&self) -> Vec<u8> {
        self.props.bytes(props::VALUE)
    }

    pub fn flags(&self) -> Vec<String> {
        self.props.strings(props::FLAGS)
    }
}
