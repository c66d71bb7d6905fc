//! In-memory [`BluezBus`] for tests.
//!
//! `MockBus` keeps a managed-object map, records every method call and
//! match-rule operation, and lets tests inject failures, hung calls and
//! signals.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::bus::{BluezBus, CallReply, MatchRule, MethodCall, RawSignal};
use crate::constants::{
    props, ADAPTER_INTERFACE, CHARACTERISTIC_INTERFACE, DEVICE_INTERFACE, SERVICE_INTERFACE,
};
use crate::error::{BleError, BleResult};
use crate::path;
use crate::variant::{InterfaceMap, ManagedObjects, Properties, Variant};

/// Default adapter path used by the fixtures.
pub const ADAPTER_PATH: &str = "/org/bluez/hci0";

/// Device object path for `address` under [`ADAPTER_PATH`].
pub fn device_path(address: &str) -> String {
    format!("{}/dev_{}", ADAPTER_PATH, address.replace(':', "_"))
}

/// Properties of an idle, powered adapter.
pub fn adapter_properties(address: &str) -> Properties {
    let mut properties = Properties::new();
    properties.insert(props::ADDRESS.into(), Variant::from(address));
    properties.insert(props::ALIAS.into(), Variant::from("hci0"));
    properties.insert(props::POWERED.into(), Variant::from(true));
    properties.insert(props::DISCOVERING.into(), Variant::from(false));
    properties
}

/// Properties of a discovered, unpaired device.
pub fn device_properties(address: &str, uuids: &[&str]) -> Properties {
    let mut properties = Properties::new();
    properties.insert(props::ADDRESS.into(), Variant::from(address));
    properties.insert(props::ALIAS.into(), Variant::from(address.replace(':', "-")));
    properties.insert(
        props::UUIDS.into(),
        Variant::StrList(uuids.iter().map(|u| u.to_string()).collect()),
    );
    properties.insert(props::PAIRED.into(), Variant::from(false));
    properties.insert(props::CONNECTED.into(), Variant::from(false));
    properties.insert(props::TRUSTED.into(), Variant::from(false));
    properties.insert(props::BLOCKED.into(), Variant::from(false));
    properties.insert(props::LEGACY_PAIRING.into(), Variant::from(false));
    properties.insert(props::SERVICES_RESOLVED.into(), Variant::from(false));
    properties.insert(props::ADAPTER.into(), Variant::ObjectPath(ADAPTER_PATH.into()));
    properties
}

fn single(interface: &str, props: Properties) -> InterfaceMap {
    let mut interfaces = InterfaceMap::new();
    interfaces.insert(interface.to_string(), props);
    interfaces
}

/// A scripted host bus.
pub struct MockBus {
    objects: Mutex<ManagedObjects>,
    calls: Mutex<Vec<(String, MethodCall)>>,
    installed: Mutex<Vec<MatchRule>>,
    added: Mutex<Vec<MatchRule>>,
    removed: Mutex<Vec<MatchRule>>,
    failures: Mutex<HashMap<&'static str, BleError>>,
    hangs: Mutex<HashSet<&'static str>>,
    fail_updates: AtomicBool,
    fail_add_match: AtomicBool,
    closed: AtomicBool,
    signals: broadcast::Sender<RawSignal>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(256);
        Self {
            objects: Mutex::new(ManagedObjects::new()),
            calls: Mutex::new(Vec::new()),
            installed: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            hangs: Mutex::new(HashSet::new()),
            fail_updates: AtomicBool::new(false),
            fail_add_match: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            signals,
        }
    }

    /// A bus with one idle adapter at [`ADAPTER_PATH`].
    pub fn with_adapter() -> Self {
        let bus = Self::new();
        bus.insert_object(
            ADAPTER_PATH,
            single(ADAPTER_INTERFACE, adapter_properties("00:1A:7D:DA:71:13")),
        );
        bus
    }

    pub fn insert_object(&self, path: &str, interfaces: InterfaceMap) {
        self.objects
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(interfaces);
    }

    /// Remove the object at `path` and everything below it.
    pub fn remove_object(&self, path: &str) {
        self.objects
            .lock()
            .retain(|p, _| p != path && !path::is_descendant(p, path));
    }

    /// Add a device with `address` advertising `uuids`; returns its path.
    pub fn add_device(&self, address: &str, uuids: &[&str]) -> String {
        let path = device_path(address);
        self.insert_object(&path, single(DEVICE_INTERFACE, device_properties(address, uuids)));
        path
    }

    /// Add a GATT service and characteristic `uuid` under `device_path`;
    /// returns the characteristic path.
    pub fn add_characteristic(&self, device_path: &str, uuid: &str, value: &[u8]) -> String {
        let service_path = format!("{}/service000a", device_path);
        let mut service = Properties::new();
        service.insert(props::UUID.into(), Variant::from(uuid));
        service.insert(props::PRIMARY.into(), Variant::from(true));
        service.insert(props::DEVICE.into(), Variant::ObjectPath(device_path.into()));
        self.insert_object(&service_path, single(SERVICE_INTERFACE, service));

        let char_path = format!("{}/char000b", service_path);
        let mut characteristic = Properties::new();
        characteristic.insert(props::UUID.into(), Variant::from(uuid));
        characteristic.insert(props::SERVICE.into(), Variant::ObjectPath(service_path));
        characteristic.insert(props::VALUE.into(), Variant::Bytes(value.to_vec()));
        characteristic.insert(
            props::FLAGS.into(),
            Variant::StrList(vec!["read".into(), "write".into()]),
        );
        self.insert_object(&char_path, single(CHARACTERISTIC_INTERFACE, characteristic));
        char_path
    }

    /// Set one property on an existing object interface.
    pub fn set_property(&self, path: &str, interface: &str, name: &str, value: Variant) {
        if let Some(props) = self
            .objects
            .lock()
            .get_mut(path)
            .and_then(|interfaces| interfaces.get_mut(interface))
        {
            props.insert(name.to_string(), value);
        }
    }

    pub fn property(&self, path: &str, interface: &str, name: &str) -> Option<Variant> {
        self.objects
            .lock()
            .get(path)
            .and_then(|interfaces| interfaces.get(interface))
            .and_then(|props| props.get(name))
            .cloned()
    }

    /// Make every call to `member` fail with `error`.
    pub fn fail_method(&self, member: &'static str, error: BleError) {
        self.failures.lock().insert(member, error);
    }

    /// Make every call to `member` never complete.
    pub fn hang_method(&self, member: &'static str) {
        self.hangs.lock().insert(member);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_match(&self, fail: bool) {
        self.fail_add_match.store(fail, Ordering::SeqCst);
    }

    /// Broadcast a raw signal; returns the number of receivers reached.
    pub fn emit(&self, signal: RawSignal) -> usize {
        self.signals.send(signal).unwrap_or(0)
    }

    /// Recorded calls as `(path, call)`.
    pub fn calls(&self) -> Vec<(String, MethodCall)> {
        self.calls.lock().clone()
    }

    /// Recorded call member names, in order.
    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|(_, call)| call.member()).collect()
    }

    /// Recorded call member names issued against `path`.
    pub fn call_names_on(&self, path: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, call)| call.member())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Rules currently installed.
    pub fn installed_matches(&self) -> Vec<MatchRule> {
        self.installed.lock().clone()
    }

    /// Every successful `AddMatch`, in order.
    pub fn added_matches(&self) -> Vec<MatchRule> {
        self.added.lock().clone()
    }

    /// Every successful `RemoveMatch`, in order.
    pub fn removed_matches(&self) -> Vec<MatchRule> {
        self.removed.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscribers to the signal stream.
    pub fn signal_receivers(&self) -> usize {
        self.signals.receiver_count()
    }

    fn apply(&self, path: &str, call: &MethodCall) -> CallReply {
        let set = |interface: &str, name: &str, value: bool| {
            self.set_property(path, interface, name, Variant::from(value))
        };
        match call {
            MethodCall::StartDiscovery => set(ADAPTER_INTERFACE, props::DISCOVERING, true),
            MethodCall::StopDiscovery => set(ADAPTER_INTERFACE, props::DISCOVERING, false),
            MethodCall::RemoveDevice { device } => self.remove_object(device),
            MethodCall::Connect => set(DEVICE_INTERFACE, props::CONNECTED, true),
            MethodCall::Disconnect => set(DEVICE_INTERFACE, props::CONNECTED, false),
            MethodCall::Pair => set(DEVICE_INTERFACE, props::PAIRED, true),
            MethodCall::WriteValue { value } => self.set_property(
                path,
                CHARACTERISTIC_INTERFACE,
                props::VALUE,
                Variant::Bytes(value.clone()),
            ),
            MethodCall::ReadValue => {
                let value = self
                    .property(path, CHARACTERISTIC_INTERFACE, props::VALUE)
                    .and_then(|v| v.as_bytes().map(<[u8]>::to_vec))
                    .unwrap_or_default();
                return CallReply::Bytes(value);
            }
            MethodCall::SetDiscoveryFilter { .. } | MethodCall::CancelPairing => {}
        }
        CallReply::Unit
    }
}

#[async_trait]
impl BluezBus for MockBus {
    async fn managed_objects(&self) -> BleResult<ManagedObjects> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BleError::Bus("GetManagedObjects failed".into()));
        }
        Ok(self.objects.lock().clone())
    }

    async fn call(&self, path: &str, call: MethodCall) -> BleResult<CallReply> {
        let member = call.member();
        self.calls.lock().push((path.to_string(), call.clone()));

        let hung = self.hangs.lock().contains(member);
        if hung {
            std::future::pending::<()>().await;
        }
        let failure = self.failures.lock().get(member).cloned();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(self.apply(path, &call))
    }

    async fn add_match(&self, rule: MatchRule) -> BleResult<()> {
        if self.fail_add_match.load(Ordering::SeqCst) {
            return Err(BleError::Bus(format!("AddMatch rejected: {}", rule)));
        }
        self.installed.lock().push(rule);
        self.added.lock().push(rule);
        Ok(())
    }

    async fn remove_match(&self, rule: MatchRule) -> BleResult<()> {
        let mut installed = self.installed.lock();
        if let Some(pos) = installed.iter().position(|r| *r == rule) {
            installed.remove(pos);
        }
        self.removed.lock().push(rule);
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<RawSignal> {
        self.signals.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
