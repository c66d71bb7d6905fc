//! Object-cache facade over the BlueZ object manager.
//!
//! [`ObjectCache`] holds the last `GetManagedObjects` snapshot. `update()`
//! replaces it atomically; lookups always read one complete snapshot, never a
//! partially rebuilt one.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::bus::{BluezBus, MatchRule, RawSignal};
use crate::constants::{
    props, ADAPTER_INTERFACE, CHARACTERISTIC_INTERFACE, DESCRIPTOR_INTERFACE, DEVICE_INTERFACE,
    SERVICE_INTERFACE,
};
use crate::dbus::SystemBus;
use crate::error::{BleError, BleResult};
use crate::objects::{Adapter, Caller, Device, GattCharacteristic, GattDescriptor, GattService};
use crate::path;
use crate::uuid;
use crate::variant::{ManagedObjects, Properties, PropertyExt};

/// Default deadline for every call made through the cache.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot cache of BlueZ managed objects.
pub struct ObjectCache {
    bus: Arc<dyn BluezBus>,
    caller: Caller,
    objects: RwLock<Arc<ManagedObjects>>,
}

impl ObjectCache {
    /// Wrap `bus` and load the initial snapshot.
    pub async fn open(bus: Arc<dyn BluezBus>) -> BleResult<Self> {
        Self::open_with_timeout(bus, DEFAULT_CALL_TIMEOUT).await
    }

    pub async fn open_with_timeout(bus: Arc<dyn BluezBus>, timeout: Duration) -> BleResult<Self> {
        let cache = Self {
            caller: Caller::new(bus.clone(), timeout),
            bus,
            objects: RwLock::new(Arc::new(ManagedObjects::new())),
        };
        cache.update().await?;
        Ok(cache)
    }

    /// Connect to BlueZ on the system bus.
    pub async fn open_system() -> BleResult<Self> {
        let bus = SystemBus::connect().await?;
        Self::open(Arc::new(bus)).await
    }

    pub async fn close(&self) {
        self.bus.close().await;
    }

    /// Refresh the snapshot with `GetManagedObjects`.
    pub async fn update(&self) -> BleResult<()> {
        let timeout = self.caller.timeout();
        let objects = match tokio::time::timeout(timeout, self.bus.managed_objects()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BleError::CallTimeout {
                    method: "org.freedesktop.DBus.ObjectManager.GetManagedObjects".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };
        trace!("Object cache refreshed with {} objects", objects.len());
        *self.objects.write() = Arc::new(objects);
        Ok(())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ManagedObjects> {
        self.objects.read().clone()
    }

    /// All objects implementing `interface` that satisfy `pred`, in path order.
    fn find_objects<F>(&self, interface: &str, pred: F) -> Vec<(String, Properties)>
    where
        F: Fn(&str, &Properties) -> bool,
    {
        self.snapshot()
            .iter()
            .filter_map(|(path, interfaces)| {
                interfaces
                    .get(interface)
                    .filter(|object| pred(path, object))
                    .map(|object| (path.clone(), object.clone()))
            })
            .collect()
    }

    /// Exactly one object implementing `interface` that satisfies `pred`.
    fn find_object<F>(&self, interface: &str, pred: F) -> BleResult<(String, Properties)>
    where
        F: Fn(&str, &Properties) -> bool,
    {
        let mut found = self.find_objects(interface, pred);
        match found.len() {
            0 => Err(BleError::NotFound {
                interface: interface.to_string(),
            }),
            1 => Ok(found.remove(0)),
            count => Err(BleError::Ambiguous {
                interface: interface.to_string(),
                count,
            }),
        }
    }

    fn device_from(&self, (path, props): (String, Properties)) -> BleResult<Device> {
        Device::new(path, props, self.caller.clone())
    }

    pub fn adapter(&self) -> BleResult<Adapter> {
        let (path, props) = self.find_object(ADAPTER_INTERFACE, |_, _| true)?;
        Ok(Adapter::new(path, props, self.caller.clone()))
    }

    /// Device whose `Address` matches `address` (case-insensitive).
    pub fn device_by_address(&self, address: &str) -> BleResult<Device> {
        let found = self.find_object(DEVICE_INTERFACE, |_, object| {
            object
                .opt_str(props::ADDRESS)
                .is_some_and(|a| a.eq_ignore_ascii_case(address))
        })?;
        self.device_from(found)
    }

    /// Device whose `Name` equals `name`.
    pub fn device_by_name(&self, name: &str) -> BleResult<Device> {
        let found = self.find_object(DEVICE_INTERFACE, |_, object| {
            object.opt_str(props::NAME).as_deref() == Some(name)
        })?;
        self.device_from(found)
    }

    /// The single device advertising all of `uuids`.
    pub fn device(&self, uuids: &[String]) -> BleResult<Device> {
        let found = self.find_object(DEVICE_INTERFACE, |_, object| {
            uuid::includes_all(&object.strings(props::UUIDS), uuids)
        })?;
        self.device_from(found)
    }

    /// Devices advertising all of `uuids`; every device when `uuids` is empty.
    pub fn devices(&self, uuids: &[String]) -> BleResult<Vec<Device>> {
        let found = self.find_objects(DEVICE_INTERFACE, |_, object| {
            uuid::includes_all(&object.strings(props::UUIDS), uuids)
        });
        if found.is_empty() {
            return Err(BleError::NotFound {
                interface: DEVICE_INTERFACE.to_string(),
            });
        }
        found
            .into_iter()
            .map(|object| self.device_from(object))
            .collect()
    }

    pub fn service(&self, id: &str) -> BleResult<GattService> {
        let (path, props) = self.find_object(SERVICE_INTERFACE, uuid_is(id))?;
        Ok(GattService::new(path, props))
    }

    pub fn characteristic(&self, id: &str) -> BleResult<GattCharacteristic> {
        let (path, props) = self.find_object(CHARACTERISTIC_INTERFACE, uuid_is(id))?;
        Ok(GattCharacteristic::new(path, props, self.caller.clone()))
    }

    /// Characteristic `id` belonging to `device`.
    pub fn device_characteristic(&self, device: &Device, id: &str) -> BleResult<GattCharacteristic> {
        let matches_uuid = uuid_is(id);
        let (path, props) = self.find_object(CHARACTERISTIC_INTERFACE, |object_path, object| {
            path::is_descendant(object_path, device.path()) && matches_uuid(object_path, object)
        })?;
        Ok(GattCharacteristic::new(path, props, self.caller.clone()))
    }

    pub fn descriptor(&self, id: &str) -> BleResult<GattDescriptor> {
        let (path, props) = self.find_object(DESCRIPTOR_INTERFACE, uuid_is(id))?;
        Ok(GattDescriptor::new(path, props))
    }

    pub async fn read_characteristic(&self, id: &str) -> BleResult<Vec<u8>> {
        self.characteristic(id)?.read_value().await
    }

    pub async fn write_characteristic(&self, id: &str, value: &[u8]) -> BleResult<()> {
        self.characteristic(id)?.write_value(value).await
    }

    pub async fn add_match(&self, rule: MatchRule) -> BleResult<()> {
        bounded(self.caller.timeout(), "org.freedesktop.DBus.AddMatch", self.bus.add_match(rule))
            .await
    }

    pub async fn remove_match(&self, rule: MatchRule) -> BleResult<()> {
        bounded(
            self.caller.timeout(),
            "org.freedesktop.DBus.RemoveMatch",
            self.bus.remove_match(rule),
        )
        .await
    }

    /// Subscribe to the shared raw signal stream.
    pub fn signal_channel(&self) -> broadcast::Receiver<RawSignal> {
        self.bus.signals()
    }

    /// Render the snapshot as `path`, `  interface`, `    property = value` lines.
    pub fn describe(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for (path, interfaces) in snapshot.iter() {
            let _ = writeln!(out, "{}", path);
            let mut names: Vec<&String> = interfaces.keys().collect();
            names.sort();
            for name in names {
                let _ = writeln!(out, "  {}", name);
                let props = &interfaces[name];
                let mut keys: Vec<&String> = props.keys().collect();
                keys.sort();
                for key in keys {
                    let _ = writeln!(out, "    {} = {}", key, props[key]);
                }
            }
        }
        debug!("Described {} objects", snapshot.len());
        out
    }
}

fn uuid_is(id: &str) -> impl Fn(&str, &Properties) -> bool {
    let wanted = uuid::normalize(id);
    move |_: &str, object: &Properties| uuid::normalize(&object.str_or_default(props::UUID)) == wanted
}

async fn bounded<F>(timeout: Duration, method: &str, fut: F) -> BleResult<()>
where
    F: std::future::Future<Output = BleResult<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BleError::CallTimeout {
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
