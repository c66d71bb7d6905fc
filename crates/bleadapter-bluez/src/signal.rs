//! Signal classifier.
//!
//! Turns a [`RawSignal`] into typed [`BleEvent`]s so downstream handlers
//! never look at untyped signal bodies.

use tracing::debug;

use crate::bus::{RawSignal, SignalArg};
use crate::constants::{
    props, ADAPTER_INTERFACE, CHARACTERISTIC_INTERFACE, DESCRIPTOR_INTERFACE, DEVICE_INTERFACE,
    INTERFACES_ADDED, INTERFACES_REMOVED, PROPERTIES_CHANGED, SERVICE_INTERFACE,
};
use crate::error::{BleError, BleResult};
use crate::path::address_from_path;
use crate::variant::{InterfaceMap, Properties, PropertyExt};

/// The five BlueZ interfaces the adapter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleInterface {
    Adapter,
    Device,
    Service,
    Characteristic,
    Descriptor,
}

impl BleInterface {
    /// Classification order for multi-interface signals.
    pub const ALL: [BleInterface; 5] = [
        Self::Adapter,
        Self::Device,
        Self::Service,
        Self::Characteristic,
        Self::Descriptor,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            ADAPTER_INTERFACE => Some(Self::Adapter),
            DEVICE_INTERFACE => Some(Self::Device),
            SERVICE_INTERFACE => Some(Self::Service),
            CHARACTERISTIC_INTERFACE => Some(Self::Characteristic),
            DESCRIPTOR_INTERFACE => Some(Self::Descriptor),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Adapter => ADAPTER_INTERFACE,
            Self::Device => DEVICE_INTERFACE,
            Self::Service => SERVICE_INTERFACE,
            Self::Characteristic => CHARACTERISTIC_INTERFACE,
            Self::Descriptor => DESCRIPTOR_INTERFACE,
        }
    }
}

impl std::fmt::Display for BleInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified host signal.
#[derive(Debug, Clone, PartialEq)]
pub enum BleEvent {
    AdapterAdded {
        path: String,
        properties: Properties,
    },
    DeviceAdded {
        path: String,
        address: String,
        properties: Properties,
    },
    ServiceAdded {
        path: String,
        properties: Properties,
    },
    CharacteristicAdded {
        path: String,
        properties: Properties,
    },
    DescriptorAdded {
        path: String,
        properties: Properties,
    },
    /// `org.bluez.Device1` was among the removed interfaces.
    DeviceRemoved {
        path: String,
        address: String,
    },
    /// Interfaces other than the device were removed.
    ObjectRemoved {
        path: String,
        interfaces: Vec<String>,
    },
    AdapterPropertiesChanged {
        path: String,
        changed: Properties,
        invalidated: Vec<String>,
    },
    DevicePropertiesChanged {
        path: String,
        address: String,
        changed: Properties,
        invalidated: Vec<String>,
    },
    GattPropertiesChanged {
        path: String,
        interface: BleInterface,
        changed: Properties,
        invalidated: Vec<String>,
    },
    Unknown {
        name: String,
    },
}

impl BleEvent {
    /// Device address for device-scoped events.
    pub fn device_address(&self) -> Option<&str> {
        match self {
            Self::DeviceAdded { address, .. }
            | Self::DeviceRemoved { address, .. }
            | Self::DevicePropertiesChanged { address, .. } => Some(address),
            _ => None,
        }
    }
}

/// Classify a raw signal.
///
/// `InterfacesAdded` yields one event per BLE interface present on the
/// object. `PropertiesChanged` on a non-BLE interface and removals of only
/// non-BLE interfaces yield no events. Unrecognized signal names yield
/// [`BleEvent::Unknown`].
pub fn classify(signal: &RawSignal) -> BleResult<Vec<BleEvent>> {
    match signal.name.as_str() {
        INTERFACES_ADDED => classify_added(signal),
        INTERFACES_REMOVED => classify_removed(signal),
        PROPERTIES_CHANGED => classify_changed(signal),
        _ => {
            debug!("Unknown signal {} on {}", signal.name, signal.path);
            Ok(vec![BleEvent::Unknown {
                name: signal.name.clone(),
            }])
        }
    }
}

fn malformed(signal: &RawSignal, what: &str) -> BleError {
    BleError::MalformedSignal(format!("{} on {}: {}", signal.name, signal.path, what))
}

fn device_address(signal: &RawSignal, path: &str, props: Option<&Properties>) -> BleResult<String> {
    props
        .and_then(|p| p.opt_str(props::ADDRESS))
        .or_else(|| address_from_path(path))
        .ok_or_else(|| malformed(signal, "device address not found"))
}

fn classify_added(signal: &RawSignal) -> BleResult<Vec<BleEvent>> {
    let (path, interfaces): (&String, &InterfaceMap) = match signal.body.as_slice() {
        [SignalArg::ObjectPath(path), SignalArg::Interfaces(interfaces), ..] => (path, interfaces),
        _ => return Err(malformed(signal, "expected (o, a{sa{sv}})")),
    };

    let mut events = Vec::new();
    for interface in BleInterface::ALL {
        let Some(properties) = interfaces.get(interface.name()) else {
            continue;
        };
        let path = path.clone();
        let properties = properties.clone();
        events.push(match interface {
            BleInterface::Adapter => BleEvent::AdapterAdded { path, properties },
            BleInterface::Device => BleEvent::DeviceAdded {
                address: device_address(signal, &path, Some(&properties))?,
                path,
                properties,
            },
            BleInterface::Service => BleEvent::ServiceAdded { path, properties },
            BleInterface::Characteristic => BleEvent::CharacteristicAdded { path, properties },
            BleInterface::Descriptor => BleEvent::DescriptorAdded { path, properties },
        });
    }
    Ok(events)
}

fn classify_removed(signal: &RawSignal) -> BleResult<Vec<BleEvent>> {
    let (path, interfaces) = match signal.body.as_slice() {
        [SignalArg::ObjectPath(path), SignalArg::StrList(interfaces), ..] => (path, interfaces),
        _ => return Err(malformed(signal, "expected (o, as)")),
    };

    if interfaces.iter().any(|i| i == DEVICE_INTERFACE) {
        return Ok(vec![BleEvent::DeviceRemoved {
            path: path.clone(),
            address: device_address(signal, path, None)?,
        }]);
    }
    if interfaces.iter().any(|i| BleInterface::from_name(i).is_some()) {
        return Ok(vec![BleEvent::ObjectRemoved {
            path: path.clone(),
            interfaces: interfaces.clone(),
        }]);
    }
    Ok(Vec::new())
}

fn classify_changed(signal: &RawSignal) -> BleResult<Vec<BleEvent>> {
    let (interface, changed) = match signal.body.as_slice() {
        [SignalArg::Str(interface), SignalArg::Properties(changed), ..] => (interface, changed),
        _ => return Err(malformed(signal, "expected (s, a{sv}, as)")),
    };
    let invalidated = match signal.body.get(2) {
        Some(SignalArg::StrList(list)) => list.clone(),
        _ => Vec::new(),
    };

    let Some(kind) = BleInterface::from_name(interface) else {
        return Ok(Vec::new());
    };
    let path = signal.path.clone();
    let changed = changed.clone();

    Ok(vec![match kind {
        BleInterface::Adapter => BleEvent::AdapterPropertiesChanged {
            path,
            changed,
            invalidated,
        },
        BleInterface::Device => BleEvent::DevicePropertiesChanged {
            address: device_address(signal, &path, Some(&changed))?,
            path,
            changed,
            invalidated,
        },
        interface => BleEvent::GattPropertiesChanged {
            path,
            interface,
            changed,
            invalidated,
        },
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::Variant;

    fn device_props(address: &str) -> Properties {
        let mut props = Properties::new();
        props.insert("Address".into(), Variant::from(address));
        props
    }

    #[test]
    fn test_device_added_uses_address_property() {
        let mut interfaces = InterfaceMap::new();
        interfaces.insert(DEVICE_INTERFACE.into(), device_props("A0:E6:F8:8A:4D:5C"));
        let signal = RawSignal::interfaces_added("/org/bluez/hci0/dev_00_00_00_00_00_00", interfaces);

        let events = classify(&signal).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_address(), Some("A0:E6:F8:8A:4D:5C"));
    }

    #[test]
    fn test_added_emits_one_event_per_interface() {
        let mut interfaces = InterfaceMap::new();
        interfaces.insert(DEVICE_INTERFACE.into(), Properties::new());
        interfaces.insert(SERVICE_INTERFACE.into(), Properties::new());
        interfaces.insert("org.freedesktop.DBus.Introspectable".into(), Properties::new());
        let signal = RawSignal::interfaces_added("/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C", interfaces);

        let events = classify(&signal).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BleEvent::DeviceAdded { address, .. } if address == "A0:E6:F8:8A:4D:5C"));
        assert!(matches!(events[1], BleEvent::ServiceAdded { .. }));
    }

    #[test]
    fn test_device_removed_parses_address_from_path() {
        let signal = RawSignal::interfaces_removed(
            "/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C",
            vec![DEVICE_INTERFACE.to_string()],
        );
        let events = classify(&signal).unwrap();
        assert_eq!(
            events,
            vec![BleEvent::DeviceRemoved {
                path: "/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C".into(),
                address: "A0:E6:F8:8A:4D:5C".into(),
            }]
        );
    }

    #[test]
    fn test_properties_changed_on_foreign_interface_is_dropped() {
        let signal = RawSignal::properties_changed(
            "/org/bluez/hci0",
            "org.bluez.Media1",
            Properties::new(),
            vec![],
        );
        assert!(classify(&signal).unwrap().is_empty());
    }

    #[test]
    fn test_device_properties_changed() {
        let mut changed = Properties::new();
        changed.insert("RSSI".into(), Variant::I16(-70));
        let signal = RawSignal::properties_changed(
            "/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C",
            DEVICE_INTERFACE,
            changed,
            vec![],
        );
        let events = classify(&signal).unwrap();
        assert!(matches!(
            &events[0],
            BleEvent::DevicePropertiesChanged { address, .. } if address == "A0:E6:F8:8A:4D:5C"
        ));
    }

    #[test]
    fn test_unknown_and_malformed() {
        let unknown = RawSignal {
            name: "org.bluez.Foo.Bar".into(),
            path: "/".into(),
            body: vec![],
        };
        assert_eq!(
            classify(&unknown).unwrap(),
            vec![BleEvent::Unknown {
                name: "org.bluez.Foo.Bar".into()
            }]
        );

        let malformed = RawSignal {
            name: INTERFACES_ADDED.into(),
            path: "/".into(),
            body: vec![SignalArg::Str("oops".into())],
        };
        assert!(matches!(classify(&malformed), Err(BleError::MalformedSignal(_))));
    }
}
