//! The host bus seam.
//!
//! [`BluezBus`] is the minimal surface the adapter needs from the system
//! bus: the managed-object snapshot, method calls on BlueZ objects, match
//! rule management and one shared stream of raw signals. The production
//! implementation lives in [`crate::dbus`]; [`crate::mock`] provides an
//! in-memory bus for tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::constants::{
    ADAPTER_INTERFACE, CHARACTERISTIC_INTERFACE, DEVICE_INTERFACE, INTERFACES_ADDED,
    INTERFACES_REMOVED, OBJECT_MANAGER_INTERFACE, PROPERTIES_CHANGED, PROPERTIES_INTERFACE,
};
use crate::error::BleResult;
use crate::variant::{InterfaceMap, ManagedObjects, Properties};

/// A method call against a BlueZ object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodCall {
    StartDiscovery,
    StopDiscovery,
    /// Restrict discovery to LE devices advertising one of `uuids`.
    SetDiscoveryFilter { uuids: Vec<String> },
    /// Forget the device at `device` (object path).
    RemoveDevice { device: String },
    Connect,
    Disconnect,
    Pair,
    CancelPairing,
    ReadValue,
    WriteValue { value: Vec<u8> },
}

impl MethodCall {
    /// Interface that owns the method.
    pub fn interface(&self) -> &'static str {
        match self {
            Self::StartDiscovery
            | Self::StopDiscovery
            | Self::SetDiscoveryFilter { .. }
            | Self::RemoveDevice { .. } => ADAPTER_INTERFACE,
            Self::Connect | Self::Disconnect | Self::Pair | Self::CancelPairing => DEVICE_INTERFACE,
            Self::ReadValue | Self::WriteValue { .. } => CHARACTERISTIC_INTERFACE,
        }
    }

    /// D-Bus member name.
    pub fn member(&self) -> &'static str {
        match self {
            Self::StartDiscovery => "StartDiscovery",
            Self::StopDiscovery => "StopDiscovery",
            Self::SetDiscoveryFilter { .. } => "SetDiscoveryFilter",
            Self::RemoveDevice { .. } => "RemoveDevice",
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::Pair => "Pair",
            Self::CancelPairing => "CancelPairing",
            Self::ReadValue => "ReadValue",
            Self::WriteValue { .. } => "WriteValue",
        }
    }

    /// Fully qualified method name, e.g. `org.bluez.Device1.Connect`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.interface(), self.member())
    }
}

/// Reply of a [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    Unit,
    Bytes(Vec<u8>),
}

/// One decoded argument of a signal body.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalArg {
    Str(String),
    ObjectPath(String),
    StrList(Vec<String>),
    Properties(Properties),
    Interfaces(InterfaceMap),
}

/// A signal as received from the host bus, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    /// Fully qualified signal name (`interface.member`)
    pub name: String,
    /// Object path that emitted the signal
    pub path: String,
    /// Decoded body arguments
    pub body: Vec<SignalArg>,
}

impl RawSignal {
    /// `ObjectManager.InterfacesAdded(o path, a{sa{sv}} interfaces)`
    pub fn interfaces_added(object_path: impl Into<String>, interfaces: InterfaceMap) -> Self {
        Self {
            name: INTERFACES_ADDED.to_string(),
            path: "/".to_string(),
            body: vec![
                SignalArg::ObjectPath(object_path.into()),
                SignalArg::Interfaces(interfaces),
            ],
        }
    }

    /// `ObjectManager.InterfacesRemoved(o path, as interfaces)`
    pub fn interfaces_removed(object_path: impl Into<String>, interfaces: Vec<String>) -> Self {
        Self {
            name: INTERFACES_REMOVED.to_string(),
            path: "/".to_string(),
            body: vec![
                SignalArg::ObjectPath(object_path.into()),
                SignalArg::StrList(interfaces),
            ],
        }
    }

    /// `Properties.PropertiesChanged(s interface, a{sv} changed, as invalidated)`
    pub fn properties_changed(
        object_path: impl Into<String>,
        interface: impl Into<String>,
        changed: Properties,
        invalidated: Vec<String>,
    ) -> Self {
        Self {
            name: PROPERTIES_CHANGED.to_string(),
            path: object_path.into(),
            body: vec![
                SignalArg::Str(interface.into()),
                SignalArg::Properties(changed),
                SignalArg::StrList(invalidated),
            ],
        }
    }
}

/// The three signal match rules used during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchRule {
    InterfacesAdded,
    InterfacesRemoved,
    PropertiesChanged,
}

impl MatchRule {
    /// Rule string passed to `org.freedesktop.DBus.AddMatch`.
    pub fn rule(&self) -> String {
        let (interface, member) = match self {
            Self::InterfacesAdded => (OBJECT_MANAGER_INTERFACE, "InterfacesAdded"),
            Self::InterfacesRemoved => (OBJECT_MANAGER_INTERFACE, "InterfacesRemoved"),
            Self::PropertiesChanged => (PROPERTIES_INTERFACE, "PropertiesChanged"),
        };
        format!("type='signal',interface='{}',member='{}'", interface, member)
    }

    /// Fully qualified name of the signal the rule selects.
    pub fn signal_name(&self) -> &'static str {
        match self {
            Self::InterfacesAdded => INTERFACES_ADDED,
            Self::InterfacesRemoved => INTERFACES_REMOVED,
            Self::PropertiesChanged => PROPERTIES_CHANGED,
        }
    }

    pub fn matches(&self, signal: &RawSignal) -> bool {
        signal.name == self.signal_name()
    }

    /// Rules for a discovery window: added is always installed, removed and
    /// changed only when the window handles them.
    pub fn for_window(handle_removed: bool, handle_changed: bool) -> Vec<MatchRule> {
        let mut rules = vec![Self::InterfacesAdded];
        if handle_removed {
            rules.push(Self::InterfacesRemoved);
        }
        if handle_changed {
            rules.push(Self::PropertiesChanged);
        }
        rules
    }
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rule())
    }
}

/// Connection to the host bus.
#[async_trait]
pub trait BluezBus: Send + Sync {
    /// `org.freedesktop.DBus.ObjectManager.GetManagedObjects` on BlueZ.
    async fn managed_objects(&self) -> BleResult<ManagedObjects>;

    /// Invoke a method on the object at `path`. Unbounded; callers apply deadlines.
    async fn call(&self, path: &str, call: MethodCall) -> BleResult<CallReply>;

    async fn add_match(&self, rule: MatchRule) -> BleResult<()>;

    async fn remove_match(&self, rule: MatchRule) -> BleResult<()>;

    /// Subscribe to the shared stream of raw signals.
    fn signals(&self) -> broadcast::Receiver<RawSignal>;

    /// Release the connection.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_for_window() {
        assert_eq!(MatchRule::for_window(false, false), vec![MatchRule::InterfacesAdded]);
        assert_eq!(
            MatchRule::for_window(true, true),
            vec![
                MatchRule::InterfacesAdded,
                MatchRule::InterfacesRemoved,
                MatchRule::PropertiesChanged
            ]
        );
    }

    #[test]
    fn test_rule_strings() {
        assert_eq!(
            MatchRule::InterfacesAdded.rule(),
            "type='signal',interface='org.freedesktop.DBus.ObjectManager',member='InterfacesAdded'"
        );
        assert_eq!(
            MatchRule::PropertiesChanged.rule(),
            "type='signal',interface='org.freedesktop.DBus.Properties',member='PropertiesChanged'"
        );
    }

    #[test]
    fn test_rule_matches_signal_name() {
        let signal = RawSignal::interfaces_removed("/org/bluez/hci0/dev_00_11", vec![]);
        assert!(MatchRule::InterfacesRemoved.matches(&signal));
        assert!(!MatchRule::InterfacesAdded.matches(&signal));
    }

    #[test]
    fn test_method_names() {
        assert_eq!(MethodCall::Connect.qualified_name(), "org.bluez.Device1.Connect");
        assert_eq!(
            MethodCall::SetDiscoveryFilter { uuids: vec![] }.qualified_name(),
            "org.bluez.Adapter1.SetDiscoveryFilter"
        );
    }
}
