//! BlueZ object-manager facade for the BLE adapter.
//!
//! This crate wraps the host BLE stack exposed over D-Bus:
//! a snapshot cache of managed objects with typed accessors, the signal
//! classifier and the discovery engine.

pub mod bus;
pub mod cache;
pub mod constants;
pub mod dbus;
pub mod discovery;
pub mod error;
pub mod mock;
pub mod objects;
pub mod path;
pub mod signal;
pub mod uuid;
pub mod variant;

pub use bus::{BluezBus, CallReply, MatchRule, MethodCall, RawSignal, SignalArg};
pub use cache::{ObjectCache, DEFAULT_CALL_TIMEOUT};
pub use dbus::SystemBus;
pub use discovery::{Discovery, DiscoveryOptions, DiscoveryStream};
pub use error::{BleError, BleResult};
pub use objects::{
    Adapter, Caller, Device, GattCharacteristic, GattDescriptor, GattService, NO_READING,
};
pub use path::address_from_path;
pub use signal::{classify, BleEvent, BleInterface};
pub use variant::{InterfaceMap, ManagedObjects, Properties, PropertyExt, Variant};
