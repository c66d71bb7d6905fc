//! BlueZ and D-Bus names.

/// Well-known bus name of the BlueZ daemon.
pub const BLUEZ_SERVICE: &str = "org.bluez";

/// Bluetooth base UUID `00000000-0000-1000-8000-00805f9b34fb`.
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

// D-Bus interfaces
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const SERVICE_INTERFACE: &str = "org.bluez.GattService1";
pub const CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
pub const DESCRIPTOR_INTERFACE: &str = "org.bluez.GattDescriptor1";

// Signal names (interface.member)
pub const INTERFACES_ADDED: &str = "org.freedesktop.DBus.ObjectManager.InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "org.freedesktop.DBus.ObjectManager.InterfacesRemoved";
pub const PROPERTIES_CHANGED: &str = "org.freedesktop.DBus.Properties.PropertiesChanged";

/// Property names exposed by BlueZ objects.
pub mod props {
    pub const ADAPTER: &str = "Adapter";
    pub const ADDRESS: &str = "Address";
    pub const ADVERTISING_FLAGS: &str = "AdvertisingFlags";
    pub const ALIAS: &str = "Alias";
    pub const APPEARANCE: &str = "Appearance";
    pub const BLOCKED: &str = "Blocked";
    pub const CHARACTERISTIC: &str = "Characteristic";
    pub const CLASS: &str = "Class";
    pub const CONNECTED: &str = "Connected";
    pub const DEVICE: &str = "Device";
    pub const DISCOVERABLE: &str = "Discoverable";
    pub const DISCOVERABLE_TIMEOUT: &str = "DiscoverableTimeout";
    pub const DISCOVERING: &str = "Discovering";
    pub const FLAGS: &str = "Flags";
    pub const ICON: &str = "Icon";
    pub const INCLUDES: &str = "Includes";
    pub const LEGACY_PAIRING: &str = "LegacyPairing";
    pub const MANUFACTURER_DATA: &str = "ManufacturerData";
    pub const MODALIAS: &str = "Modalias";
    pub const NAME: &str = "Name";
    pub const NOTIFYING: &str = "Notifying";
    pub const PAIRABLE: &str = "Pairable";
    pub const PAIRABLE_TIMEOUT: &str = "PairableTimeout";
    pub const PAIRED: &str = "Paired";
    pub const POWERED: &str = "Powered";
    pub const PRIMARY: &str = "Primary";
    pub const RSSI: &str = "RSSI";
    pub const SERVICE: &str = "Service";
    pub const SERVICE_DATA: &str = "ServiceData";
    pub const SERVICES_RESOLVED: &str = "ServicesResolved";
    pub const TRUSTED: &str = "Trusted";
    pub const TX_POWER: &str = "TxPower";
    pub const UUID: &str = "UUID";
    pub const UUIDS: &str = "UUIDs";
    pub const VALUE: &str = "Value";
}
