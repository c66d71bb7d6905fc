//! Device snapshot publisher.

use std::sync::Arc;

use bleadapter_bluez::constants::DEVICE_INTERFACE;
use bleadapter_bluez::{Device, ObjectCache, NO_READING};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::config::WindowConfig;
use crate::error::{AdapterError, AdapterResult};

/// One manufacturer or service data entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry<K> {
    pub id: K,
    pub data: Vec<u8>,
}

/// The JSON document published for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub path: String,
    pub address: String,
    pub alias: String,
    pub uuids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    pub interface: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<i16>,
    pub manufacturer: Vec<DataEntry<u16>>,
    pub service_data: Vec<DataEntry<String>>,
    pub services_resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertising_flags: Option<Vec<u8>>,
    pub paired: bool,
    pub connected: bool,
    pub trusted: bool,
    pub blocked: bool,
    pub adapter: String,
    pub legacy_pairing: bool,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn reading(value: i16) -> Option<i16> {
    (value != NO_READING).then_some(value)
}

impl From<&Device> for DeviceReport {
    fn from(device: &Device) -> Self {
        Self {
            path: device.path().to_string(),
            address: device.address().to_string(),
            alias: device.alias(),
            uuids: device.uuids(),
            rssi: reading(device.rssi()),
            interface: DEVICE_INTERFACE.to_string(),
            name: device.name(),
            icon: non_empty(device.icon()),
            class: Some(device.class()).filter(|c| *c != 0),
            appearance: Some(device.appearance()).filter(|a| *a != 0),
            modalias: non_empty(device.modalias()),
            tx_power: reading(device.tx_power()),
            manufacturer: device
                .manufacturer_data()
                .into_iter()
                .map(|(id, data)| DataEntry { id, data })
                .collect(),
            service_data: device
                .service_data()
                .into_iter()
                .map(|(id, data)| DataEntry { id, data })
                .collect(),
            services_resolved: device.services_resolved(),
            advertising_flags: Some(device.advertising_flags()).filter(|f| !f.is_empty()),
            paired: device.paired(),
            connected: device.connected(),
            trusted: device.trusted(),
            blocked: device.blocked(),
            adapter: device.adapter(),
            legacy_pairing: device.legacy_pairing(),
        }
    }
}

/// Publishes device snapshots upstream.
pub struct DevicePublisher {
    cache: Arc<ObjectCache>,
    broker: Arc<dyn Broker>,
}

impl DevicePublisher {
    pub fn new(cache: Arc<ObjectCache>, broker: Arc<dyn Broker>) -> Self {
        Self { cache, broker }
    }

    /// Refresh the cache and publish the device with `address`.
    ///
    /// Returns `Ok(false)` when the device does not advertise any of the
    /// window's filter UUIDs.
    pub async fn publish_device(&self, address: &str, config: &WindowConfig) -> AdapterResult<bool> {
        self.cache.update().await?;
        let device = self.cache.device_by_address(address)?;

        if !device.matches_filters(&config.filters) {
            debug!("Device {} does not match filter UUIDs, not publishing", address);
            return Ok(false);
        }

        let report = DeviceReport::from(&device);
        let payload = serde_json::to_vec(&report)
            .map_err(|e| AdapterError::config(format!("Unable to encode device {}: {}", address, e)))?;

        let topic = config.device_topic();
        debug!("Publishing device {} to {}", address, topic);
        self.broker
            .publish(&topic, payload, config.qos)
            .await
            .map_err(|e| {
                warn!("Error publishing device {}: {}", address, e);
                e
            })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleadapter_bluez::mock::MockBus;
    use bleadapter_bluez::Variant;
    use std::collections::BTreeMap;

    const SENSOR: &str = "A0:E6:F8:8A:4D:5C";

    #[tokio::test]
    async fn test_report_omits_empty_fields() {
        let bus = Arc::new(MockBus::with_adapter());
        bus.add_device(SENSOR, &[]);
        let cache = ObjectCache::open(bus.clone()).await.unwrap();
        let device = cache.device_by_address(SENSOR).unwrap();

        let json = serde_json::to_value(DeviceReport::from(&device)).unwrap();
        let object = json.as_object().unwrap();
        for key in ["rssi", "icon", "class", "appearance", "modalias", "txPower", "advertisingFlags"] {
            assert!(!object.contains_key(key), "{} should be omitted", key);
        }
        for key in ["path", "address", "alias", "uuids", "interface", "name", "manufacturer",
            "serviceData", "servicesResolved", "paired", "connected", "trusted", "blocked",
            "adapter", "legacyPairing"]
        {
            assert!(object.contains_key(key), "{} should be present", key);
        }
        assert_eq!(json["interface"], "org.bluez.Device1");
        assert_eq!(json["adapter"], "/org/bluez/hci0");
    }

    #[tokio::test]
    async fn test_data_renders_as_numeric_arrays() {
        let bus = Arc::new(MockBus::with_adapter());
        let path = bus.add_device(SENSOR, &[]);
        let mut manufacturer = BTreeMap::new();
        manufacturer.insert(0x5c60, vec![0x4d, 0x8a]);
        manufacturer.insert(0x004c, vec![0x02]);
        bus.set_property(&path, DEVICE_INTERFACE, "ManufacturerData", Variant::U16Bytes(manufacturer));
        let mut service = BTreeMap::new();
        service.insert("0000180f-0000-1000-8000-00805f9b34fb".to_string(), vec![100]);
        bus.set_property(&path, DEVICE_INTERFACE, "ServiceData", Variant::StrBytes(service));
        let cache = ObjectCache::open(bus.clone()).await.unwrap();
        let device = cache.device_by_address(SENSOR).unwrap();

        let json = serde_json::to_value(DeviceReport::from(&device)).unwrap();
        assert_eq!(
            json["manufacturer"],
            serde_json::json!([{"id": 76, "data": [2]}, {"id": 23648, "data": [77, 138]}])
        );
        assert_eq!(json["serviceData"][0]["data"], serde_json::json!([100]));

        let decoded: DeviceReport = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.address, SENSOR);
        assert_eq!(decoded.manufacturer[1].data, vec![0x4d, 0x8a]);
    }
}
