//! Object cache tests against the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use bleadapter_bluez::mock::{device_path, MockBus, ADAPTER_PATH};
use bleadapter_bluez::{BleError, MatchRule, MethodCall, ObjectCache, Variant, NO_READING};

const SENSOR: &str = "A0:E6:F8:8A:4D:5C";
const SENSOR_UUID: &str = "32f9169f-4feb-4883-ade6-1f0127018db3";
const BATTERY: &str = "0000180f-0000-1000-8000-00805f9b34fb";

async fn open(bus: &Arc<MockBus>) -> ObjectCache {
    ObjectCache::open(bus.clone()).await.unwrap()
}

#[tokio::test]
async fn test_adapter_lookup() {
    let bus = Arc::new(MockBus::with_adapter());
    let cache = open(&bus).await;

    let adapter = cache.adapter().unwrap();
    assert_eq!(adapter.path(), ADAPTER_PATH);
    assert!(adapter.powered());
    assert!(!adapter.discovering());
    assert_eq!(adapter.pairable_timeout(), 0);
}

#[tokio::test]
async fn test_missing_adapter_is_not_found() {
    let bus = Arc::new(MockBus::new());
    let cache = open(&bus).await;

    assert!(matches!(cache.adapter(), Err(BleError::NotFound { .. })));
}

#[tokio::test]
async fn test_device_by_address_is_case_insensitive() {
    let bus = Arc::new(MockBus::with_adapter());
    bus.add_device(SENSOR, &[SENSOR_UUID]);
    let cache = open(&bus).await;

    let device = cache.device_by_address("a0:e6:f8:8a:4d:5c").unwrap();
    assert_eq!(device.address(), SENSOR);
    assert_eq!(device.path(), device_path(SENSOR));
    assert_eq!(device.rssi(), NO_READING);
    assert_eq!(device.tx_power(), NO_READING);
    assert_eq!(device.icon(), "");
    assert!(device.manufacturer_data().is_empty());
}

#[tokio::test]
async fn test_update_replaces_snapshot() {
    let bus = Arc::new(MockBus::with_adapter());
    let cache = open(&bus).await;
    assert!(cache.device_by_address(SENSOR).is_err());

    bus.add_device(SENSOR, &[SENSOR_UUID]);
    assert!(cache.device_by_address(SENSOR).is_err());

    cache.update().await.unwrap();
    assert!(cache.device_by_address(SENSOR).is_ok());
}

#[tokio::test]
async fn test_failed_update_keeps_previous_snapshot() {
    let bus = Arc::new(MockBus::with_adapter());
    bus.add_device(SENSOR, &[SENSOR_UUID]);
    let cache = open(&bus).await;

    bus.fail_updates(true);
    assert!(cache.update().await.is_err());
    assert!(cache.device_by_address(SENSOR).is_ok());
}

#[tokio::test]
async fn test_devices_require_all_uuids() {
    let bus = Arc::new(MockBus::with_adapter());
    bus.add_device(SENSOR, &[SENSOR_UUID, BATTERY]);
    bus.add_device("00:11:22:33:44:55", &[BATTERY]);
    let cache = open(&bus).await;

    assert_eq!(cache.devices(&[]).unwrap().len(), 2);
    assert_eq!(cache.devices(&["180F".to_string()]).unwrap().len(), 2);

    let both = vec![SENSOR_UUID.to_uppercase(), BATTERY.to_string()];
    let device = cache.device(&both).unwrap();
    assert_eq!(device.address(), SENSOR);

    assert!(matches!(
        cache.device(&["180F".to_string()]),
        Err(BleError::Ambiguous { count: 2, .. })
    ));
    assert!(matches!(
        cache.devices(&["0000ffff-0000-1000-8000-00805f9b34fb".to_string()]),
        Err(BleError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_characteristic_read_and_write() {
    let bus = Arc::new(MockBus::with_adapter());
    let dev = bus.add_device(SENSOR, &[SENSOR_UUID]);
    let char_path = bus.add_characteristic(&dev, SENSOR_UUID, &[0x2a, 0x01]);
    let cache = open(&bus).await;

    let characteristic = cache.characteristic(&SENSOR_UUID.to_uppercase()).unwrap();
    assert_eq!(characteristic.path(), char_path);
    assert_eq!(characteristic.flags(), vec!["read", "write"]);

    assert_eq!(cache.read_characteristic(SENSOR_UUID).await.unwrap(), vec![0x2a, 0x01]);
    cache.write_characteristic(SENSOR_UUID, &[9, 8, 7]).await.unwrap();
    assert_eq!(
        bus.calls().last(),
        Some(&(char_path.clone(), MethodCall::WriteValue { value: vec![9, 8, 7] }))
    );
    assert_eq!(cache.read_characteristic(SENSOR_UUID).await.unwrap(), vec![9, 8, 7]);

    let service = cache.service(SENSOR_UUID).unwrap();
    assert_eq!(service.device(), dev);
    assert!(service.primary());
}

#[tokio::test]
async fn test_device_characteristic_is_scoped_to_device() {
    let bus = Arc::new(MockBus::with_adapter());
    let first = bus.add_device(SENSOR, &[SENSOR_UUID]);
    let second = bus.add_device("00:11:22:33:44:55", &[SENSOR_UUID]);
    bus.add_characteristic(&first, SENSOR_UUID, &[1]);
    let second_char = bus.add_characteristic(&second, SENSOR_UUID, &[2]);
    let cache = open(&bus).await;

    assert!(matches!(
        cache.characteristic(SENSOR_UUID),
        Err(BleError::Ambiguous { .. })
    ));

    let device = cache.device_by_address("00:11:22:33:44:55").unwrap();
    let characteristic = cache.device_characteristic(&device, SENSOR_UUID).unwrap();
    assert_eq!(characteristic.path(), second_char);
    assert_eq!(characteristic.read_value().await.unwrap(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_call_times_out() {
    let bus = Arc::new(MockBus::with_adapter());
    bus.add_device(SENSOR, &[SENSOR_UUID]);
    bus.hang_method("Connect");
    let cache = ObjectCache::open_with_timeout(bus.clone(), Duration::from_secs(5))
        .await
        .unwrap();

    let device = cache.device_by_address(SENSOR).unwrap();
    let err = device.connect().await.unwrap_err();
    assert_eq!(
        err,
        BleError::CallTimeout {
            method: "org.bluez.Device1.Connect".to_string(),
            timeout_ms: 5000,
        }
    );
}

#[tokio::test]
async fn test_remove_device_forgets_object() {
    let bus = Arc::new(MockBus::with_adapter());
    let dev = bus.add_device(SENSOR, &[SENSOR_UUID]);
    bus.add_characteristic(&dev, SENSOR_UUID, &[]);
    let cache = open(&bus).await;

    let adapter = cache.adapter().unwrap();
    let device = cache.device_by_address(SENSOR).unwrap();
    adapter.remove_device(&device).await.unwrap();

    cache.update().await.unwrap();
    assert!(cache.device_by_address(SENSOR).is_err());
    assert!(cache.characteristic(SENSOR_UUID).is_err());
}

#[tokio::test]
async fn test_match_rules_pass_through() {
    let bus = Arc::new(MockBus::with_adapter());
    let cache = open(&bus).await;

    cache.add_match(MatchRule::InterfacesAdded).await.unwrap();
    assert_eq!(bus.installed_matches(), vec![MatchRule::InterfacesAdded]);
    cache.remove_match(MatchRule::InterfacesAdded).await.unwrap();
    assert!(bus.installed_matches().is_empty());
}

#[tokio::test]
async fn test_describe_lists_objects() {
    let bus = Arc::new(MockBus::with_adapter());
    let dev = bus.add_device(SENSOR, &[SENSOR_UUID]);
    bus.set_property(&dev, "org.bluez.Device1", "RSSI", Variant::I16(-59));
    let cache = open(&bus).await;

    let dump = cache.describe();
    assert!(dump.contains(ADAPTER_PATH));
    assert!(dump.contains("  org.bluez.Device1"));
    assert!(dump.contains("    RSSI = -59"));
}

#[tokio::test]
async fn test_close_releases_bus() {
    let bus = Arc::new(MockBus::with_adapter());
    let cache = open(&bus).await;
    cache.close().await;
    assert!(bus.is_closed());
}
