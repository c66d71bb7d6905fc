//! Shared fixtures for the coordinator tests.

#![allow(dead_code)]

use std::sync::Arc;

use bleadapter_bluez::mock::MockBus;
use bleadapter_bluez::ObjectCache;
use bleadapter_core::testing::MockBroker;
use bleadapter_core::{AdapterDefaults, Broker, CommandProcessor, DevicePublisher};

pub const DEVICE_NAME: &str = "edge1";
pub const SENSOR: &str = "A0:E6:F8:8A:4D:5C";
pub const SENSOR_PATH: &str = "/org/bluez/hci0/dev_A0_E6_F8_8A_4D_5C";
pub const SENSOR_UUID: &str = "32f9169f-4feb-4883-ade6-1f0127018db3";
pub const OTHER_UUID: &str = "0000ffff-0000-1000-8000-00805f9b34fb";
pub const DEVICE_TOPIC: &str = "edge1/bleadapter/bledevice";
pub const COMMAND_TOPIC: &str = "edge1/bleadapter/bledevice/command";
pub const RESPONSE_TOPIC: &str = "edge1/bleadapter/bledevice/command/response";

pub struct Harness {
    pub bus: Arc<MockBus>,
    pub broker: Arc<MockBroker>,
    pub cache: Arc<ObjectCache>,
    pub defaults: AdapterDefaults,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_defaults(AdapterDefaults::new(DEVICE_NAME)).await
    }

    pub async fn with_defaults(defaults: AdapterDefaults) -> Self {
        let bus = Arc::new(MockBus::with_adapter());
        let cache = Arc::new(ObjectCache::open(bus.clone()).await.unwrap());
        Self {
            bus,
            broker: Arc::new(MockBroker::new()),
            cache,
            defaults,
        }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    pub fn publisher(&self) -> Arc<DevicePublisher> {
        Arc::new(DevicePublisher::new(self.cache.clone(), self.broker()))
    }

    pub fn processor(&self) -> Arc<CommandProcessor> {
        Arc::new(CommandProcessor::new(
            self.cache.clone(),
            self.broker(),
            &self.defaults,
        ))
    }
}
