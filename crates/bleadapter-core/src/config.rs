//! Adapter configuration.
//!
//! [`AdapterDefaults`] holds what the process was started with. Before every
//! scan window the supervisor merges the remote adapter-config row and the
//! enabled filter UUIDs over those defaults into a [`WindowConfig`], which is
//! then passed by value into the window.

use std::time::Duration;

use bleadapter_bluez::uuid;
use bleadapter_bluez::DiscoveryOptions;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AdapterError, AdapterResult};

pub const DEFAULT_PUBLISH_TOPIC: &str = "bleadapter/bledevice";
pub const DEFAULT_SUBSCRIBE_TOPIC: &str = "bleadapter/bledevice/command";
pub const DEFAULT_SCAN_SECONDS: u64 = 360;
pub const DEFAULT_PAUSE_SECONDS: u64 = 60;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    #[default]
    ExactlyOnce = 2,
}

impl TryFrom<u8> for Qos {
    type Error = AdapterError;

    fn try_from(level: u8) -> AdapterResult<Self> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(AdapterError::config(format!(
                "QoS must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> u8 {
        qos as u8
    }
}

#[cfg(feature = "mqtt")]
impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Join the device name and a topic suffix.
///
/// Older adapter-config rows carry a leading `/` on the publish topic; it is
/// dropped so the result never contains an empty level.
pub fn topic(device_name: &str, suffix: &str) -> String {
    let suffix = suffix.trim_start_matches('/');
    if suffix.is_empty() {
        device_name.to_string()
    } else {
        format!("{}/{}", device_name, suffix)
    }
}

/// Canonicalize filter UUIDs, dropping the ones that do not parse.
pub fn canonical_filters<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut filters = Vec::with_capacity(raw.len());
    for value in raw {
        match uuid::canonical(value.as_ref()) {
            Ok(canonical) => {
                if !filters.contains(&canonical) {
                    filters.push(canonical);
                }
            }
            Err(e) => warn!("Ignoring filter UUID: {}", e),
        }
    }
    filters
}

/// Process-start configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterDefaults {
    pub device_name: String,
    pub publish_topic: String,
    pub subscribe_topic: String,
    pub scan_interval: Duration,
    pub pause_interval: Duration,
    pub handle_removed: bool,
    pub handle_changed: bool,
    pub qos: Qos,
}

impl AdapterDefaults {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            publish_topic: DEFAULT_PUBLISH_TOPIC.to_string(),
            subscribe_topic: DEFAULT_SUBSCRIBE_TOPIC.to_string(),
            scan_interval: Duration::from_secs(DEFAULT_SCAN_SECONDS),
            pause_interval: Duration::from_secs(DEFAULT_PAUSE_SECONDS),
            handle_removed: false,
            handle_changed: false,
            qos: Qos::default(),
        }
    }

    pub fn with_publish_topic(mut self, topic: impl Into<String>) -> Self {
        self.publish_topic = topic.into();
        self
    }

    pub fn with_subscribe_topic(mut self, topic: impl Into<String>) -> Self {
        self.subscribe_topic = topic.into();
        self
    }

    pub fn with_intervals(mut self, scan: Duration, pause: Duration) -> Self {
        self.scan_interval = scan;
        self.pause_interval = pause;
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Topic the command listener subscribes to.
    pub fn command_topic(&self) -> String {
        topic(&self.device_name, &self.subscribe_topic)
    }

    /// Topic command responses are published to.
    pub fn response_topic(&self) -> String {
        format!("{}/response", self.command_topic())
    }
}

/// One row of the adapter-config collection. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteAdapterConfig {
    pub publish_topic: Option<String>,
    pub discovery_scan_seconds: Option<f64>,
    pub discovery_pause_seconds: Option<f64>,
    pub handle_removed: Option<bool>,
    pub handle_changed: Option<bool>,
}

/// One row of the filter collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterRow {
    pub ble_uuid: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl FilterRow {
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }
}

/// Configuration of a single scan window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub device_name: String,
    pub publish_topic: String,
    /// Canonical filter UUIDs; empty disables filtering.
    pub filters: Vec<String>,
    /// Zero means the window runs until stopped externally.
    pub scan_interval: Duration,
    pub pause_interval: Duration,
    pub handle_removed: bool,
    pub handle_changed: bool,
    pub qos: Qos,
}

impl WindowConfig {
    pub fn from_defaults(defaults: &AdapterDefaults, filters: Vec<String>) -> Self {
        Self::merge(defaults, None, filters)
    }

    /// Apply the remote row over `defaults`. Missing, negative or
    /// non-finite fields keep the default.
    pub fn merge(
        defaults: &AdapterDefaults,
        remote: Option<&RemoteAdapterConfig>,
        filters: Vec<String>,
    ) -> Self {
        let mut config = Self {
            device_name: defaults.device_name.clone(),
            publish_topic: defaults.publish_topic.clone(),
            filters,
            scan_interval: defaults.scan_interval,
            pause_interval: defaults.pause_interval,
            handle_removed: defaults.handle_removed,
            handle_changed: defaults.handle_changed,
            qos: defaults.qos,
        };

        let Some(remote) = remote else {
            return config;
        };
        if let Some(publish_topic) = remote.publish_topic.as_deref() {
            if publish_topic.trim_matches('/').is_empty() {
                warn!("Ignoring empty publish_topic in adapter config");
            } else {
                config.publish_topic = publish_topic.to_string();
            }
        }
        if let Some(scan) = interval("discovery_scan_seconds", remote.discovery_scan_seconds) {
            config.scan_interval = scan;
        }
        if let Some(pause) = interval("discovery_pause_seconds", remote.discovery_pause_seconds) {
            config.pause_interval = pause;
        }
        if let Some(handle_removed) = remote.handle_removed {
            config.handle_removed = handle_removed;
        }
        if let Some(handle_changed) = remote.handle_changed {
            config.handle_changed = handle_changed;
        }
        config
    }

    /// Topic device snapshots are published to.
    pub fn device_topic(&self) -> String {
        topic(&self.device_name, &self.publish_topic)
    }

    /// Whether the window ends on its own timer.
    pub fn scan_is_bounded(&self) -> bool {
        !self.scan_interval.is_zero()
    }

    /// Whether the supervisor sleeps between windows.
    pub fn should_pause(&self) -> bool {
        !self.scan_interval.is_zero() && !self.pause_interval.is_zero()
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            filters: self.filters.clone(),
            handle_removed: self.handle_removed,
            handle_changed: self.handle_changed,
        }
    }
}

fn interval(field: &str, seconds: Option<f64>) -> Option<Duration> {
    let seconds = seconds?;
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) => Some(duration),
        Err(_) => {
            warn!("Ignoring {} = {} in adapter config", field, seconds);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENSOR_UUID: &str = "32f9169f-4feb-4883-ade6-1f0127018db3";

    #[test]
    fn test_topic_join() {
        assert_eq!(topic("edge1", "bleadapter/bledevice"), "edge1/bleadapter/bledevice");
        assert_eq!(topic("edge1", "/bleadapter/bledevice"), "edge1/bleadapter/bledevice");
        assert_eq!(topic("edge1", ""), "edge1");
    }

    #[test]
    fn test_command_topics() {
        let defaults = AdapterDefaults::new("edge1");
        assert_eq!(defaults.command_topic(), "edge1/bleadapter/bledevice/command");
        assert_eq!(
            defaults.response_topic(),
            "edge1/bleadapter/bledevice/command/response"
        );
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(Qos::try_from(1).unwrap(), Qos::AtLeastOnce);
        assert!(Qos::try_from(3).is_err());
        assert_eq!(u8::from(Qos::ExactlyOnce), 2);
        assert_eq!(Qos::default(), Qos::ExactlyOnce);
    }

    #[test]
    fn test_merge_without_remote_keeps_defaults() {
        let defaults = AdapterDefaults::new("edge1");
        let config = WindowConfig::merge(&defaults, None, vec![]);
        assert_eq!(config.scan_interval, Duration::from_secs(360));
        assert_eq!(config.pause_interval, Duration::from_secs(60));
        assert_eq!(config.device_topic(), "edge1/bleadapter/bledevice");
        assert!(!config.handle_removed);
    }

    #[test]
    fn test_merge_applies_remote_fields() {
        let defaults = AdapterDefaults::new("edge1");
        let remote: RemoteAdapterConfig = serde_json::from_value(serde_json::json!({
            "publish_topic": "/sensors/ble",
            "discovery_scan_seconds": 30.5,
            "discovery_pause_seconds": null,
            "handle_removed": true
        }))
        .unwrap();

        let config = WindowConfig::merge(&defaults, Some(&remote), vec![SENSOR_UUID.into()]);
        assert_eq!(config.device_topic(), "edge1/sensors/ble");
        assert_eq!(config.scan_interval, Duration::from_millis(30_500));
        assert_eq!(config.pause_interval, Duration::from_secs(60));
        assert!(config.handle_removed);
        assert!(!config.handle_changed);
        assert_eq!(config.discovery_options().filters, vec![SENSOR_UUID.to_string()]);
    }

    #[test]
    fn test_merge_ignores_bad_intervals() {
        let defaults = AdapterDefaults::new("edge1");
        let remote = RemoteAdapterConfig {
            discovery_scan_seconds: Some(-5.0),
            discovery_pause_seconds: Some(f64::NAN),
            ..Default::default()
        };
        let config = WindowConfig::merge(&defaults, Some(&remote), vec![]);
        assert_eq!(config.scan_interval, defaults.scan_interval);
        assert_eq!(config.pause_interval, defaults.pause_interval);
    }

    #[test]
    fn test_zero_intervals() {
        let defaults = AdapterDefaults::new("edge1")
            .with_intervals(Duration::ZERO, Duration::from_secs(10));
        let config = WindowConfig::from_defaults(&defaults, vec![]);
        assert!(!config.scan_is_bounded());
        assert!(!config.should_pause());

        let defaults = AdapterDefaults::new("edge1")
            .with_intervals(Duration::from_secs(10), Duration::ZERO);
        let config = WindowConfig::from_defaults(&defaults, vec![]);
        assert!(config.scan_is_bounded());
        assert!(!config.should_pause());
    }

    #[test]
    fn test_canonical_filters() {
        let filters = canonical_filters(&["180F", "0000180F-0000-1000-8000-00805F9B34FB", "nope"]);
        assert_eq!(filters, vec!["0000180f-0000-1000-8000-00805f9b34fb".to_string()]);
    }
}
