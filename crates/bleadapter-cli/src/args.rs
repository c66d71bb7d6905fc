//! Command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use bleadapter_core::config::{
    DEFAULT_PAUSE_SECONDS, DEFAULT_PUBLISH_TOPIC, DEFAULT_SCAN_SECONDS, DEFAULT_SUBSCRIBE_TOPIC,
};
use bleadapter_core::platform::DEFAULT_PLATFORM_URL;
use bleadapter_core::{AdapterDefaults, AdapterResult, DeviceCredentials, Qos};
use clap::{Parser, ValueEnum};

/// Exit code for unusable flags.
pub const USAGE_EXIT_CODE: u8 = 1;

/// Verbosity accepted by `--logLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive for the subscriber.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// BLE adapter - bridges BlueZ devices to the platform message broker.
#[derive(Parser, Debug, Clone)]
#[command(name = "ble-adapter")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// System key of the platform system.
    #[arg(long = "systemKey")]
    pub system_key: String,

    /// System secret of the platform system.
    #[arg(long = "systemSecret")]
    pub system_secret: String,

    /// Name of the edge device; prefixes every topic.
    #[arg(long = "deviceName")]
    pub device_name: String,

    /// Active key used to authenticate the device.
    #[arg(long = "password")]
    pub password: String,

    /// Platform REST endpoint.
    #[arg(long = "platformURL", default_value = DEFAULT_PLATFORM_URL)]
    pub platform_url: String,

    /// Message broker address (host:port).
    #[arg(long = "messagingURL", default_value = "localhost:1883")]
    pub messaging_url: String,

    /// Seconds each discovery window lasts (0 scans until disconnected).
    #[arg(long = "scanInterval", default_value_t = DEFAULT_SCAN_SECONDS)]
    pub scan_interval: u64,

    /// Seconds to rest between discovery windows.
    #[arg(long = "pauseInterval", default_value_t = DEFAULT_PAUSE_SECONDS)]
    pub pause_interval: u64,

    /// Minimum level written to the log.
    #[arg(long = "logLevel", value_enum, ignore_case = true, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Topic suffix for device events.
    #[arg(long = "publishTopic", default_value = DEFAULT_PUBLISH_TOPIC)]
    pub publish_topic: String,

    /// Topic suffix for inbound commands.
    #[arg(long = "subscribeTopic", default_value = DEFAULT_SUBSCRIBE_TOPIC)]
    pub subscribe_topic: String,

    /// MQTT QoS for publishes and subscriptions.
    #[arg(long = "qos", default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: u8,

    /// Directory holding the rotating log files.
    #[arg(long = "logDir", default_value = "/var/log")]
    pub log_dir: PathBuf,

    /// Log to stderr instead of the log directory.
    #[arg(long = "logToStderr")]
    pub log_to_stderr: bool,
}

impl Args {
    pub fn credentials(&self) -> DeviceCredentials {
        DeviceCredentials {
            system_key: self.system_key.clone(),
            system_secret: self.system_secret.clone(),
            device_name: self.device_name.clone(),
            active_key: self.password.clone(),
        }
    }

    /// Process-start defaults handed to the coordinator.
    pub fn defaults(&self) -> AdapterResult<AdapterDefaults> {
        Ok(AdapterDefaults::new(self.device_name.clone())
            .with_publish_topic(self.publish_topic.clone())
            .with_subscribe_topic(self.subscribe_topic.clone())
            .with_intervals(
                Duration::from_secs(self.scan_interval),
                Duration::from_secs(self.pause_interval),
            )
            .with_qos(Qos::try_from(self.qos)?))
    }

    /// MQTT client id of this adapter.
    pub fn client_id(&self) -> String {
        format!("bleadapter_{}", self.device_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 9] = [
        "ble-adapter",
        "--systemKey",
        "key",
        "--systemSecret",
        "secret",
        "--deviceName",
        "edge1",
        "--password",
        "active",
    ];

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(REQUIRED).unwrap();
        assert_eq!(args.platform_url, "http://localhost:9000");
        assert_eq!(args.messaging_url, "localhost:1883");
        assert_eq!(args.scan_interval, 360);
        assert_eq!(args.pause_interval, 60);
        assert_eq!(args.log_level, LogLevel::Warn);
        assert_eq!(args.qos, 2);
        assert!(!args.log_to_stderr);
        assert_eq!(args.client_id(), "bleadapter_edge1");

        let defaults = args.defaults().unwrap();
        assert_eq!(defaults.command_topic(), "edge1/bleadapter/bledevice/command");
        assert_eq!(defaults.qos, Qos::ExactlyOnce);
        assert_eq!(defaults.scan_interval, Duration::from_secs(360));
    }

    #[test]
    fn test_overrides() {
        let mut argv = REQUIRED.to_vec();
        argv.extend([
            "--logLevel",
            "DEBUG",
            "--qos",
            "1",
            "--scanInterval",
            "0",
            "--subscribeTopic",
            "/cmd",
        ]);
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.log_level.directive(), "debug");

        let defaults = args.defaults().unwrap();
        assert_eq!(defaults.qos, Qos::AtLeastOnce);
        assert_eq!(defaults.scan_interval, Duration::ZERO);
        assert_eq!(defaults.command_topic(), "edge1/cmd");
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--logLevel", "info"]);
        assert!(Args::try_parse_from(argv).is_err());

        let mut argv = REQUIRED.to_vec();
        argv.extend(["--qos", "3"]);
        assert!(Args::try_parse_from(argv).is_err());

        assert!(Args::try_parse_from(&REQUIRED[..7]).is_err());
    }
}
