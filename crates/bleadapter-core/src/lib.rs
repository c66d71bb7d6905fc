//! Discovery and command coordinator for the BLE adapter.
//!
//! Ties the host BLE stack to the upstream broker:
//! - [`supervisor`] drives the scan/pause duty cycle
//! - [`dispatch`] and [`publisher`] turn host signals into device reports
//! - [`command`] executes broker commands as sub-command pipelines
//! - [`lifecycle`] follows the broker connection
//!
//! The broker and the remote configuration are reached through the
//! [`Broker`] and [`ConfigStore`] traits; [`mqtt`] and [`platform`] are the
//! production implementations and [`testing`] holds in-memory ones.

pub mod broker;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
#[cfg(feature = "mqtt")]
pub mod mqtt;
#[cfg(feature = "http")]
pub mod platform;
pub mod publisher;
pub mod store;
pub mod supervisor;
pub mod testing;

pub use broker::{Broker, ConnectionHandler, InboundMessage};
pub use command::{BleCommand, CommandKind, CommandProcessor, SubCommand};
pub use config::{AdapterDefaults, Qos, RemoteAdapterConfig, WindowConfig};
pub use dispatch::{dispatch, DispatchSummary, PublishGate};
pub use error::{AdapterError, AdapterResult, CommandError};
pub use lifecycle::BrokerLifecycle;
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBroker, MqttEventLoop, MqttSettings};
#[cfg(feature = "http")]
pub use platform::{DeviceCredentials, PlatformClient, PlatformConfigStore};
pub use publisher::{DevicePublisher, DeviceReport};
pub use store::ConfigStore;
pub use supervisor::{Supervisor, SupervisorState, WindowEnd};
