//! Typed signal dispatch for one scan window.

use std::sync::Arc;

use bleadapter_bluez::{classify, BleEvent, RawSignal};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::WindowConfig;
use crate::publisher::DevicePublisher;

/// Counters reported when a window's signal channel closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub signals: usize,
    pub published: usize,
    pub filtered: usize,
    pub failed: usize,
    /// Device events that arrived after publishing was closed.
    pub dropped: usize,
}

/// Publishing is open while the broker is connected and no shutdown is pending.
#[derive(Debug, Clone)]
pub struct PublishGate {
    connected: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl PublishGate {
    pub fn new(connected: watch::Receiver<bool>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            connected,
            shutdown,
        }
    }

    /// A gate that never closes.
    pub fn always_open() -> Self {
        let (_, connected) = watch::channel(true);
        let (_, shutdown) = watch::channel(false);
        Self::new(connected, shutdown)
    }

    pub fn is_open(&self) -> bool {
        *self.connected.borrow() && !*self.shutdown.borrow()
    }
}

/// Consume the window's signal channel until the forwarder closes it.
///
/// Events are handled one at a time, so publishes for a device follow
/// host-bus order. Once `gate` closes, remaining device events are drained
/// without publishing.
pub async fn dispatch(
    mut signals: mpsc::Receiver<RawSignal>,
    publisher: Arc<DevicePublisher>,
    config: WindowConfig,
    gate: PublishGate,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    while let Some(signal) = signals.recv().await {
        summary.signals += 1;
        let events = match classify(&signal) {
            Ok(events) => events,
            Err(e) => {
                warn!("Dropping signal {} on {}: {}", signal.name, signal.path, e);
                continue;
            }
        };
        for event in events {
            handle_event(&event, &publisher, &config, &gate, &mut summary).await;
        }
    }

    debug!("Signal channel closed: {:?}", summary);
    summary
}

async fn handle_event(
    event: &BleEvent,
    publisher: &DevicePublisher,
    config: &WindowConfig,
    gate: &PublishGate,
    summary: &mut DispatchSummary,
) {
    match event {
        BleEvent::DeviceAdded { address, .. } | BleEvent::DevicePropertiesChanged { address, .. } => {
            if !gate.is_open() {
                summary.dropped += 1;
                debug!("Publishing closed, dropping event for {}", address);
                return;
            }
            match publisher.publish_device(address, config).await {
                Ok(true) => summary.published += 1,
                Ok(false) => summary.filtered += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!("Unable to publish device {}: {}", address, e);
                }
            }
        }
        BleEvent::DeviceRemoved { address, .. } => info!("Device removed: {}", address),
        BleEvent::AdapterAdded { path, .. } => debug!("Adapter added: {}", path),
        BleEvent::ServiceAdded { path, .. } => debug!("GATT service added: {}", path),
        BleEvent::CharacteristicAdded { path, .. } => debug!("GATT characteristic added: {}", path),
        BleEvent::DescriptorAdded { path, .. } => debug!("GATT descriptor added: {}", path),
        BleEvent::ObjectRemoved { path, interfaces } => {
            debug!("Interfaces removed from {}: {:?}", path, interfaces)
        }
        BleEvent::AdapterPropertiesChanged { path, changed, .. } => {
            debug!("Adapter {} changed {} properties", path, changed.len())
        }
        BleEvent::GattPropertiesChanged {
            path, interface, ..
        } => debug!("{} properties changed on {}", interface, path),
        BleEvent::Unknown { name } => debug!("Ignoring signal {}", name),
    }
}
