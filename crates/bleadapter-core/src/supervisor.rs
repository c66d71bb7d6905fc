//! Scan/pause supervisor.
//!
//! Drives the discovery duty cycle while the broker is connected:
//!
//! ```text
//! NotConnected --connected--> ReadyToScan --idle adapter--> Scanning
//! ReadyToScan --adapter discovering--> WaitAdapterIdle --5s--> ReadyToScan
//! Scanning --timer, disconnect or shutdown--> StopScan --drained--> Paused
//! Paused --pause elapsed--> ReadyToScan
//! ```
//!
//! The supervisor is the only sender on a window's stop channel. The
//! discovery forwarder is the only sender on the signal channel and closes
//! it after stopping, so the dispatcher drains it and exits on its own.

use std::sync::Arc;
use std::time::Duration;

use bleadapter_bluez::{Discovery, ObjectCache};
use tokio::sync::{oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{canonical_filters, AdapterDefaults, RemoteAdapterConfig, WindowConfig};
use crate::dispatch::{dispatch, DispatchSummary, PublishGate};
use crate::publisher::DevicePublisher;
use crate::store::ConfigStore;

/// How long to wait when another client is already discovering.
pub const ADAPTER_BUSY_WAIT: Duration = Duration::from_secs(5);
/// Back-off after a window failed to start.
pub const WINDOW_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Minimum gap between two windows.
pub const MIN_IDLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotConnected,
    ReadyToScan,
    WaitAdapterIdle,
    Scanning,
    StopScan,
    Paused,
    Stopped,
}

/// Why a scan window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEnd {
    /// The scan interval elapsed.
    Elapsed,
    /// The broker connection was lost.
    Disconnected,
    /// The process is shutting down.
    Shutdown,
    /// The forwarder stopped on its own.
    StreamClosed,
}

/// Result of one pass through the state machine.
#[derive(Debug, Clone, PartialEq)]
enum Pass {
    Window {
        config: WindowConfig,
        end: WindowEnd,
        summary: DispatchSummary,
    },
    AdapterBusy,
    Failed,
}

async fn wait_for_flag(flag: &mut watch::Receiver<bool>, wanted: bool) -> bool {
    flag.wait_for(|value| *value == wanted).await.is_ok()
}

/// Owns the duty cycle for the lifetime of the process.
pub struct Supervisor {
    cache: Arc<ObjectCache>,
    discovery: Discovery,
    publisher: Arc<DevicePublisher>,
    store: Arc<dyn ConfigStore>,
    defaults: AdapterDefaults,
    connected: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<SupervisorState>,
    filters: Vec<String>,
    windows: usize,
}

impl Supervisor {
    pub fn new(
        cache: Arc<ObjectCache>,
        publisher: Arc<DevicePublisher>,
        store: Arc<dyn ConfigStore>,
        defaults: AdapterDefaults,
        connected: watch::Receiver<bool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::NotConnected);
        Self {
            discovery: Discovery::new(cache.clone()),
            cache,
            publisher,
            store,
            defaults,
            connected,
            shutdown,
            state,
            filters: Vec::new(),
            windows: 0,
        }
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Supervisor {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Run until shutdown. Returns the number of completed windows.
    pub async fn run(mut self) -> usize {
        info!("Scan supervisor started");
        loop {
            if self.shutting_down() {
                break;
            }
            if !self.is_connected() {
                self.set_state(SupervisorState::NotConnected);
                info!("Waiting for broker connection before scanning");
                let connected = tokio::select! {
                    up = wait_for_flag(&mut self.connected, true) => up,
                    _ = wait_for_flag(&mut self.shutdown, true) => false,
                };
                if !connected {
                    break;
                }
                continue;
            }

            self.set_state(SupervisorState::ReadyToScan);
            let idle = match self.run_window().await {
                Pass::Window {
                    config,
                    end,
                    summary,
                } => {
                    self.windows += 1;
                    info!(
                        "Scan window {} ended ({:?}): {} signals, {} published, {} filtered",
                        self.windows, end, summary.signals, summary.published, summary.filtered
                    );
                    match end {
                        WindowEnd::Shutdown => break,
                        WindowEnd::Disconnected => continue,
                        WindowEnd::Elapsed if config.should_pause() => {
                            self.set_state(SupervisorState::Paused);
                            debug!("Pausing for {:?}", config.pause_interval);
                            config.pause_interval
                        }
                        _ => MIN_IDLE,
                    }
                }
                Pass::AdapterBusy => {
                    self.set_state(SupervisorState::WaitAdapterIdle);
                    ADAPTER_BUSY_WAIT
                }
                Pass::Failed => WINDOW_RETRY_DELAY,
            };

            tokio::select! {
                _ = sleep(idle.max(MIN_IDLE)) => {}
                _ = wait_for_flag(&mut self.connected, false) => {}
                _ = wait_for_flag(&mut self.shutdown, true) => break,
            }
        }

        self.set_state(SupervisorState::Stopped);
        info!("Scan supervisor stopped after {} windows", self.windows);
        self.windows
    }

    async fn load_config(&mut self) -> WindowConfig {
        match self.store.filters().await {
            Ok(raw) => self.filters = canonical_filters(&raw),
            Err(e) => warn!("Unable to load device filters, keeping previous set: {}", e),
        }
        let remote: Option<RemoteAdapterConfig> = match self.store.adapter_config().await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("Unable to load adapter config, using defaults: {}", e);
                None
            }
        };
        WindowConfig::merge(&self.defaults, remote.as_ref(), self.filters.clone())
    }

    async fn run_window(&mut self) -> Pass {
        if let Err(e) = self.cache.update().await {
            error!("Unable to refresh object cache: {}", e);
            return Pass::Failed;
        }
        let adapter = match self.cache.adapter() {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Unable to find BLE adapter: {}", e);
                return Pass::Failed;
            }
        };
        if adapter.discovering() {
            info!("Adapter {} is already discovering, waiting", adapter.path());
            return Pass::AdapterBusy;
        }

        let config = self.load_config().await;
        debug!("Window config: {:?}", config);

        let (stop_tx, stop_rx) = oneshot::channel();
        let stream = match self
            .discovery
            .start(stop_rx, &config.discovery_options())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!("Unable to start discovery: {}", e);
                return Pass::Failed;
            }
        };
        self.set_state(SupervisorState::Scanning);

        let (signals, mut forwarder) = stream.into_parts();
        let gate = PublishGate::new(self.connected.clone(), self.shutdown.clone());
        let dispatcher = tokio::spawn(dispatch(
            signals,
            self.publisher.clone(),
            config.clone(),
            gate,
        ));

        let bounded = config.scan_is_bounded();
        let end = tokio::select! {
            _ = sleep(config.scan_interval), if bounded => WindowEnd::Elapsed,
            _ = wait_for_flag(&mut self.connected, false) => WindowEnd::Disconnected,
            _ = wait_for_flag(&mut self.shutdown, true) => WindowEnd::Shutdown,
            _ = &mut forwarder => WindowEnd::StreamClosed,
        };

        self.set_state(SupervisorState::StopScan);
        if end != WindowEnd::StreamClosed {
            let _ = stop_tx.send(());
            if let Err(e) = forwarder.await {
                error!("Discovery forwarder failed: {}", e);
            }
        }
        let summary = match dispatcher.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Signal dispatcher failed: {}", e);
                DispatchSummary::default()
            }
        };

        Pass::Window {
            config,
            end,
            summary,
        }
    }
}
