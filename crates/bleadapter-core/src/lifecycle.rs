//! Broker connection lifecycle.
//!
//! On connect the command topic is subscribed (retrying until it succeeds)
//! and a listener task is started with a fresh stop channel. On connection
//! loss the listener is stopped and the supervisor sees the connected flag
//! drop, which ends any active scan window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, ConnectionHandler, InboundMessage};
use crate::command::CommandProcessor;
use crate::config::{AdapterDefaults, Qos};

/// Delay between subscribe attempts.
pub const SUBSCRIBE_RETRY: Duration = Duration::from_secs(30);

/// Connection callbacks shared by the broker client and the supervisor.
pub struct BrokerLifecycle {
    broker: Arc<dyn Broker>,
    processor: Arc<CommandProcessor>,
    command_topic: String,
    qos: Qos,
    connected: watch::Sender<bool>,
    stop_commands: Mutex<Option<oneshot::Sender<()>>>,
    subscribe_retry: Duration,
}

impl BrokerLifecycle {
    pub fn new(broker: Arc<dyn Broker>, processor: Arc<CommandProcessor>, defaults: &AdapterDefaults) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            broker,
            processor,
            command_topic: defaults.command_topic(),
            qos: defaults.qos,
            connected,
            stop_commands: Mutex::new(None),
            subscribe_retry: SUBSCRIBE_RETRY,
        }
    }

    pub fn with_subscribe_retry(mut self, retry: Duration) -> Self {
        self.subscribe_retry = retry;
        self
    }

    /// Connected flag watched by the supervisor.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Stop handling commands and mark the broker as unavailable.
    pub fn close(&self) {
        self.connected.send_replace(false);
        self.stop_listener();
    }

    /// Stop the command listener, if one is running.
    fn stop_listener(&self) {
        let stop = self.stop_commands.lock().take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
    }
}

#[async_trait]
impl ConnectionHandler for BrokerLifecycle {
    async fn on_connect(&self) {
        info!("Connected to broker");
        self.connected.send_replace(true);

        // A listener left over from a previous session must not outlive it.
        self.stop_listener();
        let (stop_tx, stop_rx) = oneshot::channel();
        *self.stop_commands.lock() = Some(stop_tx);

        tokio::spawn(run_commands(
            self.broker.clone(),
            self.processor.clone(),
            self.command_topic.clone(),
            self.qos,
            self.subscribe_retry,
            stop_rx,
        ));
    }

    async fn on_connection_lost(&self, reason: String) {
        warn!("Connection to broker lost: {}", reason);
        self.connected.send_replace(false);
        self.stop_listener();
    }
}

/// Subscribe to the command topic and handle commands until stopped.
async fn run_commands(
    broker: Arc<dyn Broker>,
    processor: Arc<CommandProcessor>,
    topic: String,
    qos: Qos,
    retry: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let messages = loop {
        let attempt = tokio::select! {
            _ = &mut stop => return,
            attempt = broker.subscribe(&topic, qos) => attempt,
        };
        match attempt {
            Ok(messages) => break messages,
            Err(e) => {
                error!("Unable to subscribe to {}, retrying in {:?}: {}", topic, retry, e);
                tokio::select! {
                    _ = &mut stop => return,
                    _ = sleep(retry) => {}
                }
            }
        }
    };
    info!("Listening for BLE commands on {}", topic);
    listen(processor, messages, stop).await;
    info!("Stopped listening for BLE commands on {}", topic);
}

async fn listen(
    processor: Arc<CommandProcessor>,
    mut messages: mpsc::Receiver<InboundMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = &mut stop => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => {
                    debug!("Command subscription closed");
                    break;
                }
            },
        };
        debug!("BLE command received on {}", message.topic);

        // Commands run concurrently and are not joined.
        let processor = processor.clone();
        tokio::spawn(async move {
            let _ = processor.handle(&message.payload).await;
        });
    }
}
