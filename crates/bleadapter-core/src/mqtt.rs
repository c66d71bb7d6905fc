//! MQTT broker client.
//!
//! ```text
//! MqttBroker (AsyncClient) ── publish / subscribe ──→ broker
//! MqttEventLoop task
//!   ├─ ConnAck           ──→ ConnectionHandler::on_connect
//!   ├─ poll error        ──→ ConnectionHandler::on_connection_lost (once per outage)
//!   └─ Publish           ──→ matching subscription channel
//! ```
//!
//! rumqttc reconnects on the next `poll` after an error, so the loop keeps
//! polling after a short back-off. Subscriptions do not survive a lost
//! connection: their channels are closed and the handler subscribes again
//! on the next `ConnAck`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{topic_matches, Broker, ConnectionHandler, InboundMessage};
use crate::config::Qos;
use crate::error::{AdapterError, AdapterResult};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;
const SUBSCRIPTION_CAPACITY: usize = 64;

/// Connection settings for [`MqttBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Settings for `url` (`host:port`, optionally prefixed with `tcp://`
    /// or `mqtt://`).
    pub fn from_url(url: &str, client_id: impl Into<String>) -> AdapterResult<Self> {
        let (host, port) = parse_broker_url(url)?;
        Ok(Self {
            host,
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: KEEP_ALIVE,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        options
    }
}

/// Split a messaging URL into host and port.
pub fn parse_broker_url(url: &str) -> AdapterResult<(String, u16)> {
    let trimmed = url.trim();
    let address = trimmed
        .strip_prefix("tcp://")
        .or_else(|| trimmed.strip_prefix("mqtt://"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    if address.is_empty() || address.contains("://") {
        return Err(AdapterError::config(format!("Invalid messaging URL: {}", url)));
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| AdapterError::config(format!("Invalid port in messaging URL: {}", url)))?;
            if host.is_empty() {
                return Err(AdapterError::config(format!("Missing host in messaging URL: {}", url)));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((address.to_string(), DEFAULT_MQTT_PORT)),
    }
}

type Routes = Arc<Mutex<Vec<(String, mpsc::Sender<InboundMessage>)>>>;

/// Broker client backed by rumqttc.
pub struct MqttBroker {
    client: AsyncClient,
    routes: Routes,
}

/// The event loop of an [`MqttBroker`]; must be spawned for the client to make progress.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    routes: Routes,
}

enum Lifecycle {
    Connected,
    Lost(String),
}

impl MqttBroker {
    pub fn new(settings: &MqttSettings) -> (Self, MqttEventLoop) {
        let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        let routes: Routes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                client,
                routes: routes.clone(),
            },
            MqttEventLoop { eventloop, routes },
        )
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> AdapterResult<()> {
        self.client
            .publish(topic, qos.into(), false, payload)
            .await
            .map_err(|e| AdapterError::broker(format!("Publish to {} failed: {}", topic, e)))
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> AdapterResult<mpsc::Receiver<InboundMessage>> {
        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| AdapterError::broker(format!("Subscribe to {} failed: {}", topic, e)))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.routes.lock().push((topic.to_string(), tx));
        Ok(rx)
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| AdapterError::broker(format!("Disconnect failed: {}", e)))
    }
}

impl MqttEventLoop {
    /// Spawn the poll loop. Lifecycle callbacks run on a separate task, one
    /// at a time and in order, so a slow handler never stalls polling.
    pub fn spawn(self, handler: Arc<dyn ConnectionHandler>) -> JoinHandle<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Lifecycle>();

        let callbacks = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    Lifecycle::Connected => handler.on_connect().await,
                    Lifecycle::Lost(reason) => handler.on_connection_lost(reason).await,
                }
            }
        });

        tokio::spawn(async move {
            let MqttEventLoop {
                mut eventloop,
                routes,
            } = self;
            let mut connected = false;

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            info!("MQTT connection acknowledged");
                            connected = true;
                            let _ = events_tx.send(Lifecycle::Connected);
                        } else {
                            error!("MQTT connection refused: {:?}", ack.code);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                        route(&routes, message).await;
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("MQTT client disconnected");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected {
                            connected = false;
                            routes.lock().clear();
                            let _ = events_tx.send(Lifecycle::Lost(e.to_string()));
                        } else {
                            warn!("MQTT connection error: {}", e);
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }

            if connected {
                routes.lock().clear();
                let _ = events_tx.send(Lifecycle::Lost("client disconnected".to_string()));
            }
            drop(events_tx);
            let _ = callbacks.await;
        })
    }
}

async fn route(routes: &Routes, message: InboundMessage) {
    let targets: Vec<mpsc::Sender<InboundMessage>> = {
        let mut routes = routes.lock();
        routes.retain(|(_, tx)| !tx.is_closed());
        routes
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &message.topic))
            .map(|(_, tx)| tx.clone())
            .collect()
    };
    if targets.is_empty() {
        debug!("No subscription for message on {}", message.topic);
    }
    for tx in targets {
        let _ = tx.send(message.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(parse_broker_url("localhost:1883").unwrap(), ("localhost".to_string(), 1883));
        assert_eq!(
            parse_broker_url("tcp://10.0.0.5:8883").unwrap(),
            ("10.0.0.5".to_string(), 8883)
        );
        assert_eq!(parse_broker_url("mqtt://edge").unwrap(), ("edge".to_string(), 1883));
        assert!(parse_broker_url("localhost:http").is_err());
        assert!(parse_broker_url(":1883").is_err());
        assert!(parse_broker_url("ws://edge:80").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn test_settings_credentials() {
        let settings = MqttSettings::from_url("localhost:1883", "bleadapter_edge1")
            .unwrap()
            .with_credentials("token", "system-key");
        assert_eq!(settings.client_id, "bleadapter_edge1");
        assert_eq!(settings.username.as_deref(), Some("token"));
        assert_eq!(settings.keep_alive, Duration::from_secs(30));
    }
}
