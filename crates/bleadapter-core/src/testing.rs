//! In-memory broker and config store for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::broker::{topic_matches, Broker, InboundMessage};
use crate::config::{Qos, RemoteAdapterConfig};
use crate::error::{AdapterError, AdapterResult};
use crate::store::ConfigStore;

const SUBSCRIPTION_CAPACITY: usize = 16;

/// A message handed to [`MockBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

impl PublishedMessage {
    /// The payload parsed as JSON, `Value::Null` when it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// A broker that records publishes and lets tests inject messages.
#[derive(Default)]
pub struct MockBroker {
    published: Mutex<Vec<PublishedMessage>>,
    routes: Mutex<Vec<(String, mpsc::Sender<InboundMessage>)>>,
    subscribe_attempts: AtomicUsize,
    subscribe_failures: AtomicUsize,
    fail_publish: AtomicBool,
    disconnected: AtomicBool,
    notify: Notify,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear_published(&self) {
        self.published.lock().clear();
    }

    /// Wait until at least `count` messages have been published.
    pub async fn wait_for_publishes(&self, count: usize) -> Vec<PublishedMessage> {
        loop {
            let notified = self.notify.notified();
            {
                let published = self.published.lock();
                if published.len() >= count {
                    return published.clone();
                }
            }
            notified.await;
        }
    }

    /// Topics with a live subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.routes
            .lock()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `count` subscribe calls.
    pub fn fail_subscribes(&self, count: usize) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Deliver a message to every matching subscription; returns how many
    /// subscriptions received it.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let message = InboundMessage::new(topic, payload);
        let targets: Vec<_> = self
            .routes
            .lock()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, tx)| tx.clone())
            .collect();

        let mut delivered = 0;
        for tx in targets {
            if tx.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every subscription stream, as a lost connection does.
    pub fn drop_subscriptions(&self) {
        self.routes.lock().clear();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> AdapterResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AdapterError::broker("publish rejected"));
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: Qos) -> AdapterResult<mpsc::Receiver<InboundMessage>> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .subscribe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AdapterError::broker(format!("subscribe to {} rejected", topic)));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.routes.lock().push((topic.to_string(), tx));
        Ok(rx)
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.drop_subscriptions();
        Ok(())
    }
}

/// A config store serving fixed values.
#[derive(Default)]
pub struct StaticConfigStore {
    filters: Mutex<Vec<String>>,
    adapter_config: Mutex<Option<RemoteAdapterConfig>>,
    fail_filters: AtomicBool,
    fail_adapter_config: AtomicBool,
    loads: AtomicUsize,
}

impl StaticConfigStore {
    pub fn new(filters: Vec<String>, adapter_config: Option<RemoteAdapterConfig>) -> Self {
        Self {
            filters: Mutex::new(filters),
            adapter_config: Mutex::new(adapter_config),
            ..Default::default()
        }
    }

    pub fn set_filters(&self, filters: Vec<String>) {
        *self.filters.lock() = filters;
    }

    pub fn set_adapter_config(&self, config: Option<RemoteAdapterConfig>) {
        *self.adapter_config.lock() = config;
    }

    pub fn fail_filters(&self, fail: bool) {
        self.fail_filters.store(fail, Ordering::SeqCst);
    }

    pub fn fail_adapter_config(&self, fail: bool) {
        self.fail_adapter_config.store(fail, Ordering::SeqCst);
    }

    /// Number of adapter-config loads served.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn filters(&self) -> AdapterResult<Vec<String>> {
        if self.fail_filters.load(Ordering::SeqCst) {
            return Err(AdapterError::config("filter collection unavailable"));
        }
        Ok(self.filters.lock().clone())
    }

    async fn adapter_config(&self) -> AdapterResult<Option<RemoteAdapterConfig>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_adapter_config.load(Ordering::SeqCst) {
            return Err(AdapterError::config("adapter config unavailable"));
        }
        Ok(self.adapter_config.lock().clone())
    }
}
