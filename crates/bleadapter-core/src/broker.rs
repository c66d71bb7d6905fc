//! Upstream messaging broker seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Qos;
use crate::error::AdapterResult;

/// A message received on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Authenticated publish/subscribe client.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> AdapterResult<()>;

    /// Subscribe to `topic`. The returned stream ends when the connection
    /// that carried the subscription is lost.
    async fn subscribe(&self, topic: &str, qos: Qos) -> AdapterResult<mpsc::Receiver<InboundMessage>>;

    async fn disconnect(&self) -> AdapterResult<()>;
}

/// Connection lifecycle callbacks invoked by a broker client.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_connect(&self);

    async fn on_connection_lost(&self, reason: String);
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("edge1/cmd", "edge1/cmd"));
        assert!(!topic_matches("edge1/cmd", "edge1/cmd/response"));
        assert!(topic_matches("edge1/+/response", "edge1/cmd/response"));
        assert!(!topic_matches("edge1/+", "edge1/cmd/response"));
        assert!(topic_matches("edge1/#", "edge1/cmd/response"));
        assert!(topic_matches("edge1/#", "edge1"));
        assert!(!topic_matches("edge2/#", "edge1/cmd"));
    }
}
