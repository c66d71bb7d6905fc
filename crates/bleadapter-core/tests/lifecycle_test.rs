//! Broker connection lifecycle and command listening.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bleadapter_core::testing::MockBroker;
use bleadapter_core::{BrokerLifecycle, ConnectionHandler};
use common::*;
use serde_json::json;
use tokio::time::{sleep, timeout};

const LONG: Duration = Duration::from_secs(3600);

fn lifecycle(harness: &Harness) -> Arc<BrokerLifecycle> {
    Arc::new(BrokerLifecycle::new(
        harness.broker(),
        harness.processor(),
        &harness.defaults,
    ))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(LONG, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn live_subscriptions(broker: &MockBroker) -> usize {
    broker.subscriptions().len()
}

#[tokio::test(start_paused = true)]
async fn test_connect_subscribes_and_handles_commands() {
    let harness = Harness::new().await;
    harness.bus.add_device(SENSOR, &[]);
    let lifecycle = lifecycle(&harness);
    let connected = lifecycle.connected();
    assert!(!*connected.borrow());

    lifecycle.on_connect().await;
    assert!(lifecycle.is_connected());
    wait_until(|| live_subscriptions(&harness.broker) == 1).await;
    assert_eq!(harness.broker.subscriptions(), vec![COMMAND_TOPIC.to_string()]);

    let command = json!({"command": "connect", "deviceAddress": SENSOR, "stayConnected": true});
    let delivered = harness
        .broker
        .deliver(COMMAND_TOPIC, command.to_string())
        .await;
    assert_eq!(delivered, 1);

    let published = timeout(LONG, harness.broker.wait_for_publishes(1)).await.unwrap();
    assert_eq!(published[0].topic, RESPONSE_TOPIC);
    assert_eq!(published[0].json()["err"], false);
    assert_eq!(harness.bus.call_names(), vec!["Connect"]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_is_retried() {
    let harness = Harness::new().await;
    harness.broker.fail_subscribes(2);
    let lifecycle = lifecycle(&harness);

    lifecycle.on_connect().await;
    wait_until(|| harness.broker.subscribe_attempts() == 1).await;
    assert_eq!(live_subscriptions(&harness.broker), 0);

    sleep(Duration::from_secs(61)).await;
    wait_until(|| live_subscriptions(&harness.broker) == 1).await;
    assert_eq!(harness.broker.subscribe_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_stops_listener() {
    let harness = Harness::new().await;
    let lifecycle = lifecycle(&harness);
    let mut connected = lifecycle.connected();

    lifecycle.on_connect().await;
    wait_until(|| live_subscriptions(&harness.broker) == 1).await;

    lifecycle.on_connection_lost("keep-alive timeout".into()).await;
    assert!(!*connected.borrow_and_update());
    wait_until(|| live_subscriptions(&harness.broker) == 0).await;
    assert_eq!(harness.broker.deliver(COMMAND_TOPIC, "{}").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connection_lost_cancels_subscribe_retries() {
    let harness = Harness::new().await;
    harness.broker.fail_subscribes(100);
    let lifecycle = lifecycle(&harness);

    lifecycle.on_connect().await;
    wait_until(|| harness.broker.subscribe_attempts() == 1).await;
    lifecycle.on_connection_lost("broker went away".into()).await;

    sleep(Duration::from_secs(300)).await;
    assert_eq!(harness.broker.subscribe_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replaces_listener() {
    let harness = Harness::new().await;
    let lifecycle = lifecycle(&harness);

    lifecycle.on_connect().await;
    wait_until(|| live_subscriptions(&harness.broker) == 1).await;
    lifecycle.on_connection_lost("network down".into()).await;
    harness.broker.drop_subscriptions();

    lifecycle.on_connect().await;
    wait_until(|| live_subscriptions(&harness.broker) == 1).await;
    assert_eq!(harness.broker.subscribe_attempts(), 2);
    assert!(lifecycle.is_connected());

    lifecycle.close();
    assert!(!lifecycle.is_connected());
    wait_until(|| live_subscriptions(&harness.broker) == 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_survive_bad_payloads() {
    let harness = Harness::new().await;
    harness.bus.add_device(SENSOR, &[]);
    let lifecycle = lifecycle(&harness);
    lifecycle.on_connect().await;
    wait_until(|| live_subscriptions(&harness.broker) == 1).await;

    harness.broker.deliver(COMMAND_TOPIC, "not-json").await;
    let command = json!({"command": "disconnect", "deviceAddress": SENSOR});
    harness
        .broker
        .deliver(COMMAND_TOPIC, command.to_string())
        .await;

    let published = timeout(LONG, harness.broker.wait_for_publishes(2)).await.unwrap();
    let mut errors: Vec<bool> = published
        .iter()
        .map(|m| m.json()["err"].as_bool().unwrap())
        .collect();
    errors.sort();
    assert_eq!(errors, vec![false, true]);
}
