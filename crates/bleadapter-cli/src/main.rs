//! `ble-adapter`: publishes nearby BLE devices to the platform broker and
//! executes GATT commands received from it.

mod args;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bleadapter_bluez::ObjectCache;
use bleadapter_core::{
    Broker, BrokerLifecycle, CommandProcessor, DevicePublisher, MqttBroker, MqttSettings,
    PlatformClient, PlatformConfigStore, Supervisor,
};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use args::{Args, USAGE_EXIT_CODE};

/// Delay between failed authentication attempts.
const AUTH_RETRY: Duration = Duration::from_secs(60);
/// Time allowed for the broker event loop to wind down.
const EVENT_LOOP_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(USAGE_EXIT_CODE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let _guard = match logging::init(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ble-adapter: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("ble-adapter: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting BLE adapter for device {}", args.device_name);
    let defaults = args.defaults()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        shutdown_tx.send_replace(true);
    });

    let platform = Arc::new(PlatformClient::new(&args.platform_url, args.credentials())?);
    let Some(token) = authenticate(&platform, shutdown_rx.clone()).await else {
        return Ok(());
    };

    let cache = Arc::new(
        ObjectCache::open_system()
            .await
            .context("Unable to open the BlueZ object manager on the system bus")?,
    );

    let settings = MqttSettings::from_url(&args.messaging_url, args.client_id())?
        .with_credentials(token, args.system_key.clone());
    let (broker, event_loop) = MqttBroker::new(&settings);
    let broker: Arc<dyn Broker> = Arc::new(broker);

    let processor = Arc::new(CommandProcessor::new(cache.clone(), broker.clone(), &defaults));
    let lifecycle = Arc::new(BrokerLifecycle::new(broker.clone(), processor, &defaults));
    let events = event_loop.spawn(lifecycle.clone());

    let publisher = Arc::new(DevicePublisher::new(cache.clone(), broker.clone()));
    let store = Arc::new(PlatformConfigStore::new(platform));
    let supervisor = Supervisor::new(
        cache.clone(),
        publisher,
        store,
        defaults,
        lifecycle.connected(),
        shutdown_rx,
    );
    let windows = supervisor.run().await;

    lifecycle.close();
    if let Err(e) = broker.disconnect().await {
        warn!("Broker disconnect failed: {}", e);
    }
    if tokio::time::timeout(EVENT_LOOP_DRAIN, events).await.is_err() {
        warn!("Broker event loop did not stop in time");
    }
    cache.close().await;

    info!("BLE adapter stopped after {} scan windows", windows);
    Ok(())
}

/// Authenticate until it succeeds. `None` when shutdown arrived first.
async fn authenticate(platform: &PlatformClient, mut shutdown: watch::Receiver<bool>) -> Option<String> {
    loop {
        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            result = platform.authenticate() => match result {
                Ok(token) => {
                    info!("Authenticated device {}", platform.credentials().device_name);
                    return Some(token);
                }
                Err(e) => error!(
                    "Device authentication failed, retrying in {}s: {}",
                    AUTH_RETRY.as_secs(),
                    e
                ),
            },
            _ = shutdown.changed() => continue,
        }
        tokio::select! {
            _ = tokio::time::sleep(AUTH_RETRY) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
