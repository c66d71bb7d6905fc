//! Discovery engine.
//!
//! A discovery window installs the match rules, starts discovery on the
//! adapter and forwards qualifying signals to a channel owned by the caller.
//! The forwarder task is the only writer of that channel: when the stop
//! token arrives it stops discovery, removes the rules and drops the sender,
//! which closes the channel exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{MatchRule, RawSignal};
use crate::cache::ObjectCache;
use crate::error::{BleError, BleResult};
use crate::objects::Adapter;

/// Capacity of the forwarded signal channel.
const FORWARD_CAPACITY: usize = 64;

/// Parameters of one discovery window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Canonical filter UUIDs; empty disables UUID filtering.
    pub filters: Vec<String>,
    pub handle_removed: bool,
    pub handle_changed: bool,
}

/// Output of an active discovery window.
pub struct DiscoveryStream {
    /// Raw signals matching the installed rules, in host-bus order.
    /// Closed by the forwarder after the window stops.
    pub signals: mpsc::Receiver<RawSignal>,
    forwarder: JoinHandle<()>,
}

impl DiscoveryStream {
    /// Split into the signal receiver and the forwarder handle.
    pub fn into_parts(self) -> (mpsc::Receiver<RawSignal>, JoinHandle<()>) {
        (self.signals, self.forwarder)
    }
}

/// Clears the active flag when the window ends, however it ends.
struct ActiveGuard(Arc<AtomicBool>);

impl ActiveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> BleResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BleError::DiscoveryActive)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs discovery windows against the object cache, one at a time.
pub struct Discovery {
    cache: Arc<ObjectCache>,
    active: Arc<AtomicBool>,
}

impl Discovery {
    pub fn new(cache: Arc<ObjectCache>) -> Self {
        Self {
            cache,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a window is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a discovery window.
    ///
    /// Fails with [`BleError::DiscoveryActive`] if a window is already
    /// running. Any failure while setting up leaves no match rule installed
    /// and no task running. The window ends when `stop` fires or its sender
    /// is dropped.
    pub async fn start(
        &self,
        stop: oneshot::Receiver<()>,
        options: &DiscoveryOptions,
    ) -> BleResult<DiscoveryStream> {
        let guard = ActiveGuard::acquire(&self.active)?;

        self.cache.update().await?;
        let adapter = self.cache.adapter()?;

        // Subscribe before the rules go in so no matched signal is missed.
        let input = self.cache.signal_channel();
        let rules = MatchRule::for_window(options.handle_removed, options.handle_changed);

        let mut installed = Vec::with_capacity(rules.len());
        for rule in &rules {
            if let Err(e) = self.cache.add_match(*rule).await {
                error!("Error adding match rule {}: {}", rule, e);
                remove_rules(&self.cache, &installed).await;
                return Err(e);
            }
            installed.push(*rule);
        }

        if let Err(e) = begin(&adapter, &options.filters).await {
            remove_rules(&self.cache, &installed).await;
            return Err(e);
        }
        info!(
            "Discovery started on {} with {} filter UUIDs",
            adapter.path(),
            options.filters.len()
        );

        let (tx, rx) = mpsc::channel(FORWARD_CAPACITY);
        let forwarder = tokio::spawn(forward(
            self.cache.clone(),
            adapter,
            installed,
            input,
            tx,
            stop,
            guard,
        ));

        Ok(DiscoveryStream {
            signals: rx,
            forwarder,
        })
    }
}

async fn begin(adapter: &Adapter, filters: &[String]) -> BleResult<()> {
    adapter.set_discovery_filter(filters).await.map_err(|e| {
        error!("Error setting discovery filter: {}", e);
        e
    })?;
    adapter.start_discovery().await.map_err(|e| {
        error!("Error starting discovery: {}", e);
        e
    })
}

async fn remove_rules(cache: &ObjectCache, rules: &[MatchRule]) {
    for rule in rules {
        if let Err(e) = cache.remove_match(*rule).await {
            warn!("Error removing match rule {}: {}", rule, e);
        }
    }
}

async fn forward(
    cache: Arc<ObjectCache>,
    adapter: Adapter,
    rules: Vec<MatchRule>,
    mut input: broadcast::Receiver<RawSignal>,
    tx: mpsc::Sender<RawSignal>,
    mut stop: oneshot::Receiver<()>,
    guard: ActiveGuard,
) {
    'window: loop {
        let signal = tokio::select! {
            biased;
            _ = &mut stop => break 'window,
            received = input.recv() => match received {
                Ok(signal) => signal,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Discovery forwarder lagged, {} signals skipped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    warn!("Host signal stream closed during discovery");
                    break 'window;
                }
            },
        };

        if !rules.iter().any(|rule| rule.matches(&signal)) {
            continue;
        }

        tokio::select! {
            biased;
            _ = &mut stop => break 'window,
            sent = tx.send(signal) => {
                if sent.is_err() {
                    debug!("Signal consumer went away, stopping discovery");
                    break 'window;
                }
            }
        }
    }

    if let Err(e) = adapter.stop_discovery().await {
        warn!("Error stopping discovery: {}", e);
    }
    remove_rules(&cache, &rules).await;
    drop(input);
    drop(tx);
    drop(guard);
    info!("Discovery stopped on {}", adapter.path());
}
