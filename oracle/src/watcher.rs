//! Keep a notification subscription open for a single account.
//!
//! A [Watcher] alternates between two states for the lifetime of the run:
//!
//! - _Connecting_: open a subscription starting from "now". Failures are retried after a delay
//!   that doubles from [Config::initial_backoff] up to [Config::max_backoff].
//! - _Streaming_: record the hash of every event in the account's [Deliveries]. When the stream
//!   ends, reconnect immediately if it was healthy (announced at least one transaction hash or
//!   stayed open for at least [Config::max_backoff]); otherwise treat it as another failed
//!   attempt. Keep-alive and malformed payloads do not make a stream healthy.
//!
//! Events announced while no subscription is open are not replayed. Watchers run until their
//! [Handle] is aborted (see [Supervisor]).

use crate::{
    account::{Deliveries, TestAccount},
    metrics,
};
use commonware_runtime::{Clock, Handle, Spawner};
use futures::StreamExt;
use herald_ledger::{Address, Ledger, Notification, Subscription};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for a [Watcher].
#[derive(Clone, Debug)]
pub struct Config {
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,

    /// Upper bound of the delay between attempts.
    pub max_backoff: Duration,
}

/// Capped exponential backoff.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// Delay to wait after another consecutive failure.
    pub fn next(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Watches the notification stream of one account.
pub struct Watcher<E: Clock + Spawner, L: Ledger> {
    context: E,
    ledger: L,
    cfg: Config,

    address: Address,
    deliveries: Deliveries,
    metrics: metrics::Watcher,
}

impl<E: Clock + Spawner, L: Ledger> Watcher<E, L> {
    /// Create a watcher for `account`.
    ///
    /// Only the account's address and a handle to its delivery records are retained.
    pub fn new(
        context: E,
        ledger: L,
        cfg: Config,
        account: &TestAccount,
        metrics: metrics::Watcher,
    ) -> Self {
        Self {
            context,
            ledger,
            cfg,
            address: account.address().clone(),
            deliveries: account.deliveries().clone(),
            metrics,
        }
    }

    /// Start watching in the background.
    pub fn start(mut self) -> Handle<()> {
        self.context.clone().spawn(move |context| {
            self.context = context;
            self.run()
        })
    }

    async fn run(self) {
        let mut backoff = Backoff::new(self.cfg.initial_backoff, self.cfg.max_backoff);
        loop {
            // Connecting
            let subscription = match self.ledger.subscribe(&self.address).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    self.metrics.connect_failures.inc();
                    let delay = backoff.next();
                    warn!(account = %self.address, ?err, ?delay, "subscription failed");
                    self.context.sleep(delay).await;
                    continue;
                }
            };
            self.metrics.connections.inc();
            debug!(account = %self.address, "streaming");

            // Streaming
            let opened = self.context.current();
            self.metrics.streaming.inc();
            let announced = self.stream(subscription).await;
            self.metrics.streaming.dec();
            self.metrics.disconnects.inc();
            let lifetime = self
                .context
                .current()
                .duration_since(opened)
                .unwrap_or_default();
            if announced > 0 || lifetime >= self.cfg.max_backoff {
                backoff.reset();
                info!(account = %self.address, announced, "stream closed, reconnecting");
                continue;
            }
            let delay = backoff.next();
            info!(account = %self.address, ?delay, "stream closed without announcements");
            self.context.sleep(delay).await;
        }
    }

    /// Record every event until the subscription ends, returning the number of hashes announced.
    async fn stream(&self, mut subscription: Subscription) -> usize {
        let mut announced = 0;
        while let Some(payload) = subscription.next().await {
            self.metrics.events.inc();
            match Notification::parse(&payload) {
                Ok(Notification {
                    hash: Some(hash), ..
                }) => {
                    announced += 1;
                    let expected = self.deliveries.deliver(&hash);
                    debug!(account = %self.address, %hash, expected, "notification received");
                }
                Ok(_) => {
                    self.metrics.malformed.inc();
                    warn!(account = %self.address, "notification without hash");
                }
                Err(err) => {
                    self.metrics.malformed.inc();
                    warn!(
                        account = %self.address,
                        ?err,
                        payload = %String::from_utf8_lossy(&payload),
                        "malformed notification"
                    );
                }
            }
        }
        announced
    }
}

/// Owns the handles of every running watcher.
#[derive(Default)]
pub struct Supervisor {
    handles: Vec<Handle<()>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: Handle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Abort every watcher.
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        debug!(watchers = self.handles.len(), "watchers stopped");
    }
}
