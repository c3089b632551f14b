use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Submitter`](crate::submitter::Submitter)
#[derive(Clone, Default)]
pub struct Submitter {
    /// Number of submissions requested
    pub submissions: Counter,
    /// Number of attempts made across all submissions
    pub attempts: Counter,
    /// Number of failed attempts
    pub failures: Counter,
    /// Number of submissions abandoned after the retry cap
    pub exhausted: Counter,
}

impl Submitter {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "submissions",
            "Number of submissions requested",
            metrics.submissions.clone(),
        );
        context.register(
            "attempts",
            "Number of attempts made across all submissions",
            metrics.attempts.clone(),
        );
        context.register(
            "failures",
            "Number of failed attempts",
            metrics.failures.clone(),
        );
        context.register(
            "exhausted",
            "Number of submissions abandoned after the retry cap",
            metrics.exhausted.clone(),
        );
        metrics
    }
}

/// Metrics shared by every [`Watcher`](crate::watcher::Watcher)
#[derive(Clone, Default)]
pub struct Watcher {
    /// Number of events received
    pub events: Counter,
    /// Number of events without a usable hash
    pub malformed: Counter,
    /// Number of subscriptions opened
    pub connections: Counter,
    /// Number of failed subscription attempts
    pub connect_failures: Counter,
    /// Number of streams that ended
    pub disconnects: Counter,
    /// Number of watchers currently streaming
    pub streaming: Gauge,
}

impl Watcher {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register("events", "Number of events received", metrics.events.clone());
        context.register(
            "malformed",
            "Number of events without a usable hash",
            metrics.malformed.clone(),
        );
        context.register(
            "connections",
            "Number of subscriptions opened",
            metrics.connections.clone(),
        );
        context.register(
            "connect_failures",
            "Number of failed subscription attempts",
            metrics.connect_failures.clone(),
        );
        context.register(
            "disconnects",
            "Number of streams that ended",
            metrics.disconnects.clone(),
        );
        context.register(
            "streaming",
            "Number of watchers currently streaming",
            metrics.streaming.clone(),
        );
        metrics
    }
}

/// Metrics for the [`Orchestrator`](crate::orchestrator::Orchestrator)
#[derive(Clone, Default)]
pub struct Orchestrator {
    /// Number of batches completed
    pub batches: Counter,
    /// Number of payments generated
    pub payments: Counter,
    /// Number of expected notifications that arrived
    pub delivered: Counter,
    /// Number of expected notifications missing after the settle window
    pub missing: Counter,
}

impl Orchestrator {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register("batches", "Number of batches completed", metrics.batches.clone());
        context.register(
            "payments",
            "Number of payments generated",
            metrics.payments.clone(),
        );
        context.register(
            "delivered",
            "Number of expected notifications that arrived",
            metrics.delivered.clone(),
        );
        context.register(
            "missing",
            "Number of expected notifications missing after the settle window",
            metrics.missing.clone(),
        );
        metrics
    }
}
