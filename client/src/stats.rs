use crate::models::{DEFAULT_SCOPE, Features};

/// Feature evaluation as seen by application code.
pub trait Evaluator: Send + Sync {
    /// True only for boolean features set to `true`.
    fn is_available(&self, feature: &str) -> bool;

    /// True when `id` falls inside the rollout of a percentile feature.
    fn is_available_for_id(&self, feature: &str, id: u64) -> bool;

    /// Maps a percentile feature onto `min..=max`. Falls back to `min`.
    fn scale_value(&self, feature: &str, min: f64, max: f64) -> f64;

    fn feature_exists(&self, feature: &str) -> bool;

    fn features(&self) -> Features;

    fn scopes(&self) -> &[String];
}

/// Receives one increment per evaluation.
pub trait CounterSink: Send + Sync {
    fn incr(&self, key: &str);
}

/// Forwards increments to the installed `metrics` recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSink;

impl CounterSink for MetricsSink {
    fn incr(&self, key: &str) {
        metrics::counter!(key.to_string()).increment(1);
    }
}

/// Wraps an evaluator and counts whether each checked feature was enabled.
///
/// Keys look like `<namespace>.<scopes>.<feature>.<enabled|disabled>` where
/// scopes are joined with `.` and any `/` inside a scope becomes `.` too.
pub struct StatsClient<C, S = MetricsSink> {
    client: C,
    sink: S,
    namespace: String,
}

impl<C: Evaluator> StatsClient<C, MetricsSink> {
    pub fn new(client: C, namespace: impl Into<String>) -> Self {
        StatsClient::with_sink(client, namespace, MetricsSink)
    }
}

impl<C: Evaluator, S: CounterSink> StatsClient<C, S> {
    pub fn with_sink(client: C, namespace: impl Into<String>, sink: S) -> Self {
        StatsClient {
            client,
            sink,
            namespace: namespace.into(),
        }
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn stat_key(&self, feature: &str, enabled: bool) -> String {
        let status = if enabled { "enabled" } else { "disabled" };
        let scopes = match self.client.scopes() {
            [] => DEFAULT_SCOPE.to_string(),
            scopes => scopes.join(".").replace('/', "."),
        };
        format!("{}.{scopes}.{feature}.{status}", self.namespace)
    }

    fn record(&self, feature: &str, enabled: bool) -> bool {
        self.sink.incr(&self.stat_key(feature, enabled));
        enabled
    }
}

impl<C: Evaluator, S: CounterSink> Evaluator for StatsClient<C, S> {
    fn is_available(&self, feature: &str) -> bool {
        let enabled = self.client.is_available(feature);
        self.record(feature, enabled)
    }

    fn is_available_for_id(&self, feature: &str, id: u64) -> bool {
        let enabled = self.client.is_available_for_id(feature, id);
        self.record(feature, enabled)
    }

    fn scale_value(&self, feature: &str, min: f64, max: f64) -> f64 {
        self.client.scale_value(feature, min, max)
    }

    fn feature_exists(&self, feature: &str) -> bool {
        self.client.feature_exists(feature)
    }

    fn features(&self) -> Features {
        self.client.features()
    }

    fn scopes(&self) -> &[String] {
        self.client.scopes()
    }
}
