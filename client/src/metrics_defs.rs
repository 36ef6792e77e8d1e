//! Metrics definitions for the feature client.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SNAPSHOT_INSTALLS: MetricDef = MetricDef {
    name: "client.snapshot.installs",
    metric_type: MetricType::Counter,
    description: "Number of feature maps installed with a new version",
};

pub const SNAPSHOT_PARSE_ERRORS: MetricDef = MetricDef {
    name: "client.snapshot.parse_errors",
    metric_type: MetricType::Counter,
    description: "Number of feature map payloads rejected because they failed to parse",
};

pub const MERGED_FEATURES: MetricDef = MetricDef {
    name: "client.snapshot.merged_features",
    metric_type: MetricType::Gauge,
    description: "Number of features in the merged view after the last install",
};

pub const WATCHER_DELIVERIES: MetricDef = MetricDef {
    name: "client.watcher.deliveries",
    metric_type: MetricType::Counter,
    description: "Number of feature file contents handed to the client",
};

pub const WATCHER_ERRORS: MetricDef = MetricDef {
    name: "client.watcher.errors",
    metric_type: MetricType::Counter,
    description: "Number of errors while reading or re-arming the watched feature file",
};

pub const POLLER_ERRORS: MetricDef = MetricDef {
    name: "client.poller.errors",
    metric_type: MetricType::Counter,
    description: "Number of failed feature map polls",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SNAPSHOT_INSTALLS,
    SNAPSHOT_PARSE_ERRORS,
    MERGED_FEATURES,
    WATCHER_DELIVERIES,
    WATCHER_ERRORS,
    POLLER_ERRORS,
];
