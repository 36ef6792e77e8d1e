//! Metrics definitions for the store.

use shared::metrics_defs::{MetricDef, MetricType};

pub const STORE_WRITES: MetricDef = MetricDef {
    name: "store.writes",
    metric_type: MetricType::Counter,
    description: "Number of feature records written or deleted, tagged by operation",
};

pub const SNAPSHOT_BUILDS: MetricDef = MetricDef {
    name: "store.snapshot.builds",
    metric_type: MetricType::Counter,
    description: "Number of feature maps rebuilt from the store",
};

pub const SNAPSHOT_WRITES: MetricDef = MetricDef {
    name: "store.snapshot.writes",
    metric_type: MetricType::Counter,
    description: "Number of feature files written with a new version",
};

pub const SNAPSHOT_ERRORS: MetricDef = MetricDef {
    name: "store.snapshot.errors",
    metric_type: MetricType::Counter,
    description: "Number of failed attempts to rebuild or write the feature file",
};

pub const SNAPSHOT_BUILD_DURATION: MetricDef = MetricDef {
    name: "store.snapshot.build.duration",
    metric_type: MetricType::Histogram,
    description: "Time to rebuild the feature map from the store in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    STORE_WRITES,
    SNAPSHOT_BUILDS,
    SNAPSHOT_WRITES,
    SNAPSHOT_ERRORS,
    SNAPSHOT_BUILD_DURATION,
];
