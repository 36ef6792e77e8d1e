//! Metrics definitions for the feature server.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "server.http.requests",
    metric_type: MetricType::Counter,
    description: "Number of requests to the feature listener, tagged by status",
};

pub const HTTP_NOT_MODIFIED: MetricDef = MetricDef {
    name: "server.http.not_modified",
    metric_type: MetricType::Counter,
    description: "Number of feature requests answered with 304 Not Modified",
};

pub const HTTP_RESPONSE_BYTES: MetricDef = MetricDef {
    name: "server.http.response_bytes",
    metric_type: MetricType::Histogram,
    description: "Size of served feature documents in bytes",
};

pub const ALL_METRICS: &[MetricDef] = &[HTTP_REQUESTS, HTTP_NOT_MODIFIED, HTTP_RESPONSE_BYTES];
