//! Feature flag resolution.
//!
//! A [`Client`] holds the installed feature map and answers evaluation calls
//! against the merged view of its scopes. Maps reach a client from a watched
//! file ([`Client::watch`]), from an HTTP endpoint ([`poller::Poller`]) or
//! directly through [`Client::install_snapshot`].

pub mod bucketing;
pub mod client;
pub mod metrics_defs;
pub mod mock;
pub mod models;
pub mod poller;
pub mod stats;
pub mod watcher;

pub use client::{Client, WatchHandle};
pub use models::{FeatureMap, FeatureValue, Features, Info, ParseError};
pub use stats::{Evaluator, StatsClient};

pub const DEFAULT_WATCH_PATH: &str = "/etc/dcdr/decider.json";
