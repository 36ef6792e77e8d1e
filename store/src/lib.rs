//! The authoritative side of feature distribution: feature records kept in a
//! key-value store, the write path that validates them, and the watcher that
//! turns store contents into the feature file clients load.

pub mod config;
pub mod controller;
pub mod feature;
pub mod metrics_defs;
pub mod snapshot;
pub mod stores;
pub mod watcher;

use config::{Backend, Config};
use controller::Controller;
use std::sync::Arc;
use std::time::Duration;
use stores::{FilesystemStore, MemoryStore, Store};
use watcher::StoreWatcher;

pub use controller::ControllerError;
pub use feature::{Feature, FeatureType};
pub use stores::{KvBytes, StoreError};

pub fn build_store(backend: &Backend) -> Arc<dyn Store> {
    match backend {
        Backend::Filesystem { base_dir } => Arc::new(FilesystemStore::new(base_dir.clone())),
        Backend::Memory => Arc::new(MemoryStore::new()),
    }
}

/// Runs the store watcher for `namespace` until the store stops notifying.
pub async fn run(config: Config, namespace: &str) {
    let store = build_store(&config.backend);
    tracing::info!(namespace, backend = ?config.backend, "Starting store watcher");

    StoreWatcher::new(Controller::new(store, namespace), config.output_path)
        .with_poll_interval(Duration::from_secs(config.poll_interval_secs))
        .run()
        .await;
}
