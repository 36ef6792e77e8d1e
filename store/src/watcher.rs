//! Writes the feature file whenever the store's features change.

use crate::controller::{Controller, ControllerError};
use crate::metrics_defs::{SNAPSHOT_BUILD_DURATION, SNAPSHOT_ERRORS, SNAPSHOT_WRITES};
use crate::stores::{Store, write_atomic};
use client::models::{FeatureMap, Info};
use shared::{counter, histogram};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("failed to encode feature map: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sole writer of the feature file.
pub struct StoreWatcher<S> {
    controller: Controller<S>,
    output_path: PathBuf,
    poll_interval: Duration,
    last_version: Option<String>,
}

impl<S: Store> StoreWatcher<S> {
    pub fn new(controller: Controller<S>, output_path: impl Into<PathBuf>) -> Self {
        StoreWatcher {
            controller,
            output_path: output_path.into(),
            poll_interval: Duration::from_secs(5),
            last_version: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn last_version(&self) -> Option<&str> {
        self.last_version.as_deref()
    }

    /// Rebuilds the feature map and writes it out if its version changed.
    /// Returns whether a file was written.
    pub async fn sync_once(&mut self) -> Result<bool, WatchError> {
        let start = Instant::now();
        let mut feature_map = self.controller.feature_map().await?;
        histogram!(SNAPSHOT_BUILD_DURATION).record(start.elapsed().as_secs_f64());

        let version = feature_map.version().to_string();
        if self.last_version.as_deref() == Some(version.as_str()) {
            return Ok(false);
        }

        feature_map.set_info(Info {
            current_version: version.clone(),
            last_modified: chrono::Utc::now().timestamp(),
        });
        let bytes = feature_map.to_json()?;

        let path = self.output_path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(std::io::Error::other)
            .and_then(|result| result)
            .map_err(|source| WatchError::Write {
                path: self.output_path.clone(),
                source,
            })?;

        tracing::info!(
            path = %self.output_path.display(),
            version = %version,
            "Wrote feature file"
        );
        counter!(SNAPSHOT_WRITES).increment(1);
        self.last_version = Some(version);
        Ok(true)
    }

    // An existing output file written earlier is not rewritten on startup
    // unless the store has moved on.
    fn prime(&mut self) {
        let Ok(bytes) = std::fs::read(&self.output_path) else {
            return;
        };
        if let Ok(existing) = FeatureMap::parse(&bytes) {
            let version = existing.version();
            if !version.is_empty() {
                self.last_version = Some(version.to_string());
            }
        }
    }

    async fn sync_logged(&mut self) {
        if let Err(e) = self.sync_once().await {
            tracing::error!(error = %e, "Failed to sync feature file");
            counter!(SNAPSHOT_ERRORS).increment(1);
        }
    }

    /// Keeps the feature file current. Follows store notifications when the
    /// backend provides them and polls otherwise. Returns once the store
    /// stops sending notifications.
    pub async fn run(mut self) {
        self.prime();

        match self.controller.store().subscribe() {
            Some(mut changes) => {
                tracing::info!(path = %self.output_path.display(), "Following store notifications");
                loop {
                    changes.borrow_and_update();
                    self.sync_logged().await;
                    if changes.changed().await.is_err() {
                        break;
                    }
                }
            }
            None => {
                tracing::info!(
                    path = %self.output_path.display(),
                    interval_secs = self.poll_interval.as_secs(),
                    "Polling store"
                );
                let mut ticker = tokio::time::interval(self.poll_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    self.sync_logged().await;
                }
            }
        }
    }
}
