use crate::bucketing::within_percentile;
use crate::metrics_defs::{MERGED_FEATURES, SNAPSHOT_INSTALLS, SNAPSHOT_PARSE_ERRORS};
use crate::models::{FeatureMap, FeatureValue, Features, Info, ParseError};
use crate::stats::Evaluator;
use crate::watcher::{Watcher, WatcherError};
use parking_lot::RwLock;
use shared::{counter, gauge};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

/// What a client resolves against. Replaced wholesale on every install,
/// never mutated in place.
#[derive(Debug, Default)]
struct ClientState {
    feature_map: Option<Arc<FeatureMap>>,
    features: Features,
}

impl ClientState {
    fn version(&self) -> &str {
        self.feature_map
            .as_deref()
            .map(FeatureMap::version)
            .unwrap_or("")
    }
}

struct ClientInner {
    scopes: Vec<String>,
    state: RwLock<Arc<ClientState>>,
}

/// Resolves features against the installed feature map and the client's
/// scopes. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Client::with_state(Vec::new(), ClientState::default())
    }

    fn with_state(scopes: Vec<String>, state: ClientState) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                scopes,
                state: RwLock::new(Arc::new(state)),
            }),
        }
    }

    fn state(&self) -> Arc<ClientState> {
        self.inner.state.read().clone()
    }

    /// Returns a client that resolves with `scopes` appended to this
    /// client's scopes. The installed feature map is shared.
    ///
    /// No scopes, or a single empty scope, returns this same client.
    pub fn with_scopes<S: AsRef<str>>(&self, scopes: &[S]) -> Client {
        match scopes {
            [] => return self.clone(),
            [only] if only.as_ref().is_empty() => return self.clone(),
            _ => {}
        }

        let scopes: Vec<String> = self
            .inner
            .scopes
            .iter()
            .cloned()
            .chain(scopes.iter().map(|s| s.as_ref().to_string()))
            .collect();

        let feature_map = self.state().feature_map.clone();
        let features = feature_map
            .as_deref()
            .map(|fm| fm.merged_scopes(&scopes))
            .unwrap_or_default();

        Client::with_state(
            scopes,
            ClientState {
                feature_map,
                features,
            },
        )
    }

    /// Swaps in `feature_map` and recomputes the merged view. Returns false
    /// without touching anything when the map carries the version already
    /// installed.
    pub fn install_snapshot(&self, feature_map: impl Into<Arc<FeatureMap>>) -> bool {
        let feature_map = feature_map.into();
        let mut state = self.inner.state.write();

        let current = state.version();
        if !current.is_empty() && current == feature_map.version() {
            tracing::debug!(version = current, "Feature map version unchanged");
            return false;
        }

        tracing::info!(
            version = feature_map.version(),
            previous = current,
            "Installing feature map"
        );
        let features = feature_map.merged_scopes(&self.inner.scopes);
        gauge!(MERGED_FEATURES).set(features.len() as f64);
        *state = Arc::new(ClientState {
            feature_map: Some(feature_map),
            features,
        });
        counter!(SNAPSHOT_INSTALLS).increment(1);
        true
    }

    /// Parses `bytes` and installs the result. A payload that fails to
    /// parse leaves the current feature map in place.
    pub fn update_features(&self, bytes: &[u8]) -> Result<bool, ParseError> {
        match FeatureMap::parse(bytes) {
            Ok(feature_map) => Ok(self.install_snapshot(feature_map)),
            Err(e) => {
                tracing::error!(error = %e, "Discarding feature map update");
                counter!(SNAPSHOT_PARSE_ERRORS).increment(1);
                Err(e)
            }
        }
    }

    /// Installs every payload received until the channel closes.
    pub async fn run_updates(&self, mut updates: UnboundedReceiver<Vec<u8>>) {
        while let Some(bytes) = updates.recv().await {
            // Errors are logged by update_features
            let _ = self.update_features(&bytes);
        }
    }

    /// Watches the feature file at `path`, installing its current content
    /// before returning and every change afterwards.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch(&self, path: impl Into<PathBuf>) -> Result<WatchHandle, WatcherError> {
        let watcher = Arc::new(Watcher::new(path));
        watcher.init()?;

        match watcher.read_file() {
            Ok(bytes) => {
                let _ = self.update_features(&bytes);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Feature file has no initial content");
            }
        }

        let (tx, rx) = unbounded_channel();
        watcher.register(tx);

        let thread_watcher = watcher.clone();
        std::thread::Builder::new()
            .name("decider-watcher".to_string())
            .spawn(move || {
                if let Err(e) = thread_watcher.watch() {
                    tracing::error!(error = %e, "Feature file watcher stopped");
                }
            })?;

        let consumer = self.clone();
        tokio::spawn(async move { consumer.run_updates(rx).await });

        Ok(WatchHandle { watcher })
    }

    pub fn current_version(&self) -> String {
        self.state().version().to_string()
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.state()
            .feature_map
            .as_deref()
            .and_then(FeatureMap::last_modified)
    }

    pub fn feature_map(&self) -> Option<Arc<FeatureMap>> {
        self.state().feature_map.clone()
    }

    /// Whether any feature map has been installed.
    pub fn is_ready(&self) -> bool {
        self.state().feature_map.is_some()
    }

    /// The merged view for this client's scopes followed by `scopes`,
    /// as a servable document under `root_key`. The info block and the
    /// features come from the same installed map.
    pub fn scoped_map<S: AsRef<str>>(&self, root_key: &str, scopes: &[S]) -> FeatureMap {
        let state = self.state();
        let feature_map = state.feature_map.as_deref();
        let info: Option<Info> = feature_map.and_then(|fm| fm.info().cloned());

        match feature_map {
            Some(fm) if !scopes.is_empty() => {
                let scopes: Vec<&str> = self
                    .inner
                    .scopes
                    .iter()
                    .map(String::as_str)
                    .chain(scopes.iter().map(AsRef::as_ref))
                    .collect();
                FeatureMap::scoped(root_key, info, &fm.merged_scopes(&scopes))
            }
            _ => FeatureMap::scoped(root_key, info, &state.features),
        }
    }

    pub fn get(&self, feature: &str) -> Option<FeatureValue> {
        self.state().features.get(feature).copied()
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Evaluator for Client {
    fn is_available(&self, feature: &str) -> bool {
        matches!(self.get(feature), Some(FeatureValue::Bool(true)))
    }

    fn is_available_for_id(&self, feature: &str, id: u64) -> bool {
        match self.get(feature) {
            Some(FeatureValue::Number(p)) => within_percentile(feature, id, p),
            _ => false,
        }
    }

    fn scale_value(&self, feature: &str, min: f64, max: f64) -> f64 {
        match self.get(feature) {
            Some(FeatureValue::Number(v)) => min + (max - min) * v,
            _ => min,
        }
    }

    fn feature_exists(&self, feature: &str) -> bool {
        self.state().features.contains_key(feature)
    }

    fn features(&self) -> Features {
        self.state().features.clone()
    }

    fn scopes(&self) -> &[String] {
        &self.inner.scopes
    }
}

/// Keeps a file watch alive. Dropping the handle stops the watcher thread
/// and, once it has exited, the update task.
pub struct WatchHandle {
    watcher: Arc<Watcher>,
}

impl WatchHandle {
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.watcher.close();
    }
}
