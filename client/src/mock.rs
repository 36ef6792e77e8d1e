//! In-memory client for tests of code that evaluates features.

use crate::client::Client;
use crate::models::{DEFAULT_ROOT, DEFAULT_SCOPE, FeatureMap, FeatureValue, Features};
use crate::stats::Evaluator;
use parking_lot::RwLock;

/// A client whose feature map is edited directly instead of being loaded
/// from a file. Each edit installs a fresh copy of the map.
pub struct MockClient {
    client: Client,
    feature_map: RwLock<FeatureMap>,
}

impl Default for MockClient {
    fn default() -> Self {
        MockClient::new()
    }
}

impl MockClient {
    pub fn new() -> Self {
        let feature_map = FeatureMap::empty(DEFAULT_ROOT);
        let client = Client::new();
        client.install_snapshot(feature_map.clone());

        MockClient {
            client,
            feature_map: RwLock::new(feature_map),
        }
    }

    /// The underlying client. Scoped clients derived from it keep the map
    /// that was installed when they were created.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn enable_bool_feature(&self, feature: &str) {
        self.set_feature(DEFAULT_SCOPE, feature, FeatureValue::Bool(true));
    }

    pub fn disable_bool_feature(&self, feature: &str) {
        self.set_feature(DEFAULT_SCOPE, feature, FeatureValue::Bool(false));
    }

    pub fn enable_percentile_feature(&self, feature: &str) {
        self.set_feature(DEFAULT_SCOPE, feature, FeatureValue::Number(1.0));
    }

    pub fn disable_percentile_feature(&self, feature: &str) {
        self.set_feature(DEFAULT_SCOPE, feature, FeatureValue::Number(0.0));
    }

    pub fn set_feature(&self, scope: &str, feature: &str, value: FeatureValue) {
        let mut feature_map = self.feature_map.write();
        feature_map.insert(scope, feature, value);
        self.client.install_snapshot(feature_map.clone());
    }
}

impl Evaluator for MockClient {
    fn is_available(&self, feature: &str) -> bool {
        self.client.is_available(feature)
    }

    fn is_available_for_id(&self, feature: &str, id: u64) -> bool {
        self.client.is_available_for_id(feature, id)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_features() {
        let mock = MockClient::new();
        assert!(!mock.feature_exists("new_ui"));

        mock.enable_bool_feature("new_ui");
        assert!(mock.is_available("new_ui"));

        mock.disable_bool_feature("new_ui");
        assert!(mock.feature_exists("new_ui"));
        assert!(!mock.is_available("new_ui"));
    }

    #[test]
    fn test_percentile_features() {
        let mock = MockClient::new();

        mock.enable_percentile_feature("rollout");
        assert!((0..100).all(|id| mock.is_available_for_id("rollout", id)));

        mock.disable_percentile_feature("rollout");
        assert!((0..100).all(|id| !mock.is_available_for_id("rollout", id)));
    }

    #[test]
    fn test_scoped_features() {
        let mock = MockClient::new();
        mock.enable_bool_feature("flag");
        mock.set_feature("cc/de", "flag", FeatureValue::Bool(false));

        assert!(mock.is_available("flag"));
        assert!(!mock.client().with_scopes(&["cc/de"]).is_available("flag"));
        assert!(mock.client().with_scopes(&["cc/fr"]).is_available("flag"));
    }
}
