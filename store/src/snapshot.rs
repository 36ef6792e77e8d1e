//! Turns store contents into the feature map clients read.

use crate::feature::{FEATURES_SEGMENT, Feature};
use crate::stores::KvBytes;
use client::models::{FeatureMap, Info};
use sha2::{Digest, Sha256};

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("invalid feature record at {key}: {source}")]
    Record {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode features: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Builds the feature map for `namespace` from the records in `kvs`.
///
/// Keys look like `<namespace>/features/<scope...>/<key>`. Entries outside
/// that prefix are ignored. The map is rooted at `namespace`, always has a
/// `default` scope and carries a version derived from its features, with
/// `last_modified` left at 0.
pub fn build_feature_map(namespace: &str, kvs: &[KvBytes]) -> Result<FeatureMap, SnapshotError> {
    let prefix = format!("{namespace}/{FEATURES_SEGMENT}/");
    let mut feature_map = FeatureMap::empty(namespace);

    for kv in kvs {
        let Some(path) = kv.key.strip_prefix(&prefix) else {
            tracing::debug!(key = %kv.key, "Skipping key outside the features namespace");
            continue;
        };

        let feature: Feature =
            serde_json::from_slice(&kv.bytes).map_err(|source| SnapshotError::Record {
                key: kv.key.clone(),
                source,
            })?;
        let Some(value) = feature.value else {
            tracing::warn!(key = %kv.key, "Skipping feature record without a value");
            continue;
        };

        let (scope, name) = path.rsplit_once('/').unwrap_or(("", path));
        if name.is_empty() {
            continue;
        }
        feature_map.insert(scope, name, value);
    }

    let version = version_of(&feature_map)?;
    feature_map.set_info(Info {
        current_version: version,
        last_modified: 0,
    });
    Ok(feature_map)
}

/// Hex SHA-256 of the features tree. Scopes are ordered maps, so equal
/// trees always hash the same.
pub fn version_of(feature_map: &FeatureMap) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(feature_map.features())?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}
