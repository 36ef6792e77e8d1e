//! The write path: validated reads and writes of feature records.

use crate::feature::{FEATURES_SEGMENT, Feature, FeatureType, scope_prefix, scoped_key};
use crate::metrics_defs::{SNAPSHOT_BUILDS, STORE_WRITES};
use crate::snapshot::{SnapshotError, build_feature_map};
use crate::stores::{Store, StoreError};
use client::models::{FeatureMap, Info};
use shared::counter;

pub const INFO_KEY: &str = "info";

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("cannot change the type of an existing feature")]
    TypeChange,
    #[error("value cannot be empty for a new feature")]
    NilValue,
    #[error("feature key cannot be empty")]
    EmptyKey,
    #[error("feature key cannot contain '/': {0}")]
    InvalidKey(String),
    #[error("value does not match feature type {0}")]
    TypeMismatch(FeatureType),
    #[error("{0} not found")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid record: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

pub struct Controller<S> {
    store: S,
    namespace: String,
}

impl<S: Store> Controller<S> {
    pub fn new(store: S, namespace: impl Into<String>) -> Self {
        Controller {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records in `scope` whose key starts with `prefix`, ordered by key.
    pub async fn list(&self, prefix: &str, scope: &str) -> Result<Vec<Feature>, ControllerError> {
        let prefix = format!("{}/{prefix}", scope_prefix(&self.namespace, scope));
        let kvs = self.store.list(&prefix).await?;

        let mut features = Vec::with_capacity(kvs.len());
        for kv in kvs {
            features.push(serde_json::from_slice(&kv.bytes)?);
        }
        Ok(features)
    }

    pub async fn get(&self, key: &str, scope: &str) -> Result<Feature, ControllerError> {
        let scoped = scoped_key(&self.namespace, scope, key);
        match self.store.get(&scoped).await? {
            Some(kv) => Ok(serde_json::from_slice(&kv.bytes)?),
            None => Err(ControllerError::NotFound(scoped)),
        }
    }

    /// Writes `feature`. Empty fields are filled from the stored record:
    /// comment, value and type. The type of an existing feature never
    /// changes.
    pub async fn set(&self, mut feature: Feature) -> Result<Feature, ControllerError> {
        if feature.key.is_empty() {
            return Err(ControllerError::EmptyKey);
        }
        if feature.key.contains('/') {
            return Err(ControllerError::InvalidKey(feature.key));
        }
        feature.namespace = self.namespace.clone();
        feature.scope = feature.scope().to_string();

        let key = feature.scoped_key();
        let existing: Option<Feature> = match self.store.get(&key).await? {
            Some(kv) => Some(serde_json::from_slice(&kv.bytes)?),
            None => None,
        };

        match existing {
            Some(existing) => {
                if feature.comment.is_empty() {
                    feature.comment = existing.comment;
                }
                if feature.value.is_none() {
                    feature.value = existing.value;
                }
                match (feature.feature_type, existing.feature_type) {
                    (Some(new), Some(old)) if new != old => {
                        return Err(ControllerError::TypeChange);
                    }
                    (None, old) => feature.feature_type = old,
                    _ => {}
                }
            }
            None if feature.value.is_none() => return Err(ControllerError::NilValue),
            None => {}
        }

        if let Some(value) = &feature.value {
            let actual = FeatureType::of(value);
            match feature.feature_type {
                Some(declared) if declared != actual => {
                    return Err(ControllerError::TypeMismatch(declared));
                }
                Some(_) => {}
                None => feature.feature_type = Some(actual),
            }
        }

        self.store.set(&key, serde_json::to_vec(&feature)?).await?;
        counter!(STORE_WRITES, "op" => "set").increment(1);
        tracing::info!(
            key = %key,
            value = ?feature.value,
            updated_by = %feature.updated_by,
            "Set feature"
        );

        Ok(feature)
    }

    /// Removes the record and returns what was stored.
    pub async fn delete(&self, key: &str, scope: &str) -> Result<Feature, ControllerError> {
        let existing = self.get(key, scope).await?;
        let scoped = existing.scoped_key();

        self.store.delete(&scoped).await?;
        counter!(STORE_WRITES, "op" => "delete").increment(1);
        tracing::info!(key = %scoped, "Deleted feature");

        Ok(existing)
    }

    /// The info document stored for the namespace. Empty when none exists.
    pub async fn get_info(&self) -> Result<Info, ControllerError> {
        let key = format!("{}/{INFO_KEY}", self.namespace);
        match self.store.get(&key).await? {
            Some(kv) if !kv.bytes.is_empty() => Ok(serde_json::from_slice(&kv.bytes)?),
            _ => Ok(Info::default()),
        }
    }

    pub async fn set_info(&self, info: &Info) -> Result<(), ControllerError> {
        let key = format!("{}/{INFO_KEY}", self.namespace);
        self.store.set(&key, serde_json::to_vec(info)?).await?;
        Ok(())
    }

    /// Builds the feature map from everything under the namespace.
    pub async fn feature_map(&self) -> Result<FeatureMap, ControllerError> {
        let prefix = format!("{}/{FEATURES_SEGMENT}/", self.namespace);
        let kvs = self.store.list(&prefix).await?;
        let feature_map = build_feature_map(&self.namespace, &kvs)?;
        counter!(SNAPSHOT_BUILDS).increment(1);
        Ok(feature_map)
    }
}
