//! Feature records as they are kept in the key-value store, one JSON document
//! per key.

use client::FeatureValue;
use client::models::DEFAULT_SCOPE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Segment between the namespace and the scope in every feature key.
pub const FEATURES_SEGMENT: &str = "features";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Percentile,
    Boolean,
}

impl FeatureType {
    pub fn of(value: &FeatureValue) -> Self {
        match value {
            FeatureValue::Bool(_) => FeatureType::Boolean,
            FeatureValue::Number(_) => FeatureType::Percentile,
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureType::Percentile => f.write_str("percentile"),
            FeatureType::Boolean => f.write_str("boolean"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Left empty on writes to keep the stored type.
    #[serde(default)]
    pub feature_type: Option<FeatureType>,
    pub key: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub scope: String,
    /// Left empty on writes to keep the stored value.
    #[serde(default)]
    pub value: Option<FeatureValue>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub updated_by: String,
}

impl Feature {
    pub fn new(key: impl Into<String>, value: FeatureValue) -> Self {
        Feature {
            feature_type: Some(FeatureType::of(&value)),
            key: key.into(),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_updated_by(mut self, updated_by: impl Into<String>) -> Self {
        self.updated_by = updated_by.into();
        self
    }

    /// The record's scope, `default` when unset.
    pub fn scope(&self) -> &str {
        if self.scope.is_empty() {
            DEFAULT_SCOPE
        } else {
            &self.scope
        }
    }

    /// `<namespace>/features/<scope>/<key>`
    pub fn scoped_key(&self) -> String {
        scoped_key(&self.namespace, self.scope(), &self.key)
    }
}

pub fn scoped_key(namespace: &str, scope: &str, key: &str) -> String {
    format!("{}/{key}", scope_prefix(namespace, scope))
}

pub fn scope_prefix(namespace: &str, scope: &str) -> String {
    let scope = if scope.is_empty() { DEFAULT_SCOPE } else { scope };
    format!("{namespace}/{FEATURES_SEGMENT}/{scope}")
}

/// Reads a value typed on the command line or in a form. Boolean spellings
/// other than `0` and `1` are booleans, finite numbers are percentiles.
pub fn parse_value(input: &str) -> Option<(FeatureValue, FeatureType)> {
    let input = input.trim();

    let boolean = match input {
        "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    };
    if let Some(b) = boolean {
        return Some((FeatureValue::Bool(b), FeatureType::Boolean));
    }

    match input.parse::<f64>() {
        Ok(n) if n.is_finite() => Some((FeatureValue::Number(n), FeatureType::Percentile)),
        _ => None,
    }
}
