//! The feature map: a versioned tree of scopes and feature values.
//!
//! On the wire a feature map is a JSON document with a single root key:
//!
//! ```json
//! {
//!   "dcdr": {
//!     "info": { "current_version": "abcde", "last_modified": 1757030409 },
//!     "features": {
//!       "default": { "new_ui": true, "rollout": 0.25 },
//!       "cc": { "de": { "rollout": 1 } }
//!     }
//!   }
//! }
//! ```
//!
//! `default` holds unscoped values. Every other key under `features` is a
//! scope which may nest further scopes, addressed with `/` separated paths
//! such as `cc/de`.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_SCOPE: &str = "default";
pub const DEFAULT_ROOT: &str = "dcdr";

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("invalid feature map: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
}

impl FeatureValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(b) => Some(*b),
            FeatureValue::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            FeatureValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Bool(b) => write!(f, "{b}"),
            FeatureValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Bool(value)
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

/// A slot in the scope tree: either a feature value or a nested scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Value(FeatureValue),
    Scope(Scope),
}

pub type Scope = BTreeMap<String, Node>;

/// Flat mapping of feature name to value. This is what evaluation reads.
pub type Features = BTreeMap<String, FeatureValue>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default, alias = "current_sha")]
    pub current_version: String,
    // seconds since 1970-01-01 00:00:00 UTC
    #[serde(default, alias = "last_modified_date")]
    pub last_modified: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Root {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
    #[serde(default)]
    pub features: Scope,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMap {
    root_key: String,
    root: Root,
}

impl FeatureMap {
    pub fn new(root_key: impl Into<String>, root: Root) -> Self {
        FeatureMap {
            root_key: root_key.into(),
            root,
        }
    }

    /// A map with no info block and an empty `default` scope.
    pub fn empty(root_key: impl Into<String>) -> Self {
        let features = Scope::from([(DEFAULT_SCOPE.to_string(), Node::Scope(Scope::new()))]);
        FeatureMap::new(
            root_key,
            Root {
                info: None,
                features,
            },
        )
    }

    /// Builds the document served to a scoped caller: the info block plus a
    /// flat, already merged set of features.
    pub fn scoped(root_key: impl Into<String>, info: Option<Info>, features: &Features) -> Self {
        let features = features
            .iter()
            .map(|(name, value)| (name.clone(), Node::Value(*value)))
            .collect();

        FeatureMap::new(root_key, Root { info, features })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    pub fn info(&self) -> Option<&Info> {
        self.root.info.as_ref()
    }

    pub fn set_info(&mut self, info: Info) {
        self.root.info = Some(info);
    }

    pub fn features(&self) -> &Scope {
        &self.root.features
    }

    pub fn version(&self) -> &str {
        self.root
            .info
            .as_ref()
            .map(|info| info.current_version.as_str())
            .unwrap_or("")
    }

    pub fn last_modified(&self) -> Option<i64> {
        self.root.info.as_ref().map(|info| info.last_modified)
    }

    /// Walks `path` from the top of the feature tree.
    pub fn lookup(&self, path: &[&str]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.features.get(*first)?;

        for segment in rest {
            match node {
                Node::Scope(scope) => node = scope.get(*segment)?,
                Node::Value(_) => return None,
            }
        }

        Some(node)
    }

    /// Feature values directly inside `scope`. Unknown paths yield an empty
    /// mapping. Nested scopes are not included.
    pub fn in_scope(&self, scope: &str) -> Features {
        let path: Vec<&str> = scope.split('/').collect();

        match self.lookup(&path) {
            Some(Node::Scope(scope)) => scope
                .iter()
                .filter_map(|(name, node)| match node {
                    Node::Value(value) => Some((name.clone(), *value)),
                    Node::Scope(_) => None,
                })
                .collect(),
            _ => Features::new(),
        }
    }

    pub fn defaults(&self) -> Features {
        self.in_scope(DEFAULT_SCOPE)
    }

    /// Merges `scopes`, given highest priority first, over the `default`
    /// scope. The first listed scope wins on collisions. Empty scope names
    /// are skipped.
    pub fn merged_scopes<S: AsRef<str>>(&self, scopes: &[S]) -> Features {
        let has_default = scopes.iter().any(|s| s.as_ref() == DEFAULT_SCOPE);
        let implicit_default = (!has_default).then_some(DEFAULT_SCOPE);

        let mut merged = Features::new();
        for scope in implicit_default
            .into_iter()
            .chain(scopes.iter().rev().map(AsRef::as_ref))
        {
            if scope.is_empty() {
                continue;
            }
            merged.extend(self.in_scope(scope));
        }

        merged
    }

    /// Sets `name` inside the scope at `scope`, creating intermediate scopes.
    /// A value occupying an intermediate slot is replaced by a scope.
    pub fn insert(&mut self, scope: &str, name: &str, value: FeatureValue) {
        let mut current = &mut self.root.features;

        for segment in scope.split('/').filter(|s| !s.is_empty()) {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Node::Scope(Scope::new()));
            if let Node::Value(_) = slot {
                *slot = Node::Scope(Scope::new());
            }
            let Node::Scope(next) = slot else {
                return;
            };
            current = next;
        }

        current.insert(name.to_string(), Node::Value(value));
    }

    /// Moves values sitting at the top of the feature tree into `default`.
    /// Scoped documents served over HTTP carry their merged features at the
    /// top level; this turns them back into a map a client can resolve.
    pub fn into_default_scoped(mut self) -> Self {
        let features = std::mem::take(&mut self.root.features);
        let mut defaults = Scope::new();
        let mut rest = Scope::new();

        for (name, node) in features {
            match node {
                Node::Value(_) => {
                    defaults.insert(name, node);
                }
                Node::Scope(scope) if name == DEFAULT_SCOPE => {
                    for (inner_name, inner_node) in scope {
                        defaults.entry(inner_name).or_insert(inner_node);
                    }
                }
                Node::Scope(_) => {
                    rest.insert(name, node);
                }
            }
        }

        rest.insert(DEFAULT_SCOPE.to_string(), Node::Scope(defaults));
        self.root.features = rest;
        self
    }
}

impl Serialize for FeatureMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.root_key, &self.root)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut roots = BTreeMap::<String, Root>::deserialize(deserializer)?;
        let count = roots.len();

        match roots.pop_first() {
            Some((root_key, root)) if roots.is_empty() => Ok(FeatureMap { root_key, root }),
            _ => Err(D::Error::custom(format!(
                "expected exactly one root key, found {count}"
            ))),
        }
    }
}
