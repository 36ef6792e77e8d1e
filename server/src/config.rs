use http::HeaderName;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_SCOPES_HEADER: &str = "x-dcdr-scopes";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Namespace cannot be empty")]
    EmptyNamespace,

    #[error("Endpoint must start with '/': {0}")]
    InvalidEndpoint(String),

    #[error("Invalid scopes header name: {0}")]
    InvalidScopesHeader(String),

    #[error("JSON root cannot be empty")]
    EmptyJsonRoot,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 8000,
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 8001,
    }
}

fn default_scopes_header() -> String {
    DEFAULT_SCOPES_HEADER.into()
}

fn default_feature_path() -> PathBuf {
    PathBuf::from(client::DEFAULT_WATCH_PATH)
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Serves the feature map
    #[serde(default = "default_listener")]
    pub listener: Listener,
    /// Serves /health and /ready
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    /// Path of the feature route, `/<namespace>.json` when unset
    pub endpoint: Option<String>,
    /// Top level key of served documents, the namespace when unset
    pub json_root: Option<String>,
    #[serde(default = "default_scopes_header")]
    pub scopes_header: String,
    /// Feature file to watch
    #[serde(default = "default_feature_path")]
    pub feature_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: default_listener(),
            admin_listener: default_admin_listener(),
            endpoint: None,
            json_root: None,
            scopes_header: default_scopes_header(),
            feature_path: default_feature_path(),
        }
    }
}

impl Config {
    pub fn endpoint(&self, namespace: &str) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("/{namespace}.json"))
    }

    pub fn json_root(&self, namespace: &str) -> String {
        self.json_root
            .clone()
            .unwrap_or_else(|| namespace.to_string())
    }

    pub fn scopes_header_name(&self) -> Result<HeaderName, ValidationError> {
        HeaderName::from_bytes(self.scopes_header.as_bytes())
            .map_err(|_| ValidationError::InvalidScopesHeader(self.scopes_header.clone()))
    }

    pub fn validate(&self, namespace: &str) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if namespace.is_empty() {
            return Err(ValidationError::EmptyNamespace);
        }

        let endpoint = self.endpoint(namespace);
        if !endpoint.starts_with('/') {
            return Err(ValidationError::InvalidEndpoint(endpoint));
        }

        if self.json_root(namespace).is_empty() {
            return Err(ValidationError::EmptyJsonRoot);
        }

        self.scopes_header_name()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 9000
admin_listener:
    host: "127.0.0.1"
    port: 9001
endpoint: /features.json
json_root: features
feature_path: /tmp/decider.json
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate("dcdr").is_ok());
        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.endpoint("dcdr"), "/features.json");
        assert_eq!(config.json_root("dcdr"), "features");
        assert_eq!(config.scopes_header, "x-dcdr-scopes");
        assert_eq!(config.feature_path, PathBuf::from("/tmp/decider.json"));
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.admin_listener.port, 8001);
        assert_eq!(config.endpoint("dcdr"), "/dcdr.json");
        assert_eq!(config.json_root("dcdr"), "dcdr");
        assert_eq!(config.feature_path, PathBuf::from("/etc/dcdr/decider.json"));
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config::default();
        assert!(base_config.validate("dcdr").is_ok());

        let mut config = base_config.clone();
        config.listener.port = 0;
        assert_eq!(config.validate("dcdr"), Err(ValidationError::InvalidPort));

        assert_eq!(
            base_config.validate(""),
            Err(ValidationError::EmptyNamespace)
        );

        let mut config = base_config.clone();
        config.endpoint = Some("features.json".into());
        assert_eq!(
            config.validate("dcdr"),
            Err(ValidationError::InvalidEndpoint("features.json".into()))
        );

        let mut config = base_config.clone();
        config.scopes_header = "bad header".into();
        assert_eq!(
            config.validate("dcdr"),
            Err(ValidationError::InvalidScopesHeader("bad header".into()))
        );

        let mut config = base_config.clone();
        config.json_root = Some(String::new());
        assert_eq!(config.validate("dcdr"), Err(ValidationError::EmptyJsonRoot));
    }
}
