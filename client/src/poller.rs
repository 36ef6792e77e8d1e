//! Keeps a client current by polling a feature endpoint over HTTP.
//!
//! Each poll is a conditional GET carrying the installed version, so an
//! unchanged map costs a 304 and no body.

use crate::client::Client;
use crate::metrics_defs::POLLER_ERRORS;
use crate::models::{FeatureMap, ParseError};
use reqwest::header::{HeaderName, HeaderValue, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};
use shared::counter;
use std::time::Duration;

pub const DEFAULT_SCOPES_HEADER: &str = "x-dcdr-scopes";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum PollerError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Installed,
    Unchanged,
    NotModified,
}

pub struct Poller {
    client: Client,
    http: reqwest::Client,
    url: Url,
    scopes_header: HeaderName,
    scopes: Vec<String>,
    interval: Duration,
}

impl Poller {
    /// `client` receives the fetched maps. The endpoint already merges
    /// scopes, so it should be a client without scopes of its own.
    pub fn new(client: Client, url: Url) -> Self {
        Poller {
            client,
            http: reqwest::Client::new(),
            url,
            scopes_header: HeaderName::from_static(DEFAULT_SCOPES_HEADER),
            scopes: Vec::new(),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_scopes<S: AsRef<str>>(mut self, scopes: &[S]) -> Self {
        self.scopes = scopes.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_scopes_header(mut self, name: &str) -> Result<Self, PollerError> {
        self.scopes_header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| PollerError::InvalidHeader(name.to_string()))?;
        Ok(self)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn poll_once(&self) -> Result<PollOutcome, PollerError> {
        let mut request = self.http.get(self.url.clone());

        let version = self.client.current_version();
        if !version.is_empty() {
            let value = HeaderValue::from_str(&version)
                .map_err(|_| PollerError::InvalidHeader(IF_NONE_MATCH.to_string()))?;
            request = request.header(IF_NONE_MATCH, value);
        }
        if !self.scopes.is_empty() {
            let value = HeaderValue::from_str(&self.scopes.join(","))
                .map_err(|_| PollerError::InvalidHeader(self.scopes_header.to_string()))?;
            request = request.header(self.scopes_header.clone(), value);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(PollOutcome::NotModified),
            StatusCode::OK => {
                let body = response.bytes().await?;
                let feature_map = FeatureMap::parse(&body)?.into_default_scoped();
                if self.client.install_snapshot(feature_map) {
                    Ok(PollOutcome::Installed)
                } else {
                    Ok(PollOutcome::Unchanged)
                }
            }
            status => Err(PollerError::Status(status)),
        }
    }

    /// Polls forever. Failures are logged and retried on the next tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(outcome) => tracing::debug!(url = %self.url, ?outcome, "Polled feature map"),
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Failed to poll feature map");
                    counter!(POLLER_ERRORS).increment(1);
                }
            }
        }
    }
}
