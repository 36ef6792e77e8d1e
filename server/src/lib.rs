pub mod config;
pub mod metrics_defs;
pub mod scopes;
pub mod service;

use client::Client;
use shared::admin_service::AdminService;
use shared::http::run_http_service;

pub use service::FeatureService;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] config::ValidationError),
}

/// Watches the feature file and serves it until a listener fails.
///
/// A feature file that cannot be watched is logged and the server keeps
/// serving an empty map, reporting not ready on the admin listener.
pub async fn run(config: config::Config, namespace: &str) -> Result<(), ServerError> {
    let client = Client::new();
    let feature_service = FeatureService::from_config(client.clone(), &config, namespace)?;

    let _watch = match client.watch(&config.feature_path) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(
                path = %config.feature_path.display(),
                error = %e,
                "Failed to watch feature file"
            );
            None
        }
    };

    let ready_client = client.clone();
    let admin_service: AdminService<_, ServerError> =
        AdminService::new(move || ready_client.is_ready());

    let feature_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        feature_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(feature_task, admin_task)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::poller::{PollOutcome, Poller};
    use client::{Evaluator, FeatureMap};
    use shared::http::serve_listener;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    const FIXTURE: &str = r#"{
      "dcdr": {
        "info": { "current_version": "abcde", "last_modified": 1757030409 },
        "features": {
          "default": { "flag": true, "rollout": 0.5 },
          "beta": { "flag": false }
        }
      }
    }"#;

    async fn start(client: Client) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = FeatureService::new(
            client,
            "/dcdr.json",
            "dcdr",
            http::HeaderName::from_static("x-dcdr-scopes"),
        );
        tokio::spawn(async move {
            let _ = serve_listener::<_, ServerError>(listener, service).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_conditional_get_over_http() {
        let client = Client::new();
        client.install_snapshot(FeatureMap::parse(FIXTURE.as_bytes()).unwrap());
        let addr = start(client).await;
        let url = format!("http://{addr}/dcdr.json");

        let http = reqwest::Client::new();
        let response = http.get(&url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let etag = response.headers()["etag"].to_str().unwrap().to_string();
        assert_eq!(etag, "abcde");

        let response = http
            .get(&url)
            .header("if-none-match", etag)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_MODIFIED);
        assert_eq!(
            response.headers()["cache-control"],
            "no-cache, no-store, must-revalidate"
        );
    }

    #[tokio::test]
    async fn test_poller_against_server() {
        let source = Client::new();
        source.install_snapshot(FeatureMap::parse(FIXTURE.as_bytes()).unwrap());
        let addr = start(source.clone()).await;

        let url = reqwest::Url::parse(&format!("http://{addr}/dcdr.json")).unwrap();
        let poller = Poller::new(Client::new(), url).with_scopes(&["beta"]);

        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Installed);
        let polled = poller.client();
        assert_eq!(polled.current_version(), "abcde");
        // The server merged the scope, the poller's client sees the result
        assert!(!polled.is_available("flag"));
        assert!(polled.feature_exists("rollout"));

        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::NotModified);

        let mut updated = FeatureMap::parse(FIXTURE.as_bytes()).unwrap();
        updated.set_info(client::Info {
            current_version: "fghij".into(),
            last_modified: 1757030500,
        });
        updated.insert("beta", "flag", client::FeatureValue::Bool(true));
        source.install_snapshot(updated);

        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Installed);
        assert!(poller.client().is_available("flag"));
    }

    #[tokio::test]
    async fn test_poller_unexpected_status() {
        let addr = start(Client::new()).await;
        let url = reqwest::Url::parse(&format!("http://{addr}/missing.json")).unwrap();
        let poller = Poller::new(Client::new(), url);

        assert!(matches!(
            poller.poll_once().await,
            Err(client::poller::PollerError::Status(reqwest::StatusCode::NOT_FOUND))
        ));
    }
}
