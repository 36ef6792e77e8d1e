//! Serves the scoped feature map with conditional GET support.

use crate::ServerError;
use crate::config::{Config, ValidationError};
use crate::metrics_defs::{HTTP_NOT_MODIFIED, HTTP_REQUESTS, HTTP_RESPONSE_BYTES};
use crate::scopes::parse_scopes;
use client::Client;
use http::header::{
    CACHE_CONTROL, CONTENT_TYPE, ETAG, EXPIRES, HeaderMap, HeaderName, HeaderValue,
    IF_NONE_MATCH, LAST_MODIFIED, PRAGMA,
};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::{empty_body, full_body, make_boxed_error_response};
use shared::{counter, histogram};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub struct FeatureService {
    client: Client,
    endpoint: String,
    json_root: String,
    scopes_header: HeaderName,
}

impl FeatureService {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        json_root: impl Into<String>,
        scopes_header: HeaderName,
    ) -> Self {
        FeatureService {
            client,
            endpoint: endpoint.into(),
            json_root: json_root.into(),
            scopes_header,
        }
    }

    pub fn from_config(
        client: Client,
        config: &Config,
        namespace: &str,
    ) -> Result<Self, ValidationError> {
        config.validate(namespace)?;
        Ok(FeatureService::new(
            client,
            config.endpoint(namespace),
            config.json_root(namespace),
            config.scopes_header_name()?,
        ))
    }

    fn respond(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Response<BoxBody<Bytes, Infallible>> {
        let mut response = if path != self.endpoint {
            make_boxed_error_response(StatusCode::NOT_FOUND)
        } else if method != Method::GET && method != Method::HEAD {
            make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED)
        } else {
            self.features(headers)
        };

        let response_headers = response.headers_mut();
        response_headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        response_headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        response_headers.insert(EXPIRES, HeaderValue::from_static("0"));
        if let Some(scopes) = headers.get(&self.scopes_header) {
            response_headers.insert(self.scopes_header.clone(), scopes.clone());
        }

        counter!(HTTP_REQUESTS, "status" => response.status().as_str().to_owned()).increment(1);
        response
    }

    fn features(&self, headers: &HeaderMap) -> Response<BoxBody<Bytes, Infallible>> {
        let scopes = headers
            .get(&self.scopes_header)
            .and_then(|value| value.to_str().ok())
            .map(parse_scopes)
            .unwrap_or_default();

        // Validators and body must describe the same installed map
        let document = self.client.scoped_map(&self.json_root, &scopes);
        let version = document.version();
        let etag = HeaderValue::from_str(version)
            .ok()
            .filter(|_| !version.is_empty());

        if !version.is_empty() && if_none_match(headers, version) {
            counter!(HTTP_NOT_MODIFIED).increment(1);
            let mut response = Response::new(empty_body());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            if let Some(etag) = etag {
                response.headers_mut().insert(ETAG, etag);
            }
            return response;
        }

        let body = match document.to_json() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize feature map");
                return make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };
        histogram!(HTTP_RESPONSE_BYTES).record(body.len() as f64);

        let mut response = Response::new(full_body(body));
        let response_headers = response.headers_mut();
        response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(etag) = etag {
            response_headers.insert(ETAG, etag);
        }
        if let Some(last_modified) = document.last_modified().and_then(http_date) {
            response_headers.insert(LAST_MODIFIED, last_modified);
        }
        response
    }
}

/// Whether any entity tag in `If-None-Match` names `version`. Quotes and
/// weak markers are ignored.
fn if_none_match(headers: &HeaderMap, version: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|tag| {
            let tag = tag.trim();
            let tag = tag.strip_prefix("W/").unwrap_or(tag);
            tag.trim_matches('"')
        })
        .any(|tag| tag == version)
}

fn http_date(timestamp: i64) -> Option<HeaderValue> {
    let date = chrono::DateTime::from_timestamp(timestamp, 0)?;
    HeaderValue::from_str(&date.format(HTTP_DATE_FORMAT).to_string()).ok()
}

impl<B> Service<Request<B>> for FeatureService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = ServerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let res = self.respond(req.method(), req.uri().path(), req.headers());
        Box::pin(async move { Ok(res) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::{FeatureMap, FeatureValue, Info};
    use http_body_util::{BodyExt, Empty};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const FIXTURE: &str = r#"{
      "dcdr": {
        "info": { "current_version": "abcde", "last_modified": 1757030409 },
        "features": {
          "default": { "flag": true, "rollout": 0.5 },
          "cc": { "de": { "flag": false } },
          "beta": { "rollout": 1 }
        }
      }
    }"#;

    fn service() -> FeatureService {
        let client = Client::new();
        client.install_snapshot(FeatureMap::parse(FIXTURE.as_bytes()).unwrap());
        FeatureService::new(
            client,
            "/dcdr.json",
            "dcdr",
            HeaderName::from_static("x-dcdr-scopes"),
        )
    }

    fn request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request<Empty<Bytes>> {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Empty::new()).unwrap()
    }

    async fn body_json(response: Response<BoxBody<Bytes, Infallible>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn assert_cache_headers(response: &Response<BoxBody<Bytes, Infallible>>) {
        let headers = response.headers();
        assert_eq!(
            headers[CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(headers[PRAGMA], "no-cache");
        assert_eq!(headers[EXPIRES], "0");
    }

    #[tokio::test]
    async fn test_serves_defaults() {
        let service = service();
        let response = service
            .call(request(Method::GET, "/dcdr.json", &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_cache_headers(&response);
        assert_eq!(response.headers()[ETAG], "abcde");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            response.headers()[LAST_MODIFIED],
            "Fri, 05 Sep 2025 00:00:09 GMT"
        );

        let json = body_json(response).await;
        assert_eq!(json["dcdr"]["info"]["current_version"], "abcde");
        assert_eq!(json["dcdr"]["features"]["flag"], true);
        assert_eq!(json["dcdr"]["features"]["rollout"], 0.5);
    }

    #[tokio::test]
    async fn test_serves_scoped_view() {
        let service = service();
        let response = service
            .call(request(
                Method::GET,
                "/dcdr.json",
                &[("x-dcdr-scopes", " cc/de, beta")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-dcdr-scopes"], " cc/de, beta");

        let json = body_json(response).await;
        assert_eq!(json["dcdr"]["features"]["flag"], false);
        assert_eq!(json["dcdr"]["features"]["rollout"], 1.0);
    }

    #[tokio::test]
    async fn test_not_modified() {
        let service = service();

        for tag in ["abcde", "\"abcde\"", "W/\"abcde\"", "other, abcde"] {
            let response = service
                .call(request(
                    Method::GET,
                    "/dcdr.json",
                    &[("if-none-match", tag), ("x-dcdr-scopes", "beta")],
                ))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_MODIFIED, "tag {tag}");
            assert_cache_headers(&response);
            assert_eq!(response.headers()[ETAG], "abcde");
            assert_eq!(response.headers()["x-dcdr-scopes"], "beta");
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert!(body.is_empty());
        }

        let response = service
            .call(request(
                Method::GET,
                "/dcdr.json",
                &[("if-none-match", "stale")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_version_never_matches() {
        let service = FeatureService::new(
            Client::new(),
            "/dcdr.json",
            "dcdr",
            HeaderName::from_static("x-dcdr-scopes"),
        );
        let response = service
            .call(request(Method::GET, "/dcdr.json", &[("if-none-match", "")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(ETAG).is_none());
        assert!(response.headers().get(LAST_MODIFIED).is_none());
        let json = body_json(response).await;
        assert_eq!(json["dcdr"]["features"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_other_routes() {
        let service = service();

        let response = service
            .call(request(Method::GET, "/other.json", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cache_headers(&response);

        let response = service
            .call(request(Method::POST, "/dcdr.json", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validators_match_body_during_installs() {
        let client = Client::new();
        let service = FeatureService::new(
            client.clone(),
            "/dcdr.json",
            "dcdr",
            HeaderName::from_static("x-dcdr-scopes"),
        );

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let done = done.clone();
            std::thread::spawn(move || {
                let mut n = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let mut fm = FeatureMap::empty("dcdr");
                    fm.insert("default", "flag", FeatureValue::Bool(n % 2 == 0));
                    fm.set_info(Info {
                        current_version: format!("v{n}"),
                        last_modified: n as i64,
                    });
                    client.install_snapshot(fm);
                    n += 1;
                }
            })
        };

        for _ in 0..2000 {
            let response = service
                .call(request(Method::GET, "/dcdr.json", &[("x-dcdr-scopes", "beta")]))
                .await
                .unwrap();
            let etag = response
                .headers()
                .get(ETAG)
                .map(|v| v.to_str().unwrap().to_string());
            let last_modified = response.headers().get(LAST_MODIFIED).cloned();

            let json = body_json(response).await;
            let version = json["dcdr"]["info"]["current_version"].as_str().map(String::from);
            assert_eq!(etag, version);
            if let Some(version) = version {
                let n: i64 = version.trim_start_matches('v').parse().unwrap();
                assert_eq!(last_modified, http_date(n));
                assert_eq!(json["dcdr"]["features"]["flag"], n % 2 == 0);
            }
        }

        done.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn test_http_date() {
        assert_eq!(
            http_date(0).unwrap(),
            "Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }
}
