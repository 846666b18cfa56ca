//! Remote sources that produce the authoritative copy of a collection.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

use carecache_common::{Error, Record, Result};

/// Fetches every record of one collection from its remote owner.
///
/// A source must return an error rather than an empty list when the
/// response cannot be understood; an empty list means the collection is
/// empty upstream and replaces the local copy.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Record>>;

    /// Short description used in logs.
    fn describe(&self) -> String {
        "remote".to_string()
    }
}

/// Adapts an async closure into a [`RemoteSource`].
pub struct FnSource<F> {
    fetch: F,
}

impl<F, Fut> FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl<F, Fut> RemoteSource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Record>>> + Send + 'static,
{
    async fn fetch_all(&self) -> Result<Vec<Record>> {
        (self.fetch)().await
    }

    fn describe(&self) -> String {
        "closure".to_string()
    }
}

/// Convert a decoded response body into records.
///
/// The body must be a JSON array of objects that each carry an `id`.
pub fn records_from_json(body: Value) -> Result<Vec<Record>> {
    let Value::Array(items) = body else {
        return Err(Error::Serialization(
            "Expected a JSON array of records".to_string(),
        ));
    };
    items.into_iter().map(Record::from_value).collect()
}

/// GETs `{api_base}/{path}` and expects a JSON array of records.
pub struct HttpRemoteSource {
    http: Client,
    url: Url,
    bearer_token: Option<String>,
}

impl HttpRemoteSource {
    /// Create a source for one collection endpoint.
    ///
    /// # Errors
    /// - `api_base` is not an absolute URL
    /// - HTTP client construction failure
    pub fn new(api_base: &str, path: &str, bearer_token: Option<String>) -> Result<Self> {
        let url = Self::endpoint(api_base, path)?;
        let http = Client::builder()
            .user_agent("carecache/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url,
            bearer_token,
        })
    }

    fn endpoint(api_base: &str, path: &str) -> Result<Url> {
        let mut base = Url::parse(api_base)
            .map_err(|e| Error::InvalidInput(format!("Invalid API base '{}': {}", api_base, e)))?;
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidInput(format!("Invalid collection path '{}': {}", path, e)))
    }

    /// The endpoint this source reads from.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Vec<Record>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("GET {} returned {}: {}", self.url, status, body.trim());
            return Err(match status {
                StatusCode::NOT_FOUND => Error::NotFound(message),
                StatusCode::UNAUTHORIZED => Error::Authentication(message),
                StatusCode::FORBIDDEN => Error::PermissionDenied(message),
                // Throttling and request timeouts may clear on a later attempt.
                StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                    Error::Network(message)
                }
                s if s.is_client_error() => Error::InvalidInput(message),
                _ => Error::Network(message),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("Invalid JSON from {}: {}", self.url, e)))?;
        records_from_json(body)
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch_all(&self) -> Result<Vec<Record>> {
        debug!("GET {}", self.url);
        let mut request = self
            .http
            .get(self.url.clone())
            .header(header::ACCEPT, "application/json");

        if let Some(token) = &self.bearer_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("GET {} timed out", self.url))
            } else {
                Error::Network(format!("GET {} failed: {}", self.url, e))
            }
        })?;

        self.handle_response(response).await
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{RetryConfig, RetryExecutor};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response on a loopback port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_endpoint_join() {
        let url = HttpRemoteSource::endpoint("https://api.example.com/v1", "therapists").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/therapists");

        let url = HttpRemoteSource::endpoint("https://api.example.com/v1/", "/patients").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/patients");

        assert!(HttpRemoteSource::endpoint("not a url", "x").is_err());
    }

    #[test]
    fn test_records_from_json() {
        let records = records_from_json(json!([{"id": "t1"}, {"id": 2, "name": "B"}])).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id(), "2");

        assert!(records_from_json(json!({"data": []})).is_err());
        assert!(records_from_json(json!([{"name": "no id"}])).is_err());
        assert!(records_from_json(json!([])).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fn_source() {
        let source = FnSource::new(|| async { records_from_json(json!([{"id": "a"}])) });
        let records = source.fetch_all().await.unwrap();
        assert_eq!(records[0].id(), "a");
        assert_eq!(source.describe(), "closure");
    }

    #[tokio::test]
    async fn test_http_fetch() {
        let base = serve_once("200 OK", r#"[{"id":"t1","name":"Dr. A"}]"#).await;
        let source = HttpRemoteSource::new(&base, "therapists", Some("tok".to_string())).unwrap();

        let records = source.fetch_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some(&json!("Dr. A")));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let base = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let source = HttpRemoteSource::new(&base, "therapists", None).unwrap();

        match source.fetch_all().await {
            Err(Error::Network(msg)) => assert!(msg.contains("500")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_client_errors_are_permanent() {
        let cases = [
            ("401 Unauthorized", "auth"),
            ("403 Forbidden", "forbidden"),
            ("404 Not Found", "missing"),
            ("422 Unprocessable Entity", "invalid"),
        ];
        for (status_line, expected) in cases {
            let base = serve_once(status_line, "{}").await;
            let source = HttpRemoteSource::new(&base, "therapists", None).unwrap();
            let err = source.fetch_all().await.unwrap_err();
            assert!(!err.is_transient(), "{} should not be retried", status_line);
            match (expected, &err) {
                ("auth", Error::Authentication(_))
                | ("forbidden", Error::PermissionDenied(_))
                | ("missing", Error::NotFound(_))
                | ("invalid", Error::InvalidInput(_)) => {}
                _ => panic!("{} mapped to {:?}", status_line, err),
            }
        }

        let base = serve_once("429 Too Many Requests", "{}").await;
        let source = HttpRemoteSource::new(&base, "therapists", None).unwrap();
        assert!(source.fetch_all().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        // A second attempt would hit a closed port and fail with Network.
        let base = serve_once("404 Not Found", r#"{"error":"no such table"}"#).await;
        let source = HttpRemoteSource::new(&base, "therapists", None).unwrap();
        let retry = RetryExecutor::new(
            RetryConfig::new(2)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        let result = retry.execute(|| source.fetch_all()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_http_malformed_body_is_rejected() {
        let base = serve_once("200 OK", r#"{"not":"an array"}"#).await;
        let source = HttpRemoteSource::new(&base, "therapists", None).unwrap();

        assert!(matches!(
            source.fetch_all().await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        let source = HttpRemoteSource::new("http://127.0.0.1:9", "therapists", None).unwrap();
        assert!(matches!(source.fetch_all().await, Err(Error::Network(_))));
    }
}
