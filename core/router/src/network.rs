//! Outbound fetches.

use async_trait::async_trait;
use http::{header, HeaderMap};
use reqwest::Client;
use tracing::debug;

use carecache_common::{Error, Result};

use crate::request::{Request, Response};

/// Performs a request against the real network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a response. Transport failures are `Err`; any HTTP status,
    /// including errors, is an `Ok` response.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Copy headers, leaving out hop-by-hop ones.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP.iter() {
        forwarded.remove(name);
    }
    forwarded.remove("keep-alive");
    forwarded
}

/// [`Network`] backed by `reqwest`.
pub struct HttpNetwork {
    http: Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent("carecache/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!("{} {}", request.method, request.url);

        let response = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(end_to_end_headers(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{} timed out", request.url))
                } else {
                    Error::Network(format!("{} failed: {}", request.url, e))
                }
            })?;

        let status = response.status().as_u16();
        let headers = end_to_end_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read {}: {}", request.url, e)))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::HOST, "localhost:8080".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());

        let forwarded = end_to_end_headers(&headers);
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded.contains_key(header::ACCEPT));
    }

    #[tokio::test]
    async fn test_fetch_from_local_server() {
        let app = axum::Router::new().route(
            "/api/therapists",
            get(|| async { axum::Json(serde_json::json!([{"id": "t1"}])) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let network = HttpNetwork::new().unwrap();
        let request = Request::get(&format!("http://{}/api/therapists", addr)).unwrap();
        let response = network.fetch(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.text(), r#"[{"id":"t1"}]"#);

        let missing = Request::get(&format!("http://{}/nope", addr)).unwrap();
        assert_eq!(network.fetch(&missing).await.unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        let network = HttpNetwork::new().unwrap();
        let request = Request::get("http://127.0.0.1:9/").unwrap();
        assert!(matches!(
            network.fetch(&request).await,
            Err(Error::Network(_))
        ));
    }
}
