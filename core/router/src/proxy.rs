//! Local HTTP proxy that puts a [`RouterHost`] in front of an upstream origin.
//!
//! Every request that is not a control endpoint is rewritten onto the
//! upstream origin and answered by the host. Fetch metadata is read from
//! `Sec-Fetch-Dest` and `Sec-Fetch-Mode`; the optional `x-carecache-client`
//! header selects a client opened through `/__carecache/clients`.

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Request as HttpRequest, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response as HttpResponse},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use carecache_common::{Error, Result};

use crate::lifecycle::{ClientId, ControlMessage, ControlSender, RouterHost};
use crate::network::end_to_end_headers;
use crate::request::{Destination, Request, RequestMode, Response};

/// Header naming the client a request belongs to.
pub const CLIENT_HEADER: &str = "x-carecache-client";

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    /// Origin requests are forwarded to.
    pub upstream: Url,
}

struct ProxyState {
    host: Arc<RouterHost>,
    control: ControlSender,
    upstream: Url,
    /// Client used when a request names none.
    default_client: ClientId,
}

/// Build the proxy application.
///
/// Opens the default client, so requests without a client header are
/// controlled by whichever router is active at this point.
pub async fn app(host: Arc<RouterHost>, upstream: Url) -> Router {
    let default_client = host.open_client().await;
    let control = host.control_channel();
    let state = Arc::new(ProxyState {
        host,
        control,
        upstream,
        default_client,
    });

    Router::new()
        .route("/__carecache/skip-waiting", post(skip_waiting))
        .route("/__carecache/claim", post(claim))
        .route("/__carecache/status", get(status))
        .route("/__carecache/clients", post(open_client))
        .route("/__carecache/clients/{id}", delete(close_client))
        .fallback(forward)
        .with_state(state)
}

/// Serve the proxy until the listener fails.
pub async fn serve(host: Arc<RouterHost>, config: ProxyConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen).await?;
    info!(
        "Proxy listening on {} (upstream {})",
        listener.local_addr()?,
        config.upstream
    );
    let app = app(host, config.upstream).await;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn skip_waiting(State(state): State<Arc<ProxyState>>) -> HttpResponse {
    match state.control.send(ControlMessage::SkipWaiting).await {
        Ok(activated) => Json(json!({ "activated": activated > 0 })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn claim(State(state): State<Arc<ProxyState>>) -> HttpResponse {
    match state.control.send(ControlMessage::ClaimClients).await {
        Ok(claimed) => Json(json!({ "claimed": claimed })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn status(State(state): State<Arc<ProxyState>>) -> HttpResponse {
    Json(state.host.status().await).into_response()
}

async fn open_client(State(state): State<Arc<ProxyState>>) -> HttpResponse {
    let id = state.host.open_client().await;
    (StatusCode::CREATED, Json(json!({ "client": id }))).into_response()
}

async fn close_client(
    State(state): State<Arc<ProxyState>>,
    Path(id): Path<Uuid>,
) -> HttpResponse {
    if state.host.close_client(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn resolve_client(state: &ProxyState, headers: &HeaderMap) -> ClientId {
    if let Some(id) = header_str(headers, CLIENT_HEADER).and_then(|v| Uuid::parse_str(v).ok()) {
        if state.host.has_client(id).await {
            return id;
        }
    }
    state.default_client
}

async fn forward(State(state): State<Arc<ProxyState>>, request: HttpRequest) -> HttpResponse {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let url = upstream_url(&state.upstream, &parts.uri);

    let destination = header_str(&parts.headers, "sec-fetch-dest")
        .map(Destination::parse)
        .unwrap_or(Destination::Empty);
    let mode = header_str(&parts.headers, "sec-fetch-mode")
        .map(RequestMode::parse)
        .unwrap_or(RequestMode::Cors);
    let client = resolve_client(&state, &parts.headers).await;

    let mut headers = parts.headers;
    headers.remove(CLIENT_HEADER);

    debug!("{} {} ({:?}, {:?})", parts.method, url, destination, mode);
    let request = Request::new(parts.method, url)
        .with_destination(destination)
        .with_mode(mode)
        .with_headers(headers)
        .with_body(body);

    match state.host.handle(client, &request).await {
        Ok(response) => into_http(response),
        Err(Error::Timeout(message)) => (StatusCode::GATEWAY_TIMEOUT, message).into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

/// Rewrite a request target onto the upstream origin.
///
/// The target's path is appended to the upstream path, so the host always
/// stays the upstream's, even for targets such as `//other.host/x`.
fn upstream_url(upstream: &Url, target: &Uri) -> Url {
    let mut url = upstream.clone();
    let prefix = upstream.path().trim_end_matches('/');
    url.set_path(&format!("{}{}", prefix, target.path()));
    url.set_query(target.query());
    url
}

fn into_http(response: Response) -> HttpResponse {
    // Opaque answers carry no usable status.
    let status = match response.status {
        0 => StatusCode::OK,
        code => StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
    };
    let mut out = HttpResponse::new(Body::from(response.body));
    *out.status_mut() = status;
    *out.headers_mut() = end_to_end_headers(&response.headers);
    out
}
