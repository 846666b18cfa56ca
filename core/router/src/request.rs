//! Request and response values seen by the router.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use url::Url;

use carecache_common::{Error, Result};

/// What the requesting context intends to do with the response.
///
/// Mirrors the `Sec-Fetch-Dest` request header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Image,
    Font,
    Style,
    Script,
    /// A fetch/XHR call.
    Empty,
    Other(String),
}

impl Destination {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "style" => Destination::Style,
            "script" => Destination::Script,
            "" | "empty" => Destination::Empty,
            other => Destination::Other(other.to_string()),
        }
    }
}

/// Mirrors the `Sec-Fetch-Mode` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "no-cors" => RequestMode::NoCors,
            _ => RequestMode::Cors,
        }
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    /// A plain `GET` fetch.
    pub fn get(url: &str) -> Result<Self> {
        let url =
            Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
        Ok(Self::new(Method::GET, url))
    }

    /// A top-level page load.
    pub fn navigate(url: &str) -> Result<Self> {
        Ok(Self::get(url)?
            .with_mode(RequestMode::Navigate)
            .with_destination(Destination::Document))
    }

    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Empty,
            mode: RequestMode::Cors,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Whether this is a page load.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == Destination::Document
    }

    /// Cache key: the URL without its fragment, prefixed by the method for
    /// anything but `GET`.
    pub fn signature(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        if self.method == Method::GET {
            url.into()
        } else {
            format!("{} {}", self.method, url)
        }
    }
}

/// A response produced by the network or the cache.
///
/// `status` is a raw code so that opaque cross-origin answers (status 0)
/// can be represented.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// A `200` HTML document.
    pub fn html(body: impl Into<Bytes>) -> Self {
        Self::ok(body).with_header(header::CONTENT_TYPE, "text/html; charset=utf-8")
    }

    /// A `200` JSON document.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok(value.to_string()).with_header(header::CONTENT_TYPE, "application/json")
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    /// Only full successes and opaque answers are worth storing.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 || self.status == 0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}
