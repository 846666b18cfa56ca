//! Route predicates and the default route table.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::ExpirationPolicy;
use crate::request::{Destination, Request};
use crate::strategy::Strategy;

const DAY: u64 = 24 * 60 * 60;

/// Predicate over a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "kebab-case")]
pub enum Matcher {
    /// Exact host, e.g. `fonts.gstatic.com`.
    Origin(String),
    Destination(Destination),
    /// URL path prefix on any origin, e.g. `/api/`.
    PathPrefix(String),
    Navigation,
}

impl Matcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Matcher::Origin(host) => request
                .url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(host)),
            Matcher::Destination(destination) => &request.destination == destination,
            Matcher::PathPrefix(prefix) => request.url.path().starts_with(prefix.as_str()),
            Matcher::Navigation => request.is_navigation(),
        }
    }
}

/// One entry of the route table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub matcher: Matcher,
    pub strategy: Strategy,
    /// Cache partition this route reads and writes.
    pub partition: String,
    #[serde(default)]
    pub expiration: ExpirationPolicy,
}

impl Route {
    pub fn new(matcher: Matcher, strategy: Strategy, partition: impl Into<String>) -> Self {
        Self {
            matcher,
            strategy,
            partition: partition.into(),
            expiration: ExpirationPolicy::none(),
        }
    }

    pub fn with_expiration(mut self, expiration: ExpirationPolicy) -> Self {
        self.expiration = expiration;
        self
    }
}

/// The stock table, in match order.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new(
            Matcher::Origin("fonts.googleapis.com".to_string()),
            Strategy::StaleWhileRevalidate,
            "font-stylesheets",
        ),
        Route::new(
            Matcher::Origin("fonts.gstatic.com".to_string()),
            Strategy::CacheFirst,
            "font-files",
        )
        .with_expiration(ExpirationPolicy::new(30, Duration::from_secs(365 * DAY))),
        Route::new(
            Matcher::Origin("cdn.jsdelivr.net".to_string()),
            Strategy::StaleWhileRevalidate,
            "static-resources",
        ),
        Route::new(
            Matcher::Destination(Destination::Image),
            Strategy::CacheFirst,
            "images",
        )
        .with_expiration(ExpirationPolicy::new(60, Duration::from_secs(30 * DAY))),
        Route::new(
            Matcher::PathPrefix("/api/".to_string()),
            Strategy::network_first(Duration::from_secs(10)),
            "api-responses",
        )
        .with_expiration(ExpirationPolicy::new(50, Duration::from_secs(5 * 60))),
        Route::new(
            Matcher::Navigation,
            Strategy::NetworkFirst { timeout: None },
            "pages",
        ),
    ]
}

/// First route whose matcher accepts `request`.
pub fn match_route<'a>(routes: &'a [Route], request: &Request) -> Option<&'a Route> {
    routes.iter().find(|route| route.matcher.matches(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestMode;

    fn partition_for(request: &Request) -> Option<String> {
        match_route(&default_routes(), request).map(|r| r.partition.clone())
    }

    #[test]
    fn test_default_table_order() {
        let font_css = Request::get("https://fonts.googleapis.com/css2?family=Inter").unwrap();
        assert_eq!(partition_for(&font_css).as_deref(), Some("font-stylesheets"));

        // Origin rules win over the destination rule.
        let font_file = Request::get("https://fonts.gstatic.com/s/inter/v1/a.woff2")
            .unwrap()
            .with_destination(Destination::Font);
        assert_eq!(partition_for(&font_file).as_deref(), Some("font-files"));

        let cdn_image = Request::get("https://cdn.jsdelivr.net/npm/pkg/logo.png")
            .unwrap()
            .with_destination(Destination::Image);
        assert_eq!(partition_for(&cdn_image).as_deref(), Some("static-resources"));

        let image = Request::get("https://app.example.com/avatars/t1.png")
            .unwrap()
            .with_destination(Destination::Image);
        assert_eq!(partition_for(&image).as_deref(), Some("images"));

        let api = Request::get("https://api.example.com/api/therapists").unwrap();
        assert_eq!(partition_for(&api).as_deref(), Some("api-responses"));

        let page = Request::navigate("https://app.example.com/therapists/t1").unwrap();
        assert_eq!(partition_for(&page).as_deref(), Some("pages"));

        let script = Request::get("https://app.example.com/assets/app.js")
            .unwrap()
            .with_destination(Destination::Script)
            .with_mode(RequestMode::NoCors);
        assert_eq!(partition_for(&script), None);
    }

    #[test]
    fn test_path_prefix_requires_segment() {
        let matcher = Matcher::PathPrefix("/api/".to_string());
        assert!(!matcher.matches(&Request::get("https://x/apidocs").unwrap()));
        assert!(matcher.matches(&Request::get("https://x/api/v1").unwrap()));
    }

    #[test]
    fn test_default_expiration() {
        let routes = default_routes();
        assert_eq!(routes.len(), 6);
        assert_eq!(routes[1].expiration.max_entries, Some(30));
        assert_eq!(routes[3].expiration.max_age, Some(Duration::from_secs(30 * DAY)));
        assert_eq!(routes[4].expiration.max_age, Some(Duration::from_secs(300)));
        assert_eq!(routes[0].expiration, ExpirationPolicy::none());
    }

    #[test]
    fn test_route_serde() {
        let json = serde_json::to_value(&default_routes()[1]).unwrap();
        assert_eq!(json["matcher"]["match"], "origin");
        assert_eq!(json["matcher"]["value"], "fonts.gstatic.com");
        assert_eq!(json["strategy"]["kind"], "cache-first");

        let route: Route = serde_json::from_value(serde_json::json!({
            "matcher": {"match": "navigation"},
            "strategy": {"kind": "network-first"},
            "partition": "pages"
        }))
        .unwrap();
        assert_eq!(route.matcher, Matcher::Navigation);
    }
}
