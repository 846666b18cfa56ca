//! Carecache request router
//!
//! Intercepts outbound requests and answers them from the network, from a
//! named cache partition, or from both, according to an ordered route
//! table. Router versions roll over in stages through [`RouterHost`], and
//! [`proxy`] exposes the whole thing as a local HTTP proxy.

pub mod cache;
pub mod lifecycle;
pub mod network;
pub mod proxy;
pub mod request;
pub mod route;
pub mod router;
pub mod strategy;

pub use cache::{CachePartition, CacheStorage, ExpirationPolicy};
pub use lifecycle::{ClientId, ControlMessage, ControlSender, HostStatus, InstallOutcome, RouterHost};
pub use network::{HttpNetwork, Network};
pub use proxy::ProxyConfig;
pub use request::{Destination, Request, RequestMode, Response};
pub use route::{Matcher, Route};
pub use router::{OfflineDocument, RequestRouter, RouterConfig, PRECACHE_PARTITION};
pub use strategy::Strategy;
