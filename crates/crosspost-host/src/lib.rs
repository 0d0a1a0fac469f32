//! # crosspost-host - Host Adapters
//!
//! Everything the orchestration core needs from the outside world, behind
//! async traits, plus the production adapters.
//!
//! Depends on [`crosspost_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Traits
//! - [`HostSurface`] - Open, navigate, evaluate, read cookies, group and focus surfaces
//! - [`HttpFetcher`] - Authenticated HTTP requests
//! - [`KvStore`] - Durable JSON key-value storage
//!
//! ### Adapters
//! - [`CdpHost`] - Browser automation over the Chrome DevTools Protocol
//! - [`ReqwestFetcher`] - reqwest-backed fetcher
//! - [`FileKvStore`], [`MemoryKvStore`] - Storage backends
//!
//! ### Test Helpers (`test-helpers` feature)
//! - `FakeHost`, `FakeFetcher` - Scriptable in-memory fakes

pub mod cdp;
pub mod http;
pub mod store;
pub mod surface;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use cdp::CdpHost;
pub use http::{
    HttpFetcher, HttpRequest, HttpResponse, LocalHttpFetcher, ReqwestFetcher,
    DEFAULT_HTTP_TIMEOUT,
};
pub use store::{FileKvStore, KvStore, LocalKvStore, MemoryKvStore};
pub use surface::{cookie_header, url_matches, Cookie, HostSurface, LocalHostSurface};
