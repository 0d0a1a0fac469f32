//! Host automation surface
//!
//! The orchestration core drives a browser-like host through [`HostSurface`]:
//! open and navigate rendering surfaces, evaluate scripts inside them, read
//! cookies and group surfaces. Every operation is fallible and asynchronous.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crosspost_core::prelude::*;
use crosspost_core::{GroupToken, SurfaceRef};

/// Browser-equivalent runtime operations
///
/// Implement the `Send` variant ([`HostSurface`]) so the orchestration core can
/// drive several platforms from spawned tasks.
#[trait_variant::make(HostSurface: Send)]
pub trait LocalHostSurface {
    /// Open a new background surface at `url`
    async fn open_surface(&self, url: &str) -> Result<SurfaceRef>;

    /// Point an existing surface at `url`
    async fn navigate(&self, surface: &SurfaceRef, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression in the surface's page context
    ///
    /// Promises are awaited; the result is returned by value as JSON.
    async fn evaluate(&self, surface: &SurfaceRef, script: &str) -> Result<Value>;

    /// Value of cookie `name` as sent to `url`
    async fn read_cookie(&self, url: &str, name: &str) -> Result<Option<String>>;

    /// Every cookie the host would send to `url`
    async fn cookies_for(&self, url: &str) -> Result<Vec<Cookie>>;

    /// Open surfaces whose URL matches `url_pattern` (`*` wildcards)
    async fn query_surfaces(&self, url_pattern: &str) -> Result<Vec<SurfaceRef>>;

    /// Put `surfaces` into group `into`, or into a new group when `None`
    ///
    /// Fails with [`Error::GroupMissing`] when `into` was discarded by the host.
    async fn group_surfaces(
        &self,
        surfaces: &[SurfaceRef],
        into: Option<&GroupToken>,
    ) -> Result<GroupToken>;

    async fn group_exists(&self, group: &GroupToken) -> Result<bool>;

    async fn label_group(&self, group: &GroupToken, title: &str) -> Result<()>;

    /// Bring a surface to the foreground
    async fn focus_surface(&self, surface: &SurfaceRef) -> Result<()>;

    /// The surface currently in the foreground, if known
    async fn active_surface(&self) -> Result<Option<SurfaceRef>>;
}

/// A cookie as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: default_path(),
        }
    }

    /// Whether the host would attach this cookie to a request for `url`
    pub fn applies_to(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        domain_matches(&self.domain, host) && parsed.path().starts_with(&self.path)
    }
}

/// RFC 6265 domain matching; a leading dot allows subdomains
fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Build a `Cookie` request header value
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Match `url` against a pattern where `*` stands for any run of characters
pub fn url_matches(pattern: &str, url: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == url;
    }

    let mut rest = url;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_applies_to_subdomain_with_dot_domain() {
        let cookie = Cookie::new("SUB", "x", ".weibo.com");
        assert!(cookie.applies_to("https://card.weibo.com/article/v5/editor"));
        assert!(cookie.applies_to("https://weibo.com/"));
        assert!(!cookie.applies_to("https://notweibo.com/"));
    }

    #[test]
    fn test_host_only_cookie() {
        let cookie = Cookie::new("sid", "1", "medium.com");
        assert!(cookie.applies_to("https://medium.com/me/stats"));
        assert!(cookie.applies_to("https://www.medium.com/"));
        assert!(!cookie.applies_to("not a url"));
    }

    #[test]
    fn test_cookie_path_must_prefix() {
        let mut cookie = Cookie::new("token", "1", "example.com");
        cookie.path = "/api".to_string();
        assert!(cookie.applies_to("https://example.com/api/me"));
        assert!(!cookie.applies_to("https://example.com/home"));
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let cookies = vec![
            Cookie::new("a", "1", "x.com"),
            Cookie::new("b", "2", "x.com"),
        ];
        assert_eq!(cookie_header(&cookies), "a=1; b=2");
        assert_eq!(cookie_header(&[]), "");
    }

    #[test]
    fn test_url_matches_wildcards() {
        assert!(url_matches("https://mp.weixin.qq.com/*", "https://mp.weixin.qq.com/cgi-bin/home"));
        assert!(url_matches("https://*.alipay.com/*", "https://open.alipay.com/portal"));
        assert!(!url_matches("https://*.alipay.com/*", "https://alipay.evil.com/"));
        assert!(url_matches("https://x.com/home", "https://x.com/home"));
        assert!(!url_matches("https://x.com/home", "https://x.com/home2"));
        assert!(url_matches("*", "anything"));
    }
}
