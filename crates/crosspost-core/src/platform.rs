//! Declarative platform descriptors
//!
//! Every platform is described by data: how to detect a login and how to
//! deliver content into its editor. The detection chain and the sync engine
//! interpret these descriptors; no platform gets its own code path.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::PlatformId;

/// Shortest TTL a cached detection may carry
pub const MIN_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Longest TTL a cached detection may carry
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Upper bound for any readiness wait (the host's own page-load ceiling)
pub const PAGE_LOAD_CEILING: Duration = Duration::from_secs(300);

/// Static description of one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub id: PlatformId,
    pub display_name: String,
    /// Authoring URL opened by the sync engine
    pub entry_url: String,
    pub detection: DetectionPlan,
    pub sync: SyncPlan,
}

// ─────────────────────────────────────────────────────────────────
// Detection descriptors
// ─────────────────────────────────────────────────────────────────

/// Ordered fallback chain plus caching policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPlan {
    pub strategies: Vec<DetectionStrategy>,
    /// How long a definitive login stays authoritative; `None` uses the
    /// configured default
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Report a login without profile when a session cookie exists but every
    /// later strategy was inconclusive
    #[serde(default)]
    pub assume_logged_in_with_cookie: bool,
}

impl DetectionPlan {
    pub fn new(strategies: Vec<DetectionStrategy>) -> Self {
        Self {
            strategies,
            cache_ttl_secs: None,
            assume_logged_in_with_cookie: false,
        }
    }

    pub fn ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    pub fn assume_logged_in_with_cookie(mut self) -> Self {
        self.assume_logged_in_with_cookie = true;
        self
    }

    /// Cache TTL clamped to the supported 1 hour .. 7 days range
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(MIN_CACHE_TTL)
            .clamp(MIN_CACHE_TTL, MAX_CACHE_TTL)
    }

    /// First cookie probe of the chain, used as the default liveness check
    pub fn first_cookie_probe(&self) -> Option<&CookieProbe> {
        self.strategies.iter().find_map(|s| match s {
            DetectionStrategy::CookiePresence(probe) => Some(probe),
            _ => None,
        })
    }

    /// Cookie check confirming a cache hit: the one on `CacheLookup`, else
    /// the chain's first cookie step. `None` means cached results are never
    /// served.
    pub fn liveness_check(&self) -> Option<&CookieProbe> {
        self.strategies
            .iter()
            .find_map(|s| match s {
                DetectionStrategy::CacheLookup { liveness } => liveness.as_ref(),
                _ => None,
            })
            .or_else(|| self.first_cookie_probe())
    }

    pub fn has_cache_lookup(&self) -> bool {
        self.strategies
            .iter()
            .any(|s| matches!(s, DetectionStrategy::CacheLookup { .. }))
    }
}

/// One resolver in the detection chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Consult the result cache, confirmed by a cheap cookie liveness probe
    CacheLookup {
        #[serde(default)]
        liveness: Option<CookieProbe>,
    },
    CookiePresence(CookieProbe),
    AuthenticatedApiCall(ApiProbe),
    RenderedSurfaceQuery(SurfaceProbe),
    HtmlScrape(ScrapeProbe),
}

impl DetectionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            DetectionStrategy::CacheLookup { .. } => "cache_lookup",
            DetectionStrategy::CookiePresence(_) => "cookie_presence",
            DetectionStrategy::AuthenticatedApiCall(_) => "authenticated_api_call",
            DetectionStrategy::RenderedSurfaceQuery(_) => "rendered_surface_query",
            DetectionStrategy::HtmlScrape(_) => "html_scrape",
        }
    }

    /// Whether running this strategy issues network traffic
    pub fn uses_network(&self) -> bool {
        matches!(
            self,
            DetectionStrategy::AuthenticatedApiCall(_) | DetectionStrategy::HtmlScrape(_)
        )
    }
}

/// Named session cookies on one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieProbe {
    /// URL whose cookie jar is inspected (e.g. `https://www.csdn.net`)
    pub url: String,
    /// Any one of these being present counts as a session
    pub names: Vec<String>,
    /// Cookie holding a percent-encoded display name
    #[serde(default)]
    pub username_cookie: Option<String>,
}

impl CookieProbe {
    pub fn new(url: impl Into<String>, names: &[&str]) -> Self {
        Self {
            url: url.into(),
            names: names.iter().map(|n| n.to_string()).collect(),
            username_cookie: None,
        }
    }

    pub fn username_from(mut self, cookie: impl Into<String>) -> Self {
        self.username_cookie = Some(cookie.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// How a response body is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    #[default]
    Json,
    Html,
}

/// Credentialed request to a platform endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiProbe {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub response: ResponseKind,
    /// Cookie whose value is sent as `Authorization: Bearer <value>`
    #[serde(default)]
    pub bearer_cookie: Option<String>,
    /// Redirect targets that mean "not logged in"
    #[serde(default)]
    pub reject_final_url: Vec<String>,
    pub login: LoginPredicate,
    #[serde(default)]
    pub profile: ProfileExtractor,
}

impl ApiProbe {
    pub fn get(url: impl Into<String>, login: LoginPredicate, profile: ProfileExtractor) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            body: None,
            headers: Vec::new(),
            response: ResponseKind::Json,
            bearer_cookie: None,
            reject_final_url: Vec::new(),
            login,
            profile,
        }
    }

    pub fn post(mut self, body: impl Into<String>) -> Self {
        self.method = HttpMethod::Post;
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.bearer_cookie = Some(cookie.into());
        self
    }

    pub fn html(mut self) -> Self {
        self.response = ResponseKind::Html;
        self
    }

    pub fn reject_final_url(mut self, needle: impl Into<String>) -> Self {
        self.reject_final_url.push(needle.into());
        self
    }
}

/// Script evaluated inside an already-open surface of the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceProbe {
    /// URL pattern of candidate surfaces; `*` matches any run of characters
    pub url_pattern: String,
    /// JavaScript expression producing a JSON value (may be a promise)
    pub script: String,
    pub login: LoginPredicate,
    #[serde(default)]
    pub profile: ProfileExtractor,
}

/// Page fetch plus regex extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeProbe {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Text that only appears on the logged-out page
    #[serde(default)]
    pub logged_out_markers: Vec<String>,
    /// Text that proves a session even when no username can be extracted
    #[serde(default)]
    pub logged_in_markers: Vec<String>,
    /// Redirect targets that mean "not logged in"
    #[serde(default)]
    pub reject_final_url: Vec<String>,
    /// Regexes whose first capture group is the username
    #[serde(default)]
    pub username: Vec<String>,
    /// Regexes whose first capture group is the avatar URL
    #[serde(default)]
    pub avatar: Vec<String>,
}

/// Declarative login predicate over a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LoginPredicate {
    /// Value at `path` exists and is truthy
    Truthy { path: String },
    /// Value at `path` equals `value`
    Equals { path: String, value: Value },
    All { of: Vec<LoginPredicate> },
    Any { of: Vec<LoginPredicate> },
    Not { predicate: Box<LoginPredicate> },
    /// Raw body text contains `needle`
    BodyContains { needle: String },
}

impl LoginPredicate {
    pub fn truthy(path: impl Into<String>) -> Self {
        Self::Truthy { path: path.into() }
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn all(of: Vec<LoginPredicate>) -> Self {
        Self::All { of }
    }

    pub fn any(of: Vec<LoginPredicate>) -> Self {
        Self::Any { of }
    }
}

/// Where to find the username and avatar in a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileExtractor {
    #[serde(default)]
    pub username: Vec<FieldSource>,
    #[serde(default)]
    pub avatar: Vec<FieldSource>,
}

impl ProfileExtractor {
    /// Extractor reading JSON paths; the first non-empty match wins
    pub fn paths(username: &[&str], avatar: &[&str]) -> Self {
        Self {
            username: username.iter().map(|p| FieldSource::path(*p)).collect(),
            avatar: avatar.iter().map(|p| FieldSource::path(*p)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.avatar.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum FieldSource {
    /// Dotted JSON path, numeric segments index arrays (`user.avatar.url_list.0`)
    Path { path: String },
    /// Regex over the raw body; capture group 1 is the value
    Pattern { regex: String },
}

impl FieldSource {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        Self::Pattern {
            regex: regex.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Sync descriptors
// ─────────────────────────────────────────────────────────────────

/// How content reaches the platform's editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub strategy: SyncStrategy,
    #[serde(default)]
    pub readiness: ReadinessSignal,
    /// Policy steps run in order before the injection strategy
    #[serde(default)]
    pub pre_steps: Vec<PolicyStep>,
    /// The editor only renders while its surface is in the foreground
    #[serde(default)]
    pub requires_focus: bool,
}

impl SyncPlan {
    pub fn new(strategy: SyncStrategy, readiness: ReadinessSignal) -> Self {
        Self {
            strategy,
            readiness,
            pre_steps: Vec::new(),
            requires_focus: false,
        }
    }

    pub fn steps(mut self, steps: Vec<PolicyStep>) -> Self {
        self.pre_steps = steps;
        self
    }

    pub fn focused(mut self) -> Self {
        self.requires_focus = true;
        self
    }
}

/// Selectors of the title field and the body editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorTargets {
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
}

impl EditorTargets {
    pub fn new(title: Option<&str>, body: &str) -> Self {
        Self {
            title: title.map(str::to_string),
            body: body.to_string(),
        }
    }
}

/// Which representation a value-set editor expects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    #[default]
    Markdown,
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncStrategy {
    NativeValueSet {
        targets: EditorTargets,
        #[serde(default)]
        format: BodyFormat,
    },
    ClipboardPasteSimulation {
        targets: EditorTargets,
    },
    /// Create a draft through the platform API, then fill it in place
    StructuredApiCreate {
        calls: Vec<ApiCall>,
        /// Edit URL template filled from the calls' captures
        edit_url: String,
        then: Box<SyncStrategy>,
    },
    FileImport {
        /// `input[type=file]` receiving the virtual document
        input: String,
        #[serde(default)]
        drop_target: Option<String>,
        /// Element whose content proves the import landed
        verify: String,
    },
}

impl SyncStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SyncStrategy::NativeValueSet { .. } => "native_value_set",
            SyncStrategy::ClipboardPasteSimulation { .. } => "clipboard_paste_simulation",
            SyncStrategy::StructuredApiCreate { .. } => "structured_api_create",
            SyncStrategy::FileImport { .. } => "file_import",
        }
    }
}

/// One request of a draft-creation sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    /// URL template, `{name}` placeholders are percent-encoded
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// JSON body template, `{name}` placeholders are JSON-escaped
    #[serde(default)]
    pub body: Option<String>,
    /// Values captured from the JSON response as `(name, path)`
    #[serde(default)]
    pub captures: Vec<(String, String)>,
    /// Response must satisfy this predicate for the call to count
    #[serde(default)]
    pub require: Option<LoginPredicate>,
}

/// Condition signalling that the editor has initialized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadinessSignal {
    /// CSS selector that must match
    #[serde(default)]
    pub selector: Option<String>,
    /// Dotted path on `window` that must be defined (e.g. `wx.data`)
    #[serde(default)]
    pub global: Option<String>,
    /// Per-platform readiness budget override
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Per-platform settle delay override
    #[serde(default)]
    pub settle_ms: Option<u64>,
}

impl ReadinessSignal {
    pub fn selector(selector: &str) -> Self {
        Self {
            selector: Some(selector.to_string()),
            ..Default::default()
        }
    }

    pub fn global(path: &str) -> Self {
        Self {
            global: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn settle_ms(mut self, ms: u64) -> Self {
        self.settle_ms = Some(ms);
        self
    }

    /// Readiness budget: override or default, never beyond the page-load ceiling
    pub fn budget(&self, default: Duration) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
            .min(PAGE_LOAD_CEILING)
    }
}

/// Platform-specific step executed before injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PolicyStep {
    /// Click the first element matching `selector` (and containing `text`),
    /// doing nothing when none is present
    ClickIfPresent {
        selector: String,
        #[serde(default)]
        text: Option<String>,
    },
    /// Wait for a dialog and click the button whose label contains one of `buttons`
    ConfirmDialog {
        container: String,
        buttons: Vec<String>,
        #[serde(default = "default_step_timeout_ms")]
        timeout_ms: u64,
    },
    /// Wait until `selector` matches
    WaitFor {
        selector: String,
        #[serde(default = "default_step_timeout_ms")]
        timeout_ms: u64,
    },
    Delay {
        ms: u64,
    },
}

fn default_step_timeout_ms() -> u64 {
    5_000
}

impl PolicyStep {
    pub fn click(selector: &str, text: Option<&str>) -> Self {
        Self::ClickIfPresent {
            selector: selector.to_string(),
            text: text.map(str::to_string),
        }
    }

    pub fn confirm(container: &str, buttons: &[&str]) -> Self {
        Self::ConfirmDialog {
            container: container.to_string(),
            buttons: buttons.iter().map(|b| b.to_string()).collect(),
            timeout_ms: default_step_timeout_ms(),
        }
    }

    pub fn wait_for(selector: &str) -> Self {
        Self::WaitFor {
            selector: selector.to_string(),
            timeout_ms: default_step_timeout_ms(),
        }
    }

    pub fn delay(ms: u64) -> Self {
        Self::Delay { ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_ttl_is_clamped() {
        assert_eq!(DetectionPlan::new(vec![]).cache_ttl(), MIN_CACHE_TTL);

        let plan = DetectionPlan::new(vec![]).ttl_secs(10);
        assert_eq!(plan.cache_ttl(), MIN_CACHE_TTL);

        let plan = DetectionPlan::new(vec![]).ttl_secs(30 * 24 * 60 * 60);
        assert_eq!(plan.cache_ttl(), MAX_CACHE_TTL);

        let plan = DetectionPlan::new(vec![]).ttl_secs(6 * 60 * 60);
        assert_eq!(plan.cache_ttl(), Duration::from_secs(6 * 60 * 60));
    }

    #[test]
    fn test_first_cookie_probe_skips_other_strategies() {
        let plan = DetectionPlan::new(vec![
            DetectionStrategy::CacheLookup { liveness: None },
            DetectionStrategy::CookiePresence(CookieProbe::new("https://a.example", &["sid"])),
            DetectionStrategy::CookiePresence(CookieProbe::new("https://b.example", &["x"])),
        ]);
        assert_eq!(plan.first_cookie_probe().unwrap().url, "https://a.example");
    }

    #[test]
    fn test_liveness_check_prefers_explicit_cookie() {
        let plan = DetectionPlan::new(vec![
            DetectionStrategy::CacheLookup {
                liveness: Some(CookieProbe::new("https://live.example", &["token"])),
            },
            DetectionStrategy::CookiePresence(CookieProbe::new("https://a.example", &["sid"])),
        ]);
        assert_eq!(plan.liveness_check().unwrap().url, "https://live.example");

        let plan = DetectionPlan::new(vec![
            DetectionStrategy::CacheLookup { liveness: None },
            DetectionStrategy::CookiePresence(CookieProbe::new("https://a.example", &["sid"])),
        ]);
        assert_eq!(plan.liveness_check().unwrap().url, "https://a.example");
    }

    #[test]
    fn test_liveness_check_absent_without_cookies() {
        let plan = DetectionPlan::new(vec![DetectionStrategy::CacheLookup { liveness: None }]);
        assert!(plan.has_cache_lookup());
        assert!(plan.liveness_check().is_none());
    }

    #[test]
    fn test_readiness_budget_respects_ceiling() {
        let default = Duration::from_secs(12);
        assert_eq!(ReadinessSignal::default().budget(default), default);
        assert_eq!(
            ReadinessSignal::default().timeout_ms(20_000).budget(default),
            Duration::from_secs(20)
        );
        assert_eq!(
            ReadinessSignal::default()
                .timeout_ms(900_000)
                .budget(default),
            PAGE_LOAD_CEILING
        );
    }

    #[test]
    fn test_strategy_serde_is_tagged() {
        let strategy = DetectionStrategy::CookiePresence(
            CookieProbe::new("https://sspai.com", &["sspai_jwt_token"]),
        );
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["kind"], "cookie_presence");
        assert_eq!(json["names"][0], "sspai_jwt_token");

        let back: DetectionStrategy = serde_json::from_value(json).unwrap();
        assert_eq!(back, strategy);
    }

    #[test]
    fn test_uses_network() {
        let api = DetectionStrategy::AuthenticatedApiCall(ApiProbe::get(
            "https://example.com/me",
            LoginPredicate::truthy("id"),
            ProfileExtractor::default(),
        ));
        assert!(api.uses_network());
        assert!(!DetectionStrategy::CacheLookup { liveness: None }.uses_network());
    }

    #[test]
    fn test_policy_step_defaults() {
        let step: PolicyStep =
            serde_json::from_str(r#"{"step":"wait_for","selector":".editor"}"#).unwrap();
        assert_eq!(step, PolicyStep::wait_for(".editor"));
    }
}
