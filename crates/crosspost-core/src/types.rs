//! Core domain types shared by detection and sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key of a platform in the registry (e.g. `"juejin"`)
pub type PlatformId = String;

// ─────────────────────────────────────────────────────────────────
// Host handles
// ─────────────────────────────────────────────────────────────────

/// Opaque handle to a rendering surface (a browser tab or equivalent)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceRef(pub String);

impl SurfaceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SurfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle to a host-side group of surfaces
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupToken(pub String);

impl GroupToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Detection
// ─────────────────────────────────────────────────────────────────

/// Login state of one platform as observed at `observed_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl DetectionResult {
    /// A confirmed login, with whatever profile information was found
    pub fn logged_in(username: Option<String>, avatar_ref: Option<String>) -> Self {
        Self {
            logged_in: true,
            username: non_empty(username),
            avatar_ref: non_empty(avatar_ref),
            error: None,
            observed_at: Utc::now(),
        }
    }

    pub fn logged_out() -> Self {
        Self {
            logged_in: false,
            username: None,
            avatar_ref: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    /// Not logged in as far as we can tell, with the reason detection failed
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::logged_out()
        }
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// Fill missing profile fields from `other`
    pub fn merge_profile(mut self, other: &DetectionResult) -> Self {
        if self.username.is_none() {
            self.username = other.username.clone();
        }
        if self.avatar_ref.is_none() {
            self.avatar_ref = other.avatar_ref.clone();
        }
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Tri-state answer of a detection strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Definitive: the user is logged in
    LoggedIn(DetectionResult),
    /// Definitive: the user is logged out
    LoggedOut(DetectionResult),
    /// No assertion can be made; defer to the next strategy or the cache
    Inconclusive { reason: String },
}

impl Detection {
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self::Inconclusive {
            reason: reason.into(),
        }
    }

    pub fn logged_out() -> Self {
        Self::LoggedOut(DetectionResult::logged_out())
    }

    pub fn is_definitive(&self) -> bool {
        !matches!(self, Detection::Inconclusive { .. })
    }

    /// Short label used in logs and events
    pub fn label(&self) -> &'static str {
        match self {
            Detection::LoggedIn(_) => "logged_in",
            Detection::LoggedOut(_) => "logged_out",
            Detection::Inconclusive { .. } => "inconclusive",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Content
// ─────────────────────────────────────────────────────────────────

/// Content handed to the sync engine by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPayload {
    pub title: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub body_markdown: Option<String>,
    #[serde(default)]
    pub rich_clipboard_html: Option<String>,
}

impl ContentPayload {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.body_markdown = Some(markdown.into());
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    pub fn with_clipboard_html(mut self, html: impl Into<String>) -> Self {
        self.rich_clipboard_html = Some(html.into());
        self
    }

    /// Plain text for value-set editors: markdown first, then HTML
    pub fn plain_body(&self) -> &str {
        self.body_markdown
            .as_deref()
            .or(self.body_html.as_deref())
            .unwrap_or("")
    }

    /// Rich representation for paste simulation
    pub fn paste_html(&self) -> &str {
        self.rich_clipboard_html
            .as_deref()
            .or(self.body_html.as_deref())
            .unwrap_or_else(|| self.plain_body())
    }

    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.plain_body().trim().is_empty()
    }

    /// File name used when a platform imports the content as a document
    pub fn import_file_name(&self) -> String {
        let sanitized: String = self
            .title
            .trim()
            .chars()
            .map(|c| match c {
                '\\' | '/' | ':' | '：' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect();
        if sanitized.is_empty() {
            "untitled.md".to_string()
        } else {
            format!("{sanitized}.md")
        }
    }
}
