//! Chrome DevTools Protocol message types.
//!
//! CDP frames are JSON objects over a WebSocket. Commands carry an integer
//! `id` and optionally a `sessionId` when routed to an attached target
//! (flattened session mode). Responses echo the `id`; events carry a
//! `method` and no `id`.
//!
//! Protocol reference: <https://chromedevtools.github.io/devtools-protocol/>

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// Command / Response types
// ---------------------------------------------------------------------------

/// A CDP command frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpRequest {
    pub id: u64,
    /// Domain-qualified method, e.g. `"Runtime.evaluate"`.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Target session for flattened mode; `None` addresses the browser.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CdpRequest {
    pub fn new(
        id: u64,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            session_id,
        }
    }
}

/// Reply to a command.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpError>,
    pub session_id: Option<String>,
}

/// Error object inside a failed response.
#[derive(Debug, Deserialize)]
pub struct CdpError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// Unsolicited event, e.g. `Target.targetDestroyed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub session_id: Option<String>,
}

/// Events emitted by the CDP client through its event channel.
#[derive(Debug)]
pub enum CdpClientEvent {
    /// A protocol event from the browser.
    Protocol(CdpEvent),
    /// Connection lost; attempting to reconnect.
    Reconnecting { attempt: u32, max_attempts: u32 },
    /// Reconnected. Sessions attached before the drop are gone.
    Reconnected,
    /// All reconnection attempts exhausted.
    PermanentlyDisconnected,
}

// ---------------------------------------------------------------------------
// Domain payloads
// ---------------------------------------------------------------------------

/// Entry from `Target.getTargets` / `Target.targetCreated`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// Cookie as returned by `Storage.getCookies`.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
}

/// Result of `Runtime.evaluate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub value: Option<Value>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: String,
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Best human-readable description of the thrown value.
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| self.text.clone())
    }
}

/// Response body of the `/json/version` discovery endpoint.
#[derive(Debug, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

// ---------------------------------------------------------------------------
// Parsed message discriminant
// ---------------------------------------------------------------------------

/// The result of parsing a raw CDP WebSocket text frame.
#[derive(Debug)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(CdpEvent),
    Unknown(String),
}

/// Parse a raw WebSocket text frame into a [`CdpMessage`].
///
/// Frames with a numeric `id` are responses, frames with a `method` and no
/// `id` are events, anything else is unknown.
pub fn parse_cdp_message(text: &str) -> CdpMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return CdpMessage::Unknown(text.to_string()),
    };

    let has_id = value.get("id").is_some_and(|v| v.is_u64());
    let has_method = value.get("method").is_some();

    if has_id {
        match serde_json::from_value::<CdpResponse>(value) {
            Ok(response) => CdpMessage::Response(response),
            Err(_) => CdpMessage::Unknown(text.to_string()),
        }
    } else if has_method {
        match serde_json::from_value::<CdpEvent>(value) {
            Ok(event) => CdpMessage::Event(event),
            Err(_) => CdpMessage::Unknown(text.to_string()),
        }
    } else {
        CdpMessage::Unknown(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request tracker
// ---------------------------------------------------------------------------

static CDP_REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_cdp_request_id() -> u64 {
    CDP_REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

struct PendingCdpRequest {
    response_tx: oneshot::Sender<CdpResponse>,
    created_at: Instant,
}

/// Tracks in-flight CDP commands and matches them to responses.
pub struct CdpRequestTracker {
    pending: HashMap<u64, PendingCdpRequest>,
}

impl CdpRequestTracker {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Allocate an id and register a pending slot for it.
    pub fn register(&mut self) -> (u64, oneshot::Receiver<CdpResponse>) {
        let id = next_cdp_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCdpRequest {
                response_tx: tx,
                created_at: Instant::now(),
            },
        );
        (id, rx)
    }

    /// Deliver a response. Returns `false` if nothing was waiting on `id`.
    pub fn complete(&mut self, id: u64, response: CdpResponse) -> bool {
        if let Some(pending) = self.pending.remove(&id) {
            let _ = pending.response_tx.send(response);
            true
        } else {
            false
        }
    }

    /// Drop requests pending longer than `timeout`, returning their ids.
    pub fn cleanup_stale(&mut self, timeout: Duration) -> Vec<u64> {
        let now = Instant::now();
        let stale: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, req)| now.duration_since(req.created_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.pending.remove(id);
        }
        stale
    }

    /// Drop every pending request; waiting callers observe a closed channel.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CdpRequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
