//! [`HostSurface`] over a DevTools-enabled browser.
//!
//! Surfaces are page targets. Commands for a page go through a flattened
//! session attached on first use. Tab groups are not part of the protocol,
//! so groups are tracked on this side and dissolve when their last member
//! target is destroyed, mirroring how a browser discards an empty group.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crosspost_core::prelude::*;
use crosspost_core::{GroupToken, SurfaceRef};

use super::client::{CdpClient, CdpHandle};
use super::protocol::{BrowserVersion, CdpClientEvent, CdpCookie, EvaluateResult, TargetInfo};
use crate::surface::{url_matches, Cookie, HostSurface};

#[derive(Debug, Default)]
struct GroupRecord {
    title: Option<String>,
    members: HashSet<String>,
}

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Browser host driven over the Chrome DevTools Protocol
#[derive(Debug, Clone)]
pub struct CdpHost {
    handle: CdpHandle,
    /// target id -> flattened session id
    sessions: Shared<HashMap<String, String>>,
    groups: Shared<HashMap<GroupToken, GroupRecord>>,
    next_group: Arc<AtomicU64>,
}

impl CdpHost {
    /// Connect to a browser
    ///
    /// `devtools_url` is either a `ws://` browser endpoint or an HTTP base
    /// such as `http://127.0.0.1:9222`, resolved through `/json/version`.
    pub async fn connect(devtools_url: &str) -> Result<Self> {
        let ws_url = resolve_ws_url(devtools_url).await?;
        let client = CdpClient::connect(&ws_url).await?;
        let (handle, event_rx) = client.into_parts();

        let host = Self {
            handle,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            groups: Arc::new(Mutex::new(HashMap::new())),
            next_group: Arc::new(AtomicU64::new(1)),
        };

        tokio::spawn(run_event_task(
            event_rx,
            Arc::clone(&host.sessions),
            Arc::clone(&host.groups),
        ));

        Ok(host)
    }

    pub fn handle(&self) -> &CdpHandle {
        &self.handle
    }

    pub fn group_title(&self, group: &GroupToken) -> Option<String> {
        lock(&self.groups).get(group).and_then(|g| g.title.clone())
    }

    async fn session_for(&self, surface: &SurfaceRef) -> Result<String> {
        if let Some(session) = lock(&self.sessions).get(surface.as_str()) {
            return Ok(session.clone());
        }

        let result = self
            .handle
            .send(
                "Target.attachToTarget",
                Some(json!({ "targetId": surface.as_str(), "flatten": true })),
            )
            .await
            .map_err(|e| missing_target(surface, e))?;

        let session = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("attachToTarget returned no sessionId"))?
            .to_string();

        debug!("Attached to {} as session {}", surface, session);
        lock(&self.sessions).insert(surface.as_str().to_string(), session.clone());
        Ok(session)
    }

    async fn send_to_surface(
        &self,
        surface: &SurfaceRef,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let session = self.session_for(surface).await?;
        match self
            .handle
            .send_to(method, Some(params.clone()), Some(&session))
            .await
        {
            Err(Error::Protocol { message }) if message.contains("ession") => {
                // Stale session, e.g. after a renderer swap
                debug!("Reattaching to {} after: {}", surface, message);
                lock(&self.sessions).remove(surface.as_str());
                let session = self.session_for(surface).await?;
                self.handle.send_to(method, Some(params), Some(&session)).await
            }
            other => other,
        }
    }

    async fn targets(&self) -> Result<Vec<TargetInfo>> {
        let result = self.handle.send("Target.getTargets", None).await?;
        let infos = result.get("targetInfos").cloned().unwrap_or(Value::Null);
        serde_json::from_value(infos)
            .map_err(|e| Error::protocol(format!("parse getTargets response: {e}")))
    }
}

fn missing_target(surface: &SurfaceRef, err: Error) -> Error {
    match err {
        Error::Protocol { ref message } if message.contains("No target") => {
            Error::surface_not_found(surface.as_str())
        }
        other => other,
    }
}

impl HostSurface for CdpHost {
    async fn open_surface(&self, url: &str) -> Result<SurfaceRef> {
        let result = self
            .handle
            .send(
                "Target.createTarget",
                Some(json!({ "url": url, "background": true })),
            )
            .await?;
        let target_id = result
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("createTarget returned no targetId"))?;
        info!("Opened surface {} at {}", target_id, url);
        Ok(SurfaceRef::new(target_id))
    }

    async fn navigate(&self, surface: &SurfaceRef, url: &str) -> Result<()> {
        let session = self.session_for(surface).await?;
        let result = self
            .handle
            .send_to("Page.navigate", Some(json!({ "url": url })), Some(&session))
            .await
            .map_err(|e| missing_target(surface, e))?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            return Err(Error::host(format!("Navigation to {url} failed: {error_text}")));
        }
        Ok(())
    }

    async fn evaluate(&self, surface: &SurfaceRef, script: &str) -> Result<Value> {
        let result = self
            .send_to_surface(
                surface,
                "Runtime.evaluate",
                json!({
                    "expression": script,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await
            .map_err(|e| missing_target(surface, e))?;

        let evaluated: EvaluateResult = serde_json::from_value(result)
            .map_err(|e| Error::protocol(format!("parse evaluate response: {e}")))?;
        if let Some(details) = evaluated.exception_details {
            return Err(Error::script(details.message()));
        }
        Ok(evaluated.result.value.unwrap_or(Value::Null))
    }

    async fn read_cookie(&self, url: &str, name: &str) -> Result<Option<String>> {
        let cookies = self.cookies_for(url).await?;
        Ok(cookies.into_iter().find(|c| c.name == name).map(|c| c.value))
    }

    async fn cookies_for(&self, url: &str) -> Result<Vec<Cookie>> {
        let result = self.handle.send("Storage.getCookies", None).await?;
        let raw = result.get("cookies").cloned().unwrap_or(Value::Null);
        let cookies: Vec<CdpCookie> = serde_json::from_value(raw)
            .map_err(|e| Error::protocol(format!("parse getCookies response: {e}")))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: if c.path.is_empty() { "/".to_string() } else { c.path },
            })
            .filter(|c| c.applies_to(url))
            .collect())
    }

    async fn query_surfaces(&self, url_pattern: &str) -> Result<Vec<SurfaceRef>> {
        Ok(self
            .targets()
            .await?
            .into_iter()
            .filter(|t| t.is_page() && url_matches(url_pattern, &t.url))
            .map(|t| SurfaceRef::new(t.target_id))
            .collect())
    }

    async fn group_surfaces(
        &self,
        surfaces: &[SurfaceRef],
        into: Option<&GroupToken>,
    ) -> Result<GroupToken> {
        let mut groups = lock(&self.groups);
        let token = match into {
            Some(token) => {
                if !groups.contains_key(token) {
                    return Err(Error::group_missing(token.as_str()));
                }
                token.clone()
            }
            None => {
                let n = self.next_group.fetch_add(1, Ordering::SeqCst);
                let token = GroupToken::new(format!("group-{n}"));
                groups.insert(token.clone(), GroupRecord::default());
                token
            }
        };

        if let Some(record) = groups.get_mut(&token) {
            record
                .members
                .extend(surfaces.iter().map(|s| s.as_str().to_string()));
        }
        Ok(token)
    }

    async fn group_exists(&self, group: &GroupToken) -> Result<bool> {
        Ok(lock(&self.groups).contains_key(group))
    }

    async fn label_group(&self, group: &GroupToken, title: &str) -> Result<()> {
        match lock(&self.groups).get_mut(group) {
            Some(record) => {
                record.title = Some(title.to_string());
                Ok(())
            }
            None => Err(Error::group_missing(group.as_str())),
        }
    }

    async fn focus_surface(&self, surface: &SurfaceRef) -> Result<()> {
        self.handle
            .send(
                "Target.activateTarget",
                Some(json!({ "targetId": surface.as_str() })),
            )
            .await
            .map_err(|e| missing_target(surface, e))?;
        Ok(())
    }

    async fn active_surface(&self) -> Result<Option<SurfaceRef>> {
        for target in self.targets().await?.into_iter().filter(TargetInfo::is_page) {
            let surface = SurfaceRef::new(target.target_id);
            match self
                .evaluate(&surface, "document.visibilityState === 'visible'")
                .await
            {
                Ok(Value::Bool(true)) => return Ok(Some(surface)),
                Ok(_) => {}
                Err(e) => trace!("Skipping {} while looking for active surface: {}", surface, e),
            }
        }
        Ok(None)
    }
}

/// Keep session and group bookkeeping in step with target lifecycle events
async fn run_event_task(
    mut event_rx: mpsc::Receiver<CdpClientEvent>,
    sessions: Shared<HashMap<String, String>>,
    groups: Shared<HashMap<GroupToken, GroupRecord>>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            CdpClientEvent::Protocol(event) => match event.method.as_str() {
                "Target.targetDestroyed" => {
                    if let Some(target_id) = event.params.get("targetId").and_then(Value::as_str)
                    {
                        forget_target(target_id, &sessions, &groups);
                    }
                }
                "Target.detachedFromTarget" => {
                    if let Some(session_id) =
                        event.params.get("sessionId").and_then(Value::as_str)
                    {
                        lock(&sessions).retain(|_, s| s != session_id);
                    }
                }
                _ => {}
            },
            CdpClientEvent::Reconnecting { attempt, max_attempts } => {
                debug!("Browser connection retry {}/{}", attempt, max_attempts);
            }
            CdpClientEvent::Reconnected => {
                lock(&sessions).clear();
                info!("Browser connection restored; sessions will reattach");
            }
            CdpClientEvent::PermanentlyDisconnected => {
                warn!("Browser connection lost for good");
                lock(&sessions).clear();
                lock(&groups).clear();
            }
        }
    }
    debug!("CDP host event task exiting");
}

fn forget_target(
    target_id: &str,
    sessions: &Mutex<HashMap<String, String>>,
    groups: &Mutex<HashMap<GroupToken, GroupRecord>>,
) {
    lock(sessions).remove(target_id);
    let mut groups = lock(groups);
    for record in groups.values_mut() {
        record.members.remove(target_id);
    }
    groups.retain(|token, record| {
        let keep = !record.members.is_empty();
        if !keep {
            debug!("Group {} dissolved with its last surface", token);
        }
        keep
    });
}

/// Resolve the browser WebSocket endpoint
async fn resolve_ws_url(devtools_url: &str) -> Result<String> {
    if devtools_url.starts_with("ws://") || devtools_url.starts_with("wss://") {
        return Ok(devtools_url.to_string());
    }

    let version_url = format!("{}/json/version", devtools_url.trim_end_matches('/'));
    debug!("Discovering DevTools endpoint via {}", version_url);
    let response = reqwest::get(&version_url)
        .await
        .map_err(|e| Error::host(format!("DevTools discovery at {version_url} failed: {e}")))?;
    let version: BrowserVersion = response
        .json()
        .await
        .map_err(|e| Error::host(format!("Invalid /json/version response: {e}")))?;
    info!("Found {} at {}", version.browser, version.web_socket_debugger_url);
    Ok(version.web_socket_debugger_url)
}
