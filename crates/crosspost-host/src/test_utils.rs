//! Scriptable fakes for exercising the orchestration core without a browser
//!
//! [`FakeHost`] answers script evaluations by marker substring and records
//! every interaction. [`FakeFetcher`] routes requests by URL prefix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crosspost_core::prelude::*;
use crosspost_core::{GroupToken, SurfaceRef};

use crate::http::{HttpFetcher, HttpRequest, HttpResponse};
use crate::surface::{url_matches, Cookie, HostSurface};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

/// What an evaluation returns
#[derive(Debug, Clone)]
pub enum ScriptReply {
    Value(Value),
    Error(String),
    /// Never resolves
    Hang,
    /// Panics the evaluating task
    Panic,
}

impl ScriptReply {
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }
}

#[derive(Debug)]
struct Responder {
    url_contains: Option<String>,
    marker: String,
    /// The last reply repeats once the sequence is exhausted
    replies: Vec<ScriptReply>,
    calls: usize,
}

#[derive(Debug, Clone)]
struct FakeSurface {
    surface: SurfaceRef,
    url: String,
}

#[derive(Debug, Default)]
struct FakeGroup {
    title: Option<String>,
    members: Vec<SurfaceRef>,
}

#[derive(Debug, Default)]
struct FakeHostState {
    cookies: Vec<Cookie>,
    surfaces: Vec<FakeSurface>,
    responders: Vec<Responder>,
    evaluations: Vec<(SurfaceRef, String)>,
    opened: Vec<String>,
    navigations: Vec<(SurfaceRef, String)>,
    failing_opens: Vec<String>,
    cookie_reads: usize,
    groups: HashMap<GroupToken, FakeGroup>,
    groups_created: usize,
    focus_log: Vec<SurfaceRef>,
    active: Option<SurfaceRef>,
    next_surface: u64,
    next_group: u64,
}

/// In-memory [`HostSurface`]
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeHostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHostState> {
        lock(&self.state)
    }

    /// Add a cookie for `domain` (a leading dot covers subdomains)
    pub fn cookie(&self, domain: &str, name: &str, value: &str) -> &Self {
        self.state().cookies.push(Cookie::new(name, value, domain));
        self
    }

    pub fn clear_cookies(&self) -> &Self {
        self.state().cookies.clear();
        self
    }

    /// Reply to any script containing `marker`
    pub fn on_script(&self, marker: &str, reply: ScriptReply) -> &Self {
        self.on_script_seq(None, marker, vec![reply])
    }

    /// Reply to scripts containing `marker` on surfaces whose URL contains
    /// `url_contains`
    pub fn on_script_at(&self, url_contains: &str, marker: &str, reply: ScriptReply) -> &Self {
        self.on_script_seq(Some(url_contains), marker, vec![reply])
    }

    /// Reply with `replies` in order; later registrations take precedence
    pub fn on_script_seq(
        &self,
        url_contains: Option<&str>,
        marker: &str,
        replies: Vec<ScriptReply>,
    ) -> &Self {
        self.state().responders.push(Responder {
            url_contains: url_contains.map(str::to_string),
            marker: marker.to_string(),
            replies,
            calls: 0,
        });
        self
    }

    pub fn fail_open(&self, url_contains: &str) -> &Self {
        self.state().failing_opens.push(url_contains.to_string());
        self
    }

    /// Register an already-open surface
    pub fn add_surface(&self, url: &str) -> SurfaceRef {
        let mut state = self.state();
        state.next_surface += 1;
        let surface = SurfaceRef::new(format!("surface-{}", state.next_surface));
        state.surfaces.push(FakeSurface {
            surface: surface.clone(),
            url: url.to_string(),
        });
        surface
    }

    /// Close a surface; a group left empty is discarded
    pub fn close_surface(&self, surface: &SurfaceRef) {
        let mut state = self.state();
        state.surfaces.retain(|s| &s.surface != surface);
        for group in state.groups.values_mut() {
            group.members.retain(|m| m != surface);
        }
        state.groups.retain(|_, g| !g.members.is_empty());
        if state.active.as_ref() == Some(surface) {
            state.active = None;
        }
    }

    /// Discard a group as a user closing it would
    pub fn discard_group(&self, group: &GroupToken) {
        self.state().groups.remove(group);
    }

    pub fn set_active(&self, surface: Option<SurfaceRef>) {
        self.state().active = surface;
    }

    // -- inspection ----------------------------------------------------------

    pub fn evaluations(&self) -> Vec<(SurfaceRef, String)> {
        self.state().evaluations.clone()
    }

    /// Number of evaluated scripts containing `marker`
    pub fn evaluation_count(&self, marker: &str) -> usize {
        self.state()
            .evaluations
            .iter()
            .filter(|(_, s)| s.contains(marker))
            .count()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    pub fn navigations(&self) -> Vec<(SurfaceRef, String)> {
        self.state().navigations.clone()
    }

    pub fn surface_url(&self, surface: &SurfaceRef) -> Option<String> {
        self.state()
            .surfaces
            .iter()
            .find(|s| &s.surface == surface)
            .map(|s| s.url.clone())
    }

    pub fn cookie_reads(&self) -> usize {
        self.state().cookie_reads
    }

    pub fn group_of(&self, surface: &SurfaceRef) -> Option<GroupToken> {
        self.state()
            .groups
            .iter()
            .find(|(_, g)| g.members.contains(surface))
            .map(|(t, _)| t.clone())
    }

    pub fn group_members(&self, group: &GroupToken) -> Vec<SurfaceRef> {
        self.state()
            .groups
            .get(group)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    pub fn group_title(&self, group: &GroupToken) -> Option<String> {
        self.state().groups.get(group).and_then(|g| g.title.clone())
    }

    pub fn groups_created(&self) -> usize {
        self.state().groups_created
    }

    pub fn focus_log(&self) -> Vec<SurfaceRef> {
        self.state().focus_log.clone()
    }

    fn url_of(state: &FakeHostState, surface: &SurfaceRef) -> Result<String> {
        state
            .surfaces
            .iter()
            .find(|s| &s.surface == surface)
            .map(|s| s.url.clone())
            .ok_or_else(|| Error::surface_not_found(surface.as_str()))
    }
}

impl HostSurface for FakeHost {
    async fn open_surface(&self, url: &str) -> Result<SurfaceRef> {
        {
            let mut state = self.state();
            state.opened.push(url.to_string());
            if state.failing_opens.iter().any(|f| url.contains(f.as_str())) {
                return Err(Error::host(format!("Refused to open {url}")));
            }
        }
        Ok(self.add_surface(url))
    }

    async fn navigate(&self, surface: &SurfaceRef, url: &str) -> Result<()> {
        let mut state = self.state();
        state.navigations.push((surface.clone(), url.to_string()));
        match state.surfaces.iter_mut().find(|s| &s.surface == surface) {
            Some(s) => {
                s.url = url.to_string();
                Ok(())
            }
            None => Err(Error::surface_not_found(surface.as_str())),
        }
    }

    async fn evaluate(&self, surface: &SurfaceRef, script: &str) -> Result<Value> {
        let reply = {
            let mut state = self.state();
            let url = Self::url_of(&state, surface)?;
            state.evaluations.push((surface.clone(), script.to_string()));

            let responder = state.responders.iter_mut().rev().find(|r| {
                script.contains(r.marker.as_str())
                    && r
                        .url_contains
                        .as_deref()
                        .map_or(true, |needle| url.contains(needle))
            });

            match responder {
                Some(r) if !r.replies.is_empty() => {
                    let idx = r.calls.min(r.replies.len() - 1);
                    r.calls += 1;
                    r.replies[idx].clone()
                }
                _ => ScriptReply::Value(Value::Null),
            }
        };

        match reply {
            ScriptReply::Value(v) => Ok(v),
            ScriptReply::Error(message) => Err(Error::script(message)),
            ScriptReply::Hang => std::future::pending().await,
            ScriptReply::Panic => panic!("fake host panicked"),
        }
    }

    async fn read_cookie(&self, url: &str, name: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.cookie_reads += 1;
        Ok(state
            .cookies
            .iter()
            .find(|c| c.name == name && c.applies_to(url))
            .map(|c| c.value.clone()))
    }

    async fn cookies_for(&self, url: &str) -> Result<Vec<Cookie>> {
        let mut state = self.state();
        state.cookie_reads += 1;
        Ok(state
            .cookies
            .iter()
            .filter(|c| c.applies_to(url))
            .cloned()
            .collect())
    }

    async fn query_surfaces(&self, url_pattern: &str) -> Result<Vec<SurfaceRef>> {
        Ok(self
            .state()
            .surfaces
            .iter()
            .filter(|s| url_matches(url_pattern, &s.url))
            .map(|s| s.surface.clone())
            .collect())
    }

    async fn group_surfaces(
        &self,
        surfaces: &[SurfaceRef],
        into: Option<&GroupToken>,
    ) -> Result<GroupToken> {
        let mut state = self.state();
        let token = match into {
            Some(token) if state.groups.contains_key(token) => token.clone(),
            Some(token) => return Err(Error::group_missing(token.as_str())),
            None => {
                state.next_group += 1;
                state.groups_created += 1;
                let token = GroupToken::new(format!("group-{}", state.next_group));
                state.groups.insert(token.clone(), FakeGroup::default());
                token
            }
        };

        // A surface belongs to at most one group
        for group in state.groups.values_mut() {
            group.members.retain(|m| !surfaces.contains(m));
        }
        if let Some(group) = state.groups.get_mut(&token) {
            group.members.extend(surfaces.iter().cloned());
        }
        Ok(token)
    }

    async fn group_exists(&self, group: &GroupToken) -> Result<bool> {
        Ok(self.state().groups.contains_key(group))
    }

    async fn label_group(&self, group: &GroupToken, title: &str) -> Result<()> {
        match self.state().groups.get_mut(group) {
            Some(g) => {
                g.title = Some(title.to_string());
                Ok(())
            }
            None => Err(Error::group_missing(group.as_str())),
        }
    }

    async fn focus_surface(&self, surface: &SurfaceRef) -> Result<()> {
        let mut state = self.state();
        Self::url_of(&state, surface)?;
        state.focus_log.push(surface.clone());
        state.active = Some(surface.clone());
        Ok(())
    }

    async fn active_surface(&self) -> Result<Option<SurfaceRef>> {
        Ok(self.state().active.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeFetcher
// ---------------------------------------------------------------------------

/// How a routed request is answered
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Respond {
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
        /// Defaults to the request URL
        final_url: Option<String>,
    },
    Fail(String),
    Hang,
}

#[derive(Debug, Default)]
struct FakeFetcherState {
    routes: Vec<(String, FakeResponse)>,
    requests: Vec<HttpRequest>,
}

/// In-memory [`HttpFetcher`]; unrouted URLs get an empty 404
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher {
    state: Arc<Mutex<FakeFetcherState>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose URL starts with `prefix`; later routes win
    pub fn route(&self, prefix: &str, response: FakeResponse) -> &Self {
        lock(&self.state)
            .routes
            .push((prefix.to_string(), response));
        self
    }

    pub fn json(&self, prefix: &str, status: u16, body: Value) -> &Self {
        self.route(
            prefix,
            FakeResponse::Respond {
                status,
                content_type: Some("application/json".to_string()),
                body: body.to_string().into_bytes(),
                final_url: None,
            },
        )
    }

    pub fn html(&self, prefix: &str, body: &str) -> &Self {
        self.route(
            prefix,
            FakeResponse::Respond {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: body.as_bytes().to_vec(),
                final_url: None,
            },
        )
    }

    /// Respond with HTML as if redirected to `final_url`
    pub fn redirect_html(&self, prefix: &str, final_url: &str, body: &str) -> &Self {
        self.route(
            prefix,
            FakeResponse::Respond {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: body.as_bytes().to_vec(),
                final_url: Some(final_url.to_string()),
            },
        )
    }

    pub fn bytes(&self, prefix: &str, content_type: &str, body: &[u8]) -> &Self {
        self.route(
            prefix,
            FakeResponse::Respond {
                status: 200,
                content_type: Some(content_type.to_string()),
                body: body.to_vec(),
                final_url: None,
            },
        )
    }

    pub fn fail(&self, prefix: &str, message: &str) -> &Self {
        self.route(prefix, FakeResponse::Fail(message.to_string()))
    }

    pub fn hang(&self, prefix: &str) -> &Self {
        self.route(prefix, FakeResponse::Hang)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.state).requests.len()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<HttpRequest> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl HttpFetcher for FakeFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = {
            let mut state = lock(&self.state);
            let routed = state
                .routes
                .iter()
                .rev()
                .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                .map(|(_, r)| r.clone());
            state.requests.push(request.clone());
            routed
        };

        match response {
            Some(FakeResponse::Respond {
                status,
                content_type,
                body,
                final_url,
            }) => Ok(HttpResponse {
                status,
                final_url: final_url.unwrap_or_else(|| request.url.clone()),
                content_type,
                body,
            }),
            Some(FakeResponse::Fail(message)) => Err(Error::http(message)),
            Some(FakeResponse::Hang) => std::future::pending().await,
            None => Ok(HttpResponse {
                status: 404,
                final_url: request.url,
                content_type: None,
                body: Vec::new(),
            }),
        }
    }
}
