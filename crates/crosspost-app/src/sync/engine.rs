//! Per-platform sync pipeline
//!
//! `Pending → Opening → WaitingReady → Injecting → Verifying → Done`, with
//! `Failed` reachable from every live state. The whole pipeline runs under
//! the platform budget; whatever state it reached when the budget ran out
//! decides the failure kind.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use serde_json::Value;
use tokio::time::Instant;

use crosspost_core::prelude::*;
use crosspost_core::{
    ApiCall, BodyFormat, ContentPayload, FailureKind, InjectionMethod, PlatformDescriptor,
    PolicyStep, ReadinessSignal, SurfaceRef, SyncOutcome, SyncState, SyncStrategy,
};
use crosspost_host::{cookie_header, HostSurface, HttpFetcher, HttpRequest};

use super::scripts;
use crate::config::SyncSettings;
use crate::detection::predicate::{evaluate, json_path};
use crate::group::GroupingCoordinator;
use crate::session::GroupSlot;

/// Receives every state change of an outcome
pub type StateObserver<'a> = &'a (dyn Fn(&SyncOutcome) + Send + Sync);

/// Map an error to the failure kind reported for the platform
pub fn failure_kind(error: &Error) -> FailureKind {
    match error {
        Error::SurfaceTimeout { .. } => FailureKind::SurfaceTimeout,
        Error::InjectionVerificationFailed { .. } => FailureKind::InjectionVerificationFailed,
        Error::UnregisteredPlatform { .. } => FailureKind::UnregisteredPlatform,
        Error::DraftCreate { .. } => FailureKind::DraftCreate,
        Error::Timeout { .. } => FailureKind::Timeout,
        Error::Cancelled => FailureKind::Cancelled,
        _ => FailureKind::Host,
    }
}

/// Deterministic fallback for a strategy whose content did not land
pub fn fallback_for(strategy: &SyncStrategy) -> Option<SyncStrategy> {
    match strategy {
        SyncStrategy::ClipboardPasteSimulation { targets } => Some(SyncStrategy::NativeValueSet {
            targets: targets.clone(),
            format: BodyFormat::Html,
        }),
        _ => None,
    }
}

fn verify_selector(strategy: &SyncStrategy) -> Option<&str> {
    match strategy {
        SyncStrategy::NativeValueSet { targets, .. }
        | SyncStrategy::ClipboardPasteSimulation { targets } => Some(&targets.body),
        SyncStrategy::FileImport { verify, .. } => Some(verify),
        SyncStrategy::StructuredApiCreate { .. } => None,
    }
}

/// Focus taken from the user's surface, to be handed back
struct FocusGrant {
    previous: Option<SurfaceRef>,
}

pub struct SyncEngine<H, F> {
    host: Arc<H>,
    fetcher: Arc<F>,
    grouping: GroupingCoordinator<H>,
    settings: SyncSettings,
    api_timeout: Duration,
}

impl<H, F> SyncEngine<H, F>
where
    H: HostSurface + Send + Sync + 'static,
    F: HttpFetcher + Send + Sync + 'static,
{
    pub fn new(host: Arc<H>, fetcher: Arc<F>, settings: SyncSettings, api_timeout: Duration) -> Self {
        Self {
            grouping: GroupingCoordinator::new(Arc::clone(&host)),
            host,
            fetcher,
            settings,
            api_timeout,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one platform to a terminal outcome
    #[instrument(skip_all, fields(platform = %descriptor.id))]
    pub async fn sync_platform(
        &self,
        descriptor: &PlatformDescriptor,
        payload: &ContentPayload,
        group: &GroupSlot,
        observer: StateObserver<'_>,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome::new(&descriptor.id);
        let mut focus: Option<FocusGrant> = None;
        let budget = self.settings.platform_budget();

        let result = tokio::time::timeout(
            budget,
            self.pipeline(descriptor, payload, group, &mut outcome, &mut focus, observer),
        )
        .await;

        self.restore_focus(&mut focus).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("{} failed in {}: {}", descriptor.id, outcome.state, e);
                outcome.fail(failure_kind(&e), e.to_string());
            }
            Err(_) => {
                let (kind, message) = match outcome.state {
                    SyncState::Pending | SyncState::Opening | SyncState::WaitingReady => (
                        FailureKind::SurfaceTimeout,
                        Error::surface_timeout(&descriptor.id, budget).to_string(),
                    ),
                    _ => (
                        FailureKind::Timeout,
                        format!(
                            "{} exceeded its {}s budget while {}",
                            descriptor.id,
                            budget.as_secs(),
                            outcome.state
                        ),
                    ),
                };
                warn!("{}", message);
                outcome.fail(kind, message);
            }
        }

        observer(&outcome);
        outcome
    }

    async fn pipeline(
        &self,
        descriptor: &PlatformDescriptor,
        payload: &ContentPayload,
        group: &GroupSlot,
        outcome: &mut SyncOutcome,
        focus: &mut Option<FocusGrant>,
        observer: StateObserver<'_>,
    ) -> Result<()> {
        let plan = &descriptor.sync;

        // Opening
        outcome.advance(SyncState::Opening)?;
        observer(outcome);
        let surface = self.host.open_surface(&descriptor.entry_url).await?;
        outcome.surface = Some(surface.clone());
        self.grouping.join(group, &surface).await;

        // WaitingReady
        outcome.advance(SyncState::WaitingReady)?;
        observer(outcome);
        if plan.requires_focus {
            *focus = Some(self.grant_focus(&surface).await);
        }
        self.wait_ready(&descriptor.id, &surface, &plan.readiness).await?;
        self.restore_focus(focus).await;

        // Injecting
        outcome.advance(SyncState::Injecting)?;
        observer(outcome);
        self.run_steps(&surface, &plan.pre_steps).await;

        let strategy = match &plan.strategy {
            SyncStrategy::StructuredApiCreate {
                calls,
                edit_url,
                then,
            } => {
                let target = self.create_draft(calls, edit_url, payload).await?;
                info!("{}: draft created, opening {}", descriptor.id, target);
                self.host.navigate(&surface, &target).await?;
                if plan.requires_focus {
                    *focus = Some(self.grant_focus(&surface).await);
                }
                self.wait_ready(&descriptor.id, &surface, &plan.readiness).await?;
                self.restore_focus(focus).await;
                then.as_ref()
            }
            other => other,
        };

        let mut method = self.inject(&surface, strategy, payload).await;

        // Verifying
        outcome.advance(SyncState::Verifying)?;
        observer(outcome);
        let mut verified = match method {
            Ok(_) => self.verify(&surface, strategy).await,
            Err(ref e) => Err(e.to_string()),
        };

        if let Err(reason) = &verified {
            if let Some(fallback) = fallback_for(strategy) {
                info!(
                    "{}: {} did not land ({}), falling back to {}",
                    descriptor.id,
                    strategy.name(),
                    reason,
                    fallback.name()
                );
                outcome.fallback_used = true;
                method = self.inject(&surface, &fallback, payload).await;
                verified = match method {
                    Ok(_) => self.verify(&surface, &fallback).await,
                    Err(ref e) => Err(e.to_string()),
                };
            }
        }

        match verified {
            Ok(length) => {
                outcome.method = method.ok();
                let message = if outcome.fallback_used {
                    format!("Content filled ({length} chars) after fallback")
                } else {
                    format!("Content filled ({length} chars)")
                };
                info!("{}: {}", descriptor.id, message);
                outcome.complete(message)
            }
            Err(reason) => Err(Error::verification_failed(&descriptor.id, reason)),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Readiness and focus
    // ─────────────────────────────────────────────────────────────

    async fn wait_ready(
        &self,
        platform_id: &str,
        surface: &SurfaceRef,
        signal: &ReadinessSignal,
    ) -> Result<()> {
        let budget = signal.budget(self.settings.ready_timeout());
        let deadline = Instant::now() + budget;
        let script = scripts::readiness(signal);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::surface_timeout(platform_id, budget));
            }

            match tokio::time::timeout(remaining, self.host.evaluate(surface, &script)).await {
                Ok(Ok(Value::Bool(true))) => break,
                Ok(Ok(_)) => {}
                Ok(Err(Error::SurfaceNotFound { surface })) => {
                    return Err(Error::SurfaceNotFound { surface })
                }
                Ok(Err(e)) => trace!("Readiness probe failed: {}", e),
                Err(_) => return Err(Error::surface_timeout(platform_id, budget)),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.settings.poll_interval().min(remaining)).await;
        }

        let settle = signal
            .settle_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.settings.settle());
        debug!("{} ready, settling for {}ms", platform_id, settle.as_millis());
        tokio::time::sleep(settle).await;
        Ok(())
    }

    async fn grant_focus(&self, surface: &SurfaceRef) -> FocusGrant {
        let previous = match self.host.active_surface().await {
            Ok(previous) => previous,
            Err(e) => {
                debug!("Active surface unknown: {}", e);
                None
            }
        };
        if let Err(e) = self.host.focus_surface(surface).await {
            warn!("Could not focus {}: {}", surface, e);
        }
        FocusGrant { previous }
    }

    async fn restore_focus(&self, focus: &mut Option<FocusGrant>) {
        let Some(grant) = focus.take() else {
            return;
        };
        if let Some(previous) = grant.previous {
            if let Err(e) = self.host.focus_surface(&previous).await {
                debug!("Could not restore focus to {}: {}", previous, e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Injection
    // ─────────────────────────────────────────────────────────────

    /// Pre-injection steps are best effort
    async fn run_steps(&self, surface: &SurfaceRef, steps: &[PolicyStep]) {
        for step in steps {
            if let PolicyStep::Delay { ms } = step {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                continue;
            }
            let Some(script) = scripts::policy_step(step) else {
                continue;
            };
            match self.host.evaluate(surface, &script).await {
                Ok(value) => {
                    if let Err(detail) = scripts::check_ok(&value) {
                        warn!("Pre-injection step {:?} reported: {}", step, detail);
                    }
                }
                Err(e) => warn!("Pre-injection step {:?} failed: {}", step, e),
            }
        }
    }

    async fn inject(
        &self,
        surface: &SurfaceRef,
        strategy: &SyncStrategy,
        payload: &ContentPayload,
    ) -> Result<InjectionMethod> {
        let (script, method) = match strategy {
            SyncStrategy::NativeValueSet { targets, format } => (
                scripts::native_set(targets, *format, payload),
                InjectionMethod::NativeValueSet,
            ),
            SyncStrategy::ClipboardPasteSimulation { targets } => (
                scripts::clipboard_paste(targets, payload),
                InjectionMethod::ClipboardPaste,
            ),
            SyncStrategy::FileImport {
                input, drop_target, ..
            } => (
                scripts::file_import(input, drop_target.as_deref(), payload),
                InjectionMethod::FileImport,
            ),
            SyncStrategy::StructuredApiCreate { .. } => {
                return Err(Error::draft_create("nested draft creation is not supported"))
            }
        };

        let value = self.host.evaluate(surface, &script).await?;
        scripts::check_ok(&value).map_err(Error::script)?;
        Ok(method)
    }

    /// Length of the injected content; zero is an error
    async fn verify(
        &self,
        surface: &SurfaceRef,
        strategy: &SyncStrategy,
    ) -> std::result::Result<u64, String> {
        let Some(selector) = verify_selector(strategy) else {
            return Err("strategy has no verification target".to_string());
        };
        // Editors apply synthetic input asynchronously
        tokio::time::sleep(self.settings.poll_interval()).await;

        match self
            .host
            .evaluate(surface, &scripts::content_length(selector))
            .await
        {
            Ok(value) => match value.as_u64().or_else(|| value.as_f64().map(|f| f as u64)) {
                Some(0) | None => Err(format!("{selector} is empty")),
                Some(length) => Ok(length),
            },
            Err(e) => Err(e.to_string()),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Draft creation
    // ─────────────────────────────────────────────────────────────

    /// Run the API calls and return the rendered edit URL
    async fn create_draft(
        &self,
        calls: &[ApiCall],
        edit_url: &str,
        payload: &ContentPayload,
    ) -> Result<String> {
        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert("title".to_string(), payload.title.clone());

        for call in calls {
            let url = render_template(&call.url, &vars, Escape::Url)?;
            let body = call
                .body
                .as_deref()
                .map(|b| render_template(b, &vars, Escape::Json))
                .transpose()?;

            let cookies = self.host.cookies_for(&url).await?;
            let mut request = HttpRequest::get(url.clone())
                .header("Accept", "application/json")
                .timeout(self.api_timeout);
            request.method = call.method;
            if body.is_some() {
                request = request.header("Content-Type", "application/json");
            }
            request.body = body;
            if !cookies.is_empty() {
                request = request.header("Cookie", cookie_header(&cookies));
            }

            let response = match tokio::time::timeout(self.api_timeout, self.fetcher.fetch(request))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(Error::draft_create(format!("{url}: {e}"))),
                Err(_) => {
                    return Err(Error::draft_create(format!(
                        "{url}: no response within {}s",
                        self.api_timeout.as_secs()
                    )))
                }
            };
            if !response.is_success() {
                return Err(Error::draft_create(format!(
                    "{url}: HTTP {}",
                    response.status
                )));
            }

            let body = response.text();
            let json: Value = serde_json::from_str(&body)
                .map_err(|e| Error::draft_create(format!("{url}: invalid JSON: {e}")))?;
            if let Some(require) = &call.require {
                if !evaluate(require, &json, &body) {
                    return Err(Error::draft_create(format!("{url}: rejected: {body}")));
                }
            }

            for (name, path) in &call.captures {
                let value = json_path(&json, path)
                    .and_then(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .ok_or_else(|| Error::draft_create(format!("{url}: {path} missing")))?;
                trace!("Captured {} = {}", name, value);
                vars.insert(name.clone(), value);
            }
        }

        render_template(edit_url, &vars, Escape::Url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Percent-encode for a URL path or query
    Url,
    /// Escape for the inside of a JSON string literal
    Json,
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid PLACEHOLDER regex")
});

/// Substitute `{name}` placeholders; unknown names are an error
pub fn render_template(
    template: &str,
    vars: &HashMap<String, String>,
    escape: Escape,
) -> Result<String> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => match escape {
                Escape::Url => utf8_percent_encode(value, NON_ALPHANUMERIC).to_string(),
                Escape::Json => {
                    let quoted = Value::String(value.clone()).to_string();
                    quoted[1..quoted.len() - 1].to_string()
                }
            },
            None => {
                missing.get_or_insert_with(|| name.to_string());
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(name) => Err(Error::draft_create(format!("no value for {{{name}}}"))),
        None => Ok(rendered.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost_core::{
        DetectionPlan, EditorTargets, HttpMethod, LoginPredicate, SyncPlan,
    };
    use crosspost_host::test_utils::{FakeFetcher, FakeHost, ScriptReply};
    use serde_json::json;
    use std::sync::Mutex;

    fn settings() -> SyncSettings {
        SyncSettings {
            ready_timeout_ms: 2_000,
            poll_interval_ms: 100,
            settle_ms: 0,
            platform_budget_ms: 30_000,
            max_concurrent: 1,
        }
    }

    fn engine(host: &FakeHost, fetcher: &FakeFetcher) -> SyncEngine<FakeHost, FakeFetcher> {
        SyncEngine::new(
            Arc::new(host.clone()),
            Arc::new(fetcher.clone()),
            settings(),
            Duration::from_secs(2),
        )
    }

    fn descriptor(id: &str, plan: SyncPlan) -> PlatformDescriptor {
        PlatformDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            entry_url: format!("https://{id}.example/write"),
            detection: DetectionPlan::new(vec![]),
            sync: plan,
        }
    }

    fn payload() -> ContentPayload {
        ContentPayload::new("Title")
            .with_markdown("# Body")
            .with_html("<h1>Body</h1>")
    }

    fn paste_plan() -> SyncPlan {
        SyncPlan::new(
            SyncStrategy::ClipboardPasteSimulation {
                targets: EditorTargets::new(Some("#title"), ".ProseMirror"),
            },
            ReadinessSignal::selector(".ProseMirror"),
        )
    }

    fn ready(host: &FakeHost) {
        host.on_script(scripts::READY_MARKER, ScriptReply::value(true));
        host.on_script(scripts::NATIVE_MARKER, ScriptReply::value(json!({"ok": true})));
        host.on_script(scripts::PASTE_MARKER, ScriptReply::value(json!({"ok": true})));
        host.on_script(scripts::IMPORT_MARKER, ScriptReply::value(json!({"ok": true})));
        host.on_script(scripts::STEP_MARKER, ScriptReply::value(json!({"ok": true})));
        host.on_script(scripts::VERIFY_MARKER, ScriptReply::value(42));
    }

    fn no_observer() -> impl Fn(&SyncOutcome) + Send + Sync {
        |_: &SyncOutcome| {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_walks_every_state() {
        let host = FakeHost::new();
        ready(&host);
        let engine = engine(&host, &FakeFetcher::new());
        let states = Mutex::new(Vec::new());
        let observer = |o: &SyncOutcome| states.lock().unwrap().push(o.state);

        let outcome = engine
            .sync_platform(
                &descriptor("alpha", paste_plan()),
                &payload(),
                &GroupSlot::default(),
                &observer,
            )
            .await;

        assert!(outcome.succeeded(), "{:?}", outcome.message);
        assert_eq!(outcome.method, Some(InjectionMethod::ClipboardPaste));
        assert!(!outcome.fallback_used);
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                SyncState::Opening,
                SyncState::WaitingReady,
                SyncState::Injecting,
                SyncState::Verifying,
                SyncState::Done,
            ]
        );
        assert_eq!(host.opened_urls(), vec!["https://alpha.example/write"]);
        let surface = outcome.surface.unwrap();
        assert!(host.group_of(&surface).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_is_surface_timeout() {
        let host = FakeHost::new();
        ready(&host);
        host.on_script(scripts::READY_MARKER, ScriptReply::value(false));

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", paste_plan()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert_eq!(outcome.state, SyncState::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::SurfaceTimeout));
        assert_eq!(host.evaluation_count(scripts::PASTE_MARKER), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_falls_back_to_native_once() {
        let host = FakeHost::new();
        ready(&host);
        host.on_script_seq(
            None,
            scripts::VERIFY_MARKER,
            vec![ScriptReply::value(0), ScriptReply::value(17)],
        );

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", paste_plan()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert!(outcome.succeeded());
        assert!(outcome.fallback_used);
        assert_eq!(outcome.method, Some(InjectionMethod::NativeValueSet));
        assert_eq!(host.evaluation_count(scripts::NATIVE_MARKER), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_script_error_also_falls_back() {
        let host = FakeHost::new();
        ready(&host);
        host.on_script(
            scripts::PASTE_MARKER,
            ScriptReply::Error("ClipboardEvent is not defined".to_string()),
        );

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", paste_plan()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert!(outcome.succeeded());
        assert!(outcome.fallback_used);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_without_content_fails_without_fallback() {
        let host = FakeHost::new();
        ready(&host);
        host.on_script(scripts::VERIFY_MARKER, ScriptReply::value(0));
        let plan = SyncPlan::new(
            SyncStrategy::NativeValueSet {
                targets: EditorTargets::new(None, "textarea"),
                format: BodyFormat::Markdown,
            },
            ReadinessSignal::default(),
        );

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", plan),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert_eq!(
            outcome.failure,
            Some(FailureKind::InjectionVerificationFailed)
        );
        assert!(!outcome.fallback_used);
        assert_eq!(host.evaluation_count(scripts::NATIVE_MARKER), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_is_granted_and_restored() {
        let host = FakeHost::new();
        ready(&host);
        let user_tab = host.add_surface("https://mail.example/");
        host.set_active(Some(user_tab.clone()));

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", paste_plan().focused()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        let ours = outcome.surface.clone().unwrap();
        assert_eq!(host.focus_log(), vec![ours, user_tab]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_restored_on_failure() {
        let host = FakeHost::new();
        ready(&host);
        host.on_script(scripts::READY_MARKER, ScriptReply::value(false));
        let user_tab = host.add_surface("https://mail.example/");
        host.set_active(Some(user_tab.clone()));

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", paste_plan().focused()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert_eq!(outcome.failure, Some(FailureKind::SurfaceTimeout));
        assert_eq!(host.focus_log().last(), Some(&user_tab));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exceeded_while_injecting() {
        let host = FakeHost::new();
        ready(&host);
        host.on_script(scripts::PASTE_MARKER, ScriptReply::Hang);
        let engine = SyncEngine::new(
            Arc::new(host.clone()),
            Arc::new(FakeFetcher::new()),
            SyncSettings {
                platform_budget_ms: 5_000,
                ..settings()
            },
            Duration::from_secs(2),
        );

        let outcome = engine
            .sync_platform(
                &descriptor("alpha", paste_plan()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert_eq!(outcome.failure, Some(FailureKind::Timeout));
        assert!(outcome.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_is_host_failure() {
        let host = FakeHost::new();
        host.fail_open("alpha.example");

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", paste_plan()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert_eq!(outcome.failure, Some(FailureKind::Host));
        assert!(outcome.surface.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_steps_run_before_injection() {
        let host = FakeHost::new();
        ready(&host);
        let plan = paste_plan().steps(vec![
            PolicyStep::click(".switch", Some("MD")),
            PolicyStep::delay(500),
            PolicyStep::confirm(".modal", &["确定"]),
        ]);

        let outcome = engine(&host, &FakeFetcher::new())
            .sync_platform(
                &descriptor("alpha", plan),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert!(outcome.succeeded());
        let scripts_run: Vec<String> = host.evaluations().into_iter().map(|(_, s)| s).collect();
        let first_step = scripts_run
            .iter()
            .position(|s| s.starts_with(scripts::STEP_MARKER))
            .unwrap();
        let paste = scripts_run
            .iter()
            .position(|s| s.starts_with(scripts::PASTE_MARKER))
            .unwrap();
        assert!(first_step < paste);
        assert_eq!(host.evaluation_count(scripts::STEP_MARKER), 2);
    }

    fn jianshu_like_plan() -> SyncPlan {
        SyncPlan::new(
            SyncStrategy::StructuredApiCreate {
                calls: vec![
                    ApiCall {
                        url: "https://api.delta.example/notebooks".to_string(),
                        method: HttpMethod::Get,
                        body: None,
                        captures: vec![("notebook".to_string(), "0.id".to_string())],
                        require: Some(LoginPredicate::truthy("0.id")),
                    },
                    ApiCall {
                        url: "https://api.delta.example/notes".to_string(),
                        method: HttpMethod::Post,
                        body: Some(r#"{"notebook_id":"{notebook}","title":"{title}"}"#.to_string()),
                        captures: vec![("note".to_string(), "id".to_string())],
                        require: None,
                    },
                ],
                edit_url: "https://delta.example/writer/{notebook}/{note}".to_string(),
                then: Box::new(SyncStrategy::ClipboardPasteSimulation {
                    targets: EditorTargets::new(None, "#editor"),
                }),
            },
            ReadinessSignal::selector("#editor"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_api_create_navigates_to_draft() {
        let host = FakeHost::new();
        ready(&host);
        host.cookie("delta.example", "session", "s1");
        let fetcher = FakeFetcher::new();
        fetcher.json("https://api.delta.example/notebooks", 200, json!([{"id": 31}]));
        fetcher.json("https://api.delta.example/notes", 200, json!({"id": "n9"}));

        let payload = ContentPayload::new("Say \"hi\"").with_markdown("body");
        let outcome = engine(&host, &fetcher)
            .sync_platform(
                &descriptor("delta", jianshu_like_plan()),
                &payload,
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert!(outcome.succeeded(), "{:?}", outcome.message);
        let navigations = host.navigations();
        assert_eq!(navigations[0].1, "https://delta.example/writer/31/n9");

        let create = &fetcher.requests_to("https://api.delta.example/notes")[0];
        assert_eq!(
            create.body.as_deref(),
            Some(r#"{"notebook_id":"31","title":"Say \"hi\""}"#)
        );
        assert_eq!(create.header_value("cookie"), Some("session=s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_draft_editor_wait_is_focused_again() {
        let host = FakeHost::new();
        ready(&host);
        let user_tab = host.add_surface("https://mail.example/");
        host.set_active(Some(user_tab.clone()));
        let fetcher = FakeFetcher::new();
        fetcher.json("https://api.delta.example/notebooks", 200, json!([{"id": 31}]));
        fetcher.json("https://api.delta.example/notes", 200, json!({"id": "n9"}));

        let outcome = engine(&host, &fetcher)
            .sync_platform(
                &descriptor("delta", jianshu_like_plan().focused()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert!(outcome.succeeded(), "{:?}", outcome.message);
        let ours = outcome.surface.clone().unwrap();
        assert_eq!(
            host.focus_log(),
            vec![ours.clone(), user_tab.clone(), ours, user_tab]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_api_create_rejection_is_draft_failure() {
        let host = FakeHost::new();
        ready(&host);
        let fetcher = FakeFetcher::new();
        fetcher.json("https://api.delta.example/notebooks", 200, json!([]));

        let outcome = engine(&host, &fetcher)
            .sync_platform(
                &descriptor("delta", jianshu_like_plan()),
                &payload(),
                &GroupSlot::default(),
                &no_observer(),
            )
            .await;

        assert_eq!(outcome.failure, Some(FailureKind::DraftCreate));
        assert!(host.navigations().is_empty());
    }

    #[test]
    fn test_render_template_escaping() {
        let mut vars = HashMap::new();
        vars.insert("title".to_string(), "a b/\"c\"".to_string());
        assert_eq!(
            render_template("https://x/{title}", &vars, Escape::Url).unwrap(),
            "https://x/a%20b%2F%22c%22"
        );
        assert_eq!(
            render_template(r#"{"t":"{title}"}"#, &vars, Escape::Json).unwrap(),
            r#"{"t":"a b/\"c\""}"#
        );
        assert!(render_template("{missing}", &vars, Escape::Url).is_err());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            failure_kind(&Error::surface_timeout("x", Duration::from_secs(1))),
            FailureKind::SurfaceTimeout
        );
        assert_eq!(failure_kind(&Error::draft_create("x")), FailureKind::DraftCreate);
        assert_eq!(failure_kind(&Error::script("x")), FailureKind::Host);
    }
}
