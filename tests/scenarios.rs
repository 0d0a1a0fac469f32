//! End-to-end orchestration scenarios over the in-memory host
//!
//! Detection short-circuits and caching, session completeness under hangs,
//! and the paste fallback, all driven through the public orchestrator API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crosspost_app::sync::scripts;
use crosspost_app::{
    CancelHandle, Orchestrator, PlatformRegistry, ProgressSink, ResultCache, Settings,
};
use crosspost_core::{
    ApiProbe, ContentPayload, CookieProbe, DetectionPlan, DetectionResult, DetectionStrategy,
    EditorTargets, FailureKind, LoginPredicate, PlatformDescriptor, ProfileExtractor,
    ReadinessSignal, SyncOutcome, SyncPlan, SyncState, SyncStrategy,
};
use crosspost_host::test_utils::{FakeFetcher, FakeHost, ScriptReply};
use crosspost_host::MemoryKvStore;

type TestOrchestrator = Orchestrator<FakeHost, FakeFetcher, MemoryKvStore>;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn cookie_probe(id: &str) -> CookieProbe {
    CookieProbe::new(&format!("https://{id}.example/"), &["sid"])
}

fn api_probe(id: &str) -> ApiProbe {
    ApiProbe::get(
        format!("https://api.{id}.example/me"),
        LoginPredicate::equals("code", 0),
        ProfileExtractor::paths(&["data.name"], &["data.avatar"]),
    )
}

fn paste_plan() -> SyncPlan {
    SyncPlan::new(
        SyncStrategy::ClipboardPasteSimulation {
            targets: EditorTargets::new(Some("#title"), ".ProseMirror"),
        },
        ReadinessSignal::selector(".ProseMirror"),
    )
}

fn descriptor(id: &str, detection: DetectionPlan) -> PlatformDescriptor {
    PlatformDescriptor {
        id: id.to_string(),
        display_name: id.to_string(),
        entry_url: format!("https://{id}.example/editor"),
        detection,
        sync: paste_plan(),
    }
}

fn full_chain(id: &str) -> DetectionPlan {
    DetectionPlan::new(vec![
        DetectionStrategy::CacheLookup { liveness: None },
        DetectionStrategy::CookiePresence(cookie_probe(id)),
        DetectionStrategy::AuthenticatedApiCall(api_probe(id)),
    ])
    .ttl_secs(3_600)
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.sync.settle_ms = 0;
    settings.sync.ready_timeout_ms = 3_000;
    settings.sync.platform_budget_ms = 10_000;
    settings
}

fn build(
    host: &FakeHost,
    fetcher: &FakeFetcher,
    descriptors: Vec<PlatformDescriptor>,
    settings: Settings,
) -> TestOrchestrator {
    let mut registry = PlatformRegistry::new();
    for descriptor in descriptors {
        registry.register(descriptor).unwrap();
    }
    Orchestrator::new(
        registry,
        Arc::new(host.clone()),
        Arc::new(fetcher.clone()),
        ResultCache::new(MemoryKvStore::new()),
        &settings,
    )
}

fn editor_ready(host: &FakeHost) {
    host.on_script(scripts::READY_MARKER, ScriptReply::value(true));
    host.on_script(scripts::PASTE_MARKER, ScriptReply::value(json!({"ok": true})));
    host.on_script(scripts::NATIVE_MARKER, ScriptReply::value(json!({"ok": true})));
    host.on_script(scripts::VERIFY_MARKER, ScriptReply::value(64));
}

fn article() -> ContentPayload {
    ContentPayload::new("Release notes")
        .with_markdown("# Release notes\n\nEverything changed.")
        .with_html("<h1>Release notes</h1><p>Everything changed.</p>")
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
struct Recorder {
    states: Vec<(String, SyncState)>,
    items: Vec<(String, usize, usize)>,
    completed: Option<usize>,
}

impl ProgressSink<SyncOutcome> for Recorder {
    fn on_update(&mut self, platform_id: &str, state: SyncState) {
        self.states.push((platform_id.to_string(), state));
    }

    fn on_item(&mut self, platform_id: &str, _: &SyncOutcome, completed: usize, total: usize) {
        self.items.push((platform_id.to_string(), completed, total));
    }

    fn on_complete(&mut self, total: usize) {
        self.completed = Some(total);
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_cookie_is_logged_out_without_network() {
    let host = FakeHost::new();
    let fetcher = FakeFetcher::new();
    let orchestrator = build(&host, &fetcher, vec![descriptor("alpha", full_chain("alpha"))], settings());

    let result = orchestrator.detect("alpha", false).await.unwrap();

    assert!(!result.logged_in);
    assert!(result.error.is_none());
    assert_eq!(fetcher.request_count(), 0);
}

#[tokio::test]
async fn test_fresh_cache_entry_served_after_liveness() {
    let host = FakeHost::new();
    host.cookie("alpha.example", "sid", "s1");
    let fetcher = FakeFetcher::new();
    let orchestrator = build(&host, &fetcher, vec![descriptor("alpha", full_chain("alpha"))], settings());

    let ten_minutes_ago = Utc::now() - chrono::Duration::minutes(10);
    let cached = DetectionResult::logged_in(Some("cached-user".to_string()), None)
        .observed_at(ten_minutes_ago);
    orchestrator
        .cache()
        .put("alpha", cached.clone(), Duration::from_secs(3_600))
        .await
        .unwrap();

    let result = orchestrator.detect("alpha", false).await.unwrap();

    assert_eq!(result, cached);
    assert_eq!(fetcher.request_count(), 0);
}

#[tokio::test]
async fn test_detect_twice_within_ttl_is_idempotent() {
    let host = FakeHost::new();
    host.cookie("alpha.example", "sid", "s1");
    let fetcher = FakeFetcher::new();
    fetcher.json(
        "https://api.alpha.example/me",
        200,
        json!({"code": 0, "data": {"name": "writer", "avatar": "//cdn.example/a.png"}}),
    );
    let orchestrator = build(&host, &fetcher, vec![descriptor("alpha", full_chain("alpha"))], settings());

    let first = orchestrator.detect("alpha", false).await.unwrap();
    let second = orchestrator.detect("alpha", false).await.unwrap();

    assert!(first.logged_in);
    assert_eq!(first.username.as_deref(), Some("writer"));
    assert_eq!(first, second);
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test]
async fn test_expired_entry_reruns_chain() {
    let host = FakeHost::new();
    host.cookie("alpha.example", "sid", "s1");
    let fetcher = FakeFetcher::new();
    fetcher.json(
        "https://api.alpha.example/me",
        200,
        json!({"code": 0, "data": {"name": "fresh"}}),
    );
    let orchestrator = build(&host, &fetcher, vec![descriptor("alpha", full_chain("alpha"))], settings());

    let stale = DetectionResult::logged_in(Some("stale".to_string()), None)
        .observed_at(Utc::now() - chrono::Duration::hours(2));
    orchestrator
        .cache()
        .put("alpha", stale, Duration::from_secs(3_600))
        .await
        .unwrap();

    let result = orchestrator.detect("alpha", false).await.unwrap();

    assert_eq!(result.username.as_deref(), Some("fresh"));
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test]
async fn test_inconclusive_api_never_claims_login() {
    let host = FakeHost::new();
    host.cookie("alpha.example", "sid", "s1");
    let fetcher = FakeFetcher::new();
    fetcher.fail("https://api.alpha.example/me", "connection reset");
    let orchestrator = build(&host, &fetcher, vec![descriptor("alpha", full_chain("alpha"))], settings());

    let result = orchestrator.detect("alpha", false).await.unwrap();

    assert!(!result.logged_in);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_batch_detection_returns_every_platform() {
    let host = FakeHost::new();
    host.cookie("beta.example", "sid", "s1");
    let fetcher = FakeFetcher::new();
    fetcher.json(
        "https://api.beta.example/me",
        200,
        json!({"code": 0, "data": {"name": "b"}}),
    );
    let orchestrator = build(
        &host,
        &fetcher,
        vec![
            descriptor("alpha", full_chain("alpha")),
            descriptor("beta", full_chain("beta")),
        ],
        settings(),
    );

    let results = orchestrator
        .detect_all(&ids(&["alpha", "beta", "nowhere"]), false)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(!results["alpha"].logged_in);
    assert!(results["beta"].logged_in);
    assert!(results["nowhere"].error.is_some());
}

// ---------------------------------------------------------------------------
// Sync sessions
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_stuck_platform_fails_while_others_finish() {
    let host = FakeHost::new();
    editor_ready(&host);
    host.on_script_at("two.example", scripts::READY_MARKER, ScriptReply::value(false));
    let orchestrator = build(
        &host,
        &FakeFetcher::new(),
        vec![
            descriptor("one", DetectionPlan::new(vec![])),
            descriptor("two", DetectionPlan::new(vec![])),
            descriptor("three", DetectionPlan::new(vec![])),
        ],
        settings(),
    );
    let mut session = orchestrator.start_batch();
    let mut sink = Recorder::default();

    orchestrator
        .publish_progressive(
            &mut session,
            &ids(&["one", "two", "three"]),
            article(),
            &mut sink,
            &CancelHandle::new(),
        )
        .await;

    assert_eq!(session.len(), 3);
    assert!(session.outcome("one").unwrap().succeeded());
    assert!(session.outcome("three").unwrap().succeeded());
    let two = session.outcome("two").unwrap();
    assert_eq!(two.state, SyncState::Failed);
    assert_eq!(two.failure, Some(FailureKind::SurfaceTimeout));

    assert_eq!(sink.completed, Some(3));
    assert_eq!(sink.items.len(), 3);
    assert!(sink
        .states
        .contains(&("two".to_string(), SyncState::WaitingReady)));

    let group = session.group_token().await.unwrap();
    assert_eq!(host.group_members(&group).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_empty_paste_gets_exactly_one_native_fallback() {
    let host = FakeHost::new();
    editor_ready(&host);
    host.on_script(scripts::VERIFY_MARKER, ScriptReply::value(0));
    let orchestrator = build(
        &host,
        &FakeFetcher::new(),
        vec![descriptor("alpha", DetectionPlan::new(vec![]))],
        settings(),
    );
    let mut session = orchestrator.start_batch();

    let report = orchestrator
        .publish(&mut session, &ids(&["alpha"]), article())
        .await;

    let outcome = session.outcome("alpha").unwrap();
    assert_eq!(outcome.failure, Some(FailureKind::InjectionVerificationFailed));
    assert!(outcome.fallback_used);
    assert_eq!(host.evaluation_count(scripts::PASTE_MARKER), 1);
    assert_eq!(host.evaluation_count(scripts::NATIVE_MARKER), 1);
    assert_eq!(host.evaluation_count(scripts::VERIFY_MARKER), 2);
    assert_eq!(report["alpha"].status, crosspost_core::ReportStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_every_entry_terminal_within_budget_despite_hangs() {
    let host = FakeHost::new();
    editor_ready(&host);
    host.on_script_at("hang-ready.example", scripts::READY_MARKER, ScriptReply::Hang);
    host.on_script_at("hang-paste.example", scripts::PASTE_MARKER, ScriptReply::Hang);
    host.on_script_at("hang-verify.example", scripts::VERIFY_MARKER, ScriptReply::Hang);

    let names = ["ok", "hang-ready", "hang-paste", "hang-verify", "missing"];
    let descriptors = names[..4]
        .iter()
        .map(|id| descriptor(id, DetectionPlan::new(vec![])))
        .collect();
    let config = settings();
    let budget = Duration::from_millis(config.sync.platform_budget_ms);
    let orchestrator = build(&host, &FakeFetcher::new(), descriptors, config);
    let mut session = orchestrator.start_batch();

    let started = tokio::time::Instant::now();
    let report = orchestrator.publish(&mut session, &ids(&names), article()).await;
    let elapsed = started.elapsed();

    assert_eq!(report.len(), names.len());
    assert!(session.all_terminal());
    assert!(elapsed <= budget * names.len() as u32);

    let failures: BTreeMap<&str, Option<FailureKind>> = names
        .iter()
        .map(|id| (*id, session.outcome(id).unwrap().failure))
        .collect();
    assert_eq!(failures["ok"], None);
    assert_eq!(failures["hang-ready"], Some(FailureKind::SurfaceTimeout));
    assert_eq!(failures["hang-paste"], Some(FailureKind::Timeout));
    assert_eq!(
        failures["hang-verify"],
        Some(FailureKind::Timeout)
    );
    assert_eq!(failures["missing"], Some(FailureKind::UnregisteredPlatform));
}
