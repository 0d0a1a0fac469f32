//! Orchestrator facade
//!
//! Ties the registry, detection chain, result cache and sync engine together
//! behind the operations the CLI (or any other front end) calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crosspost_core::prelude::*;
use crosspost_core::{
    ContentPayload, DetectionResult, FailureKind, PlatformDescriptor, PlatformId, SyncOutcome,
    SyncReport, SyncState,
};
use crosspost_host::{CdpHost, FileKvStore, HostSurface, HttpFetcher, KvStore, ReqwestFetcher};

use crate::cache::ResultCache;
use crate::config::Settings;
use crate::detection::DetectionChain;
use crate::progress::{self, CancelHandle, ProgressSink, ProgressStream};
use crate::registry::PlatformRegistry;
use crate::session::SyncSession;
use crate::sync::SyncEngine;

/// Orchestrator over the production adapters
pub type LiveOrchestrator = Orchestrator<CdpHost, ReqwestFetcher, FileKvStore>;

pub struct Orchestrator<H, F, S> {
    registry: Arc<PlatformRegistry>,
    chain: Arc<DetectionChain<H, F, S>>,
    engine: Arc<SyncEngine<H, F>>,
    sync_slots: Arc<Semaphore>,
}

/// Registry with the built-in catalog and the `[platforms]` settings applied
pub fn configured_registry(settings: &Settings) -> PlatformRegistry {
    let mut registry = PlatformRegistry::builtin();
    registry.apply_settings(&settings.platforms, settings.cache.default_ttl_secs);
    registry
}

/// Result cache backed by the configured cache file
pub fn open_cache(settings: &Settings) -> Result<ResultCache<FileKvStore>> {
    let path = match &settings.cache.path {
        Some(path) => path.clone(),
        None => FileKvStore::default_path()?,
    };
    debug!("Result cache at {}", path.display());
    Ok(ResultCache::new(FileKvStore::new(path)))
}

impl LiveOrchestrator {
    /// Connect to the browser and build the production stack
    pub async fn connect(settings: &Settings) -> Result<Self> {
        info!("Connecting to browser at {}", settings.host.devtools_url);
        let host = CdpHost::connect(&settings.host.devtools_url).await?;
        let fetcher = ReqwestFetcher::new(settings.detection.api_timeout())?;
        let cache = open_cache(settings)?;
        Ok(Self::new(
            configured_registry(settings),
            Arc::new(host),
            Arc::new(fetcher),
            cache,
            settings,
        ))
    }
}

impl<H, F, S> Orchestrator<H, F, S>
where
    H: HostSurface + Send + Sync + 'static,
    F: HttpFetcher + Send + Sync + 'static,
    S: KvStore + Send + Sync + 'static,
{
    pub fn new(
        registry: PlatformRegistry,
        host: Arc<H>,
        fetcher: Arc<F>,
        cache: ResultCache<S>,
        settings: &Settings,
    ) -> Self {
        let chain = DetectionChain::new(
            Arc::clone(&host),
            Arc::clone(&fetcher),
            Arc::new(cache),
            settings.detection.clone(),
        );
        let engine = SyncEngine::new(
            host,
            fetcher,
            settings.sync.clone(),
            settings.detection.api_timeout(),
        );
        Self {
            registry: Arc::new(registry),
            chain: Arc::new(chain),
            engine: Arc::new(engine),
            sync_slots: Arc::new(Semaphore::new(settings.sync.max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache<S> {
        self.chain.cache()
    }

    /// Enabled platforms in registration order
    pub fn platforms(&self) -> Vec<&PlatformDescriptor> {
        self.registry.list_all()
    }

    // ─────────────────────────────────────────────────────────────
    // Detection
    // ─────────────────────────────────────────────────────────────

    pub async fn detect(&self, platform_id: &str, refresh: bool) -> Result<DetectionResult> {
        let descriptor = self.registry.lookup(platform_id)?;
        Ok(self.chain.detect(descriptor, refresh).await)
    }

    /// Detect many platforms in parallel; results arrive in completion order
    ///
    /// An empty `platform_ids` means every enabled platform.
    pub fn detect_progressive(
        &self,
        platform_ids: &[String],
        refresh: bool,
        cancel: &CancelHandle,
    ) -> ProgressStream<DetectionResult> {
        let ids = self.resolve_ids(platform_ids);
        let (tx, stream) = progress::channel(ids.len(), cancel);
        let mut workers = JoinSet::new();

        for id in ids {
            let descriptor = match self.registry.lookup(&id) {
                Ok(descriptor) => descriptor.clone(),
                Err(e) => {
                    warn!("{}", e);
                    tx.finished(&id, DetectionResult::failed(e.to_string()));
                    continue;
                }
            };
            let chain = Arc::clone(&self.chain);
            let tx = tx.clone();
            workers.spawn(async move {
                let result = chain.detect(&descriptor, refresh).await;
                tx.finished(&descriptor.id, result);
            });
        }

        progress::supervise(workers, cancel.clone());
        stream
    }

    /// Batch detection: the full `platform_id → result` map
    pub async fn detect_all(
        &self,
        platform_ids: &[String],
        refresh: bool,
    ) -> Result<BTreeMap<PlatformId, DetectionResult>> {
        self.detect_progressive(platform_ids, refresh, &CancelHandle::new())
            .collect()
            .await
    }

    /// Drop cached results; an empty list clears every platform
    pub async fn reset_cache(&self, platform_ids: &[String]) -> Result<usize> {
        self.chain.cache().clear(platform_ids).await
    }

    // ─────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────

    /// A fresh session with no group yet
    pub fn start_batch(&self) -> SyncSession {
        let session = SyncSession::new();
        info!("Started sync session {}", session.session_id());
        session
    }

    /// Start one worker per platform, bounded by `sync.max_concurrent`
    ///
    /// Platforms the session already holds an outcome for are skipped.
    pub fn publish_stream(
        &self,
        session: &SyncSession,
        platform_ids: &[String],
        payload: ContentPayload,
        cancel: &CancelHandle,
    ) -> ProgressStream<SyncOutcome> {
        let ids: Vec<String> = self
            .resolve_ids(platform_ids)
            .into_iter()
            .filter(|id| {
                let seen = session.contains(id);
                if seen {
                    warn!("Session {} already synced {}", session.session_id(), id);
                }
                !seen
            })
            .collect();
        let (tx, stream) = progress::channel(ids.len(), cancel);
        let payload = Arc::new(payload);
        let mut workers = JoinSet::new();

        for id in ids {
            let descriptor = match self.registry.lookup(&id) {
                Ok(descriptor) => descriptor.clone(),
                Err(e) => {
                    warn!("{}", e);
                    let mut outcome = SyncOutcome::new(&id);
                    outcome.fail(FailureKind::UnregisteredPlatform, e.to_string());
                    tx.finished(&id, outcome);
                    continue;
                }
            };
            let engine = Arc::clone(&self.engine);
            let slots = Arc::clone(&self.sync_slots);
            let payload = Arc::clone(&payload);
            let group = session.group_slot();
            let tx = tx.clone();

            workers.spawn(async move {
                let _permit = match slots.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let mut outcome = SyncOutcome::new(&descriptor.id);
                        outcome.fail(FailureKind::Cancelled, "sync slots closed");
                        tx.finished(&descriptor.id, outcome);
                        return;
                    }
                };
                let observer = |outcome: &SyncOutcome| {
                    if !outcome.is_terminal() {
                        tx.update(&outcome.platform_id, outcome.state);
                    }
                };
                let outcome = engine
                    .sync_platform(&descriptor, &payload, &group, &observer)
                    .await;
                tx.finished(&descriptor.id, outcome);
            });
        }

        progress::supervise(workers, cancel.clone());
        stream
    }

    /// Sync `platform_ids`, reporting each outcome to `sink` as it arrives
    ///
    /// Every requested platform ends with an entry in the session. Platforms
    /// still running when `cancel` fires are recorded as cancelled; a worker
    /// that dies without reporting is recorded as a host failure.
    pub async fn publish_progressive<K>(
        &self,
        session: &mut SyncSession,
        platform_ids: &[String],
        payload: ContentPayload,
        sink: &mut K,
        cancel: &CancelHandle,
    ) -> usize
    where
        K: ProgressSink<SyncOutcome> + ?Sized,
    {
        let ids = self.resolve_ids(platform_ids);
        let stream = self.publish_stream(session, &ids, payload, cancel);
        let mut recording = RecordingSink {
            session: &mut *session,
            inner: sink,
        };
        let total = stream.total();
        let completed = stream.drive(&mut recording).await;

        // Every requested platform ends the session with exactly one outcome,
        // including workers that died before reporting
        let cancelled = cancel.is_cancelled();
        let mut reported = completed;
        for id in ids {
            if session.contains(&id) {
                continue;
            }
            let mut outcome = SyncOutcome::new(&id);
            if cancelled {
                outcome.fail(FailureKind::Cancelled, "sync cancelled");
            } else {
                warn!("No outcome reported for {}", id);
                outcome.fail(FailureKind::Host, "worker ended without a result");
                reported += 1;
                sink.on_item(&id, &outcome, reported, total);
            }
            if let Err(e) = session.record(outcome) {
                warn!("{}", e);
            }
        }
        completed
    }

    /// Batch sync: wait for every platform and return the session report
    pub async fn publish(
        &self,
        session: &mut SyncSession,
        platform_ids: &[String],
        payload: ContentPayload,
    ) -> BTreeMap<PlatformId, SyncReport> {
        let mut sink = NullSink;
        self.publish_progressive(session, platform_ids, payload, &mut sink, &CancelHandle::new())
            .await;
        session.report()
    }

    fn resolve_ids(&self, platform_ids: &[String]) -> Vec<String> {
        if platform_ids.is_empty() {
            return self.registry.ids();
        }
        let mut ids: Vec<String> = Vec::with_capacity(platform_ids.len());
        for id in platform_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

struct NullSink;

impl ProgressSink<SyncOutcome> for NullSink {
    fn on_item(&mut self, _: &str, _: &SyncOutcome, _: usize, _: usize) {}
}

/// Records outcomes into the session before forwarding them
struct RecordingSink<'a, K: ?Sized> {
    session: &'a mut SyncSession,
    inner: &'a mut K,
}

impl<K> ProgressSink<SyncOutcome> for RecordingSink<'_, K>
where
    K: ProgressSink<SyncOutcome> + ?Sized,
{
    fn on_update(&mut self, platform_id: &str, state: SyncState) {
        self.inner.on_update(platform_id, state);
    }

    fn on_item(&mut self, platform_id: &str, result: &SyncOutcome, completed: usize, total: usize) {
        if let Err(e) = self.session.record(result.clone()) {
            warn!("{}", e);
        }
        self.inner.on_item(platform_id, result, completed, total);
    }

    fn on_complete(&mut self, total: usize) {
        self.inner.on_complete(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::scripts;
    use crosspost_core::{
        CookieProbe, DetectionPlan, DetectionStrategy, EditorTargets, ReadinessSignal, SyncPlan,
        SyncStrategy,
    };
    use crosspost_host::test_utils::{FakeFetcher, FakeHost, ScriptReply};
    use crosspost_host::MemoryKvStore;
    use serde_json::json;

    fn platform(id: &str) -> PlatformDescriptor {
        PlatformDescriptor {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            entry_url: format!("https://{id}.example/editor"),
            detection: DetectionPlan::new(vec![DetectionStrategy::CookiePresence(
                CookieProbe::new(&format!("https://{id}.example/"), &["sid"]),
            )]),
            sync: SyncPlan::new(
                SyncStrategy::NativeValueSet {
                    targets: EditorTargets::new(Some("#title"), "textarea"),
                    format: Default::default(),
                },
                ReadinessSignal::selector("textarea"),
            ),
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.sync.settle_ms = 0;
        settings
    }

    fn orchestrator(host: &FakeHost) -> Orchestrator<FakeHost, FakeFetcher, MemoryKvStore> {
        orchestrator_with(host, settings())
    }

    fn orchestrator_with(
        host: &FakeHost,
        settings: Settings,
    ) -> Orchestrator<FakeHost, FakeFetcher, MemoryKvStore> {
        let mut registry = PlatformRegistry::new();
        for id in ["alpha", "beta"] {
            registry.register(platform(id)).unwrap();
        }
        Orchestrator::new(
            registry,
            Arc::new(host.clone()),
            Arc::new(FakeFetcher::new()),
            ResultCache::new(MemoryKvStore::new()),
            &settings,
        )
    }

    fn editor_ready(host: &FakeHost) {
        host.on_script(scripts::READY_MARKER, ScriptReply::value(true));
        host.on_script(scripts::NATIVE_MARKER, ScriptReply::value(json!({"ok": true})));
        host.on_script(scripts::VERIFY_MARKER, ScriptReply::value(12));
    }

    #[tokio::test]
    async fn test_detect_unknown_platform_is_error() {
        let orchestrator = orchestrator(&FakeHost::new());
        let err = orchestrator.detect("myspace", false).await.unwrap_err();
        assert!(matches!(err, Error::UnregisteredPlatform { .. }));
    }

    #[tokio::test]
    async fn test_detect_all_covers_every_requested_id() {
        let host = FakeHost::new();
        host.cookie("alpha.example", "sid", "1");
        let orchestrator = orchestrator(&host);

        let ids = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let results = orchestrator.detect_all(&ids, false).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results["alpha"].logged_in);
        assert!(!results["beta"].logged_in);
        assert!(results["gamma"].error.is_some());
    }

    #[tokio::test]
    async fn test_empty_selection_means_all_platforms() {
        let orchestrator = orchestrator(&FakeHost::new());
        let results = orchestrator.detect_all(&[], false).await.unwrap();
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_records_every_platform() {
        let host = FakeHost::new();
        editor_ready(&host);
        let orchestrator = orchestrator(&host);
        let mut session = orchestrator.start_batch();

        let ids = vec!["alpha".to_string(), "myspace".to_string(), "beta".to_string()];
        let report = orchestrator
            .publish(&mut session, &ids, ContentPayload::new("T").with_markdown("body"))
            .await;

        assert_eq!(report.len(), 3);
        assert_eq!(session.len(), 3);
        assert!(session.all_terminal());
        assert_eq!(
            session.outcome("myspace").unwrap().failure,
            Some(FailureKind::UnregisteredPlatform)
        );
        assert!(session.outcome("alpha").unwrap().succeeded());

        let group = session.group_token().await.unwrap();
        assert_eq!(host.group_members(&group).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_skips_platforms_already_in_session() {
        let host = FakeHost::new();
        editor_ready(&host);
        let orchestrator = orchestrator(&host);
        let mut session = orchestrator.start_batch();
        let ids = vec!["alpha".to_string()];

        orchestrator
            .publish(&mut session, &ids, ContentPayload::new("T").with_markdown("x"))
            .await;
        orchestrator
            .publish(&mut session, &ids, ContentPayload::new("T").with_markdown("x"))
            .await;

        assert_eq!(session.len(), 1);
        assert_eq!(host.opened_urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_publish_records_cancelled_entries() {
        struct CancelOnFirst(CancelHandle);
        impl ProgressSink<SyncOutcome> for CancelOnFirst {
            fn on_item(&mut self, _: &str, _: &SyncOutcome, _: usize, _: usize) {
                self.0.cancel();
            }
        }

        let host = FakeHost::new();
        editor_ready(&host);
        host.on_script_at("beta.example", scripts::READY_MARKER, ScriptReply::Hang);
        let mut parallel = settings();
        parallel.sync.max_concurrent = 2;
        let orchestrator = orchestrator_with(&host, parallel);
        let mut session = orchestrator.start_batch();
        let cancel = CancelHandle::new();
        let mut sink = CancelOnFirst(cancel.clone());

        let ids = vec!["alpha".to_string(), "beta".to_string()];
        let completed = orchestrator
            .publish_progressive(
                &mut session,
                &ids,
                ContentPayload::new("T").with_markdown("x"),
                &mut sink,
                &cancel,
            )
            .await;

        assert_eq!(completed, 1);
        assert_eq!(session.len(), 2);
        assert_eq!(
            session.outcome("beta").unwrap().failure,
            Some(FailureKind::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_panicked_worker_still_gets_an_outcome() {
        #[derive(Default)]
        struct Items(Vec<(String, usize, usize)>);
        impl ProgressSink<SyncOutcome> for Items {
            fn on_item(&mut self, id: &str, _: &SyncOutcome, completed: usize, total: usize) {
                self.0.push((id.to_string(), completed, total));
            }
        }

        let host = FakeHost::new();
        editor_ready(&host);
        host.on_script_at("beta.example", scripts::READY_MARKER, ScriptReply::Panic);
        let orchestrator = orchestrator(&host);
        let mut session = orchestrator.start_batch();
        let mut sink = Items::default();

        let ids = vec!["alpha".to_string(), "beta".to_string()];
        let completed = orchestrator
            .publish_progressive(
                &mut session,
                &ids,
                ContentPayload::new("T").with_markdown("x"),
                &mut sink,
                &CancelHandle::new(),
            )
            .await;

        assert_eq!(completed, 1);
        assert_eq!(session.len(), 2);
        assert!(session.outcome("alpha").unwrap().succeeded());
        let beta = session.outcome("beta").unwrap();
        assert_eq!(beta.failure, Some(FailureKind::Host));
        assert_eq!(sink.0.last(), Some(&("beta".to_string(), 2, 2)));
    }

    #[tokio::test]
    async fn test_reset_cache_clears_entries() {
        let host = FakeHost::new();
        host.cookie("alpha.example", "sid", "1");
        let orchestrator = orchestrator(&host);
        orchestrator.detect("alpha", false).await.unwrap();
        assert_eq!(orchestrator.reset_cache(&[]).await.unwrap(), 1);
    }
}
