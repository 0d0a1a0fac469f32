//! CLI command implementations
//!
//! Each command reports its results as NDJSON [`Event`]s on stdout.

use std::path::{Path, PathBuf};

use crosspost_app::config::{self, Settings};
use crosspost_app::{
    configured_registry, open_cache, CancelHandle, LiveOrchestrator, ProgressSink,
};
use crosspost_core::prelude::*;
use crosspost_core::{DetectionResult, SyncOutcome, SyncState};

use crate::events::Event;
use crate::markdown;

/// Load settings from `path`, or the default location, then apply CLI overrides
pub fn load_settings(path: Option<&Path>, devtools: Option<String>) -> Settings {
    let mut settings = match path {
        Some(path) => config::load_settings(path),
        None => config::load_default_settings(),
    };
    if let Some(url) = devtools {
        debug!("DevTools endpoint overridden: {}", url);
        settings.host.devtools_url = url;
    }
    settings
}

/// Cancel `cancel` on Ctrl-C
fn cancel_on_interrupt(cancel: &CancelHandle) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

// ─────────────────────────────────────────────────────────────
// platforms
// ─────────────────────────────────────────────────────────────

pub fn platforms(settings: &Settings) -> Result<()> {
    let registry = configured_registry(settings);
    for descriptor in registry.list_all() {
        Event::platform(descriptor).emit();
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
// detect
// ─────────────────────────────────────────────────────────────

struct DetectionEvents;

impl ProgressSink<DetectionResult> for DetectionEvents {
    fn on_item(&mut self, platform_id: &str, result: &DetectionResult, completed: usize, total: usize) {
        Event::detection_progress(platform_id, result, completed, total).emit();
    }

    fn on_complete(&mut self, total: usize) {
        Event::detection_complete(total).emit();
    }
}

pub async fn detect(
    settings: &Settings,
    platform_ids: &[String],
    progressive: bool,
    refresh: bool,
) -> Result<()> {
    let orchestrator = LiveOrchestrator::connect(settings).await?;

    if progressive {
        let cancel = CancelHandle::new();
        cancel_on_interrupt(&cancel);
        let stream = orchestrator.detect_progressive(platform_ids, refresh, &cancel);
        stream.drive(&mut DetectionEvents).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        return Ok(());
    }

    let results = orchestrator.detect_all(platform_ids, refresh).await?;
    for (platform_id, result) in &results {
        Event::detection(platform_id, result).emit();
    }
    Event::detection_complete(results.len()).emit();
    Ok(())
}

// ─────────────────────────────────────────────────────────────
// publish
// ─────────────────────────────────────────────────────────────

struct SyncEvents;

impl ProgressSink<SyncOutcome> for SyncEvents {
    fn on_update(&mut self, platform_id: &str, state: SyncState) {
        Event::sync_state(platform_id, state).emit();
    }

    fn on_item(&mut self, _platform_id: &str, outcome: &SyncOutcome, completed: usize, total: usize) {
        Event::sync_result(outcome, completed, total).emit();
    }
}

pub async fn publish(
    settings: &Settings,
    file: &Path,
    title: Option<String>,
    platform_ids: &[String],
) -> Result<()> {
    let payload = markdown::load_payload(file, title)?;
    let orchestrator = LiveOrchestrator::connect(settings).await?;

    let ids: Vec<String> = if platform_ids.is_empty() {
        orchestrator.registry().ids()
    } else {
        platform_ids.to_vec()
    };

    let mut session = orchestrator.start_batch();
    Event::session_started(session.session_id(), &ids).emit();

    let cancel = CancelHandle::new();
    cancel_on_interrupt(&cancel);
    orchestrator
        .publish_progressive(&mut session, &ids, payload, &mut SyncEvents, &cancel)
        .await;

    info!(
        "Session {} finished: {} of {} platforms done",
        session.session_id(),
        session.outcomes().filter(|o| o.succeeded()).count(),
        session.len()
    );
    Event::session_report(session.session_id(), session.report()).emit();
    Ok(())
}

// ─────────────────────────────────────────────────────────────
// cache clear / init
// ─────────────────────────────────────────────────────────────

pub async fn clear_cache(settings: &Settings, platform_ids: &[String]) -> Result<()> {
    let cache = open_cache(settings)?;
    let count = cache.clear(platform_ids).await?;
    Event::cache_cleared(count).emit();
    Ok(())
}

pub fn init(path: Option<PathBuf>) -> Result<()> {
    let path = match path.or_else(config::config_path) {
        Some(path) => path,
        None => return Err(Error::config("No configuration directory on this system")),
    };
    let created = config::init_config(&path)?;
    Event::config_written(&path, created).emit();
    Ok(())
}
