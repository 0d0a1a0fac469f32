//! Sync sessions
//!
//! A session is one publish batch: its group slot and one outcome per
//! platform. The caller owns it and hands it to every publish call.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crosspost_core::prelude::*;
use crosspost_core::{GroupToken, PlatformId, SyncOutcome, SyncReport};

/// Group token shared by the workers of one session
pub type GroupSlot = Arc<Mutex<Option<GroupToken>>>;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique id for a new session
pub fn next_session_id() -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sync-{}-{n}", Utc::now().format("%Y%m%d%H%M%S"))
}

#[derive(Debug)]
pub struct SyncSession {
    session_id: String,
    group: GroupSlot,
    entries: HashMap<PlatformId, SyncOutcome>,
    order: Vec<PlatformId>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            session_id: next_session_id(),
            group: Arc::new(Mutex::new(None)),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn group_slot(&self) -> GroupSlot {
        Arc::clone(&self.group)
    }

    pub async fn group_token(&self) -> Option<GroupToken> {
        self.group.lock().await.clone()
    }

    /// Store a platform's outcome; a second outcome for it is rejected
    pub fn record(&mut self, outcome: SyncOutcome) -> Result<()> {
        if self.entries.contains_key(&outcome.platform_id) {
            return Err(Error::DuplicateOutcome {
                platform: outcome.platform_id,
            });
        }
        self.order.push(outcome.platform_id.clone());
        self.entries.insert(outcome.platform_id.clone(), outcome);
        Ok(())
    }

    pub fn contains(&self, platform_id: &str) -> bool {
        self.entries.contains_key(platform_id)
    }

    pub fn outcome(&self, platform_id: &str) -> Option<&SyncOutcome> {
        self.entries.get(platform_id)
    }

    /// Outcomes in the order they were recorded
    pub fn outcomes(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_terminal(&self) -> bool {
        self.entries.values().all(SyncOutcome::is_terminal)
    }

    /// `platform_id → {status, message}` for the content source
    pub fn report(&self) -> BTreeMap<PlatformId, SyncReport> {
        self.entries
            .iter()
            .map(|(id, outcome)| (id.clone(), outcome.report()))
            .collect()
    }
}
