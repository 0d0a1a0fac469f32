//! TTL-keyed detection result cache
//!
//! One entry per platform under `<platform_id>_user`. Each key has its own
//! async lock so concurrent detections of different platforms never block
//! each other while a read-modify-write on one key is atomic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crosspost_core::prelude::*;
use crosspost_core::{DetectionResult, PlatformId, MAX_CACHE_TTL, MIN_CACHE_TTL};
use crosspost_host::KvStore;

const KEY_SUFFIX: &str = "_user";

/// A cached definitive login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub platform_id: PlatformId,
    pub result: DetectionResult,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(platform_id: impl Into<PlatformId>, result: DetectionResult, ttl: Duration) -> Self {
        Self {
            platform_id: platform_id.into(),
            result,
            ttl_secs: ttl.clamp(MIN_CACHE_TTL, MAX_CACHE_TTL).as_secs(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX));
        self.result
            .observed_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

pub fn cache_key(platform_id: &str) -> String {
    format!("{platform_id}{KEY_SUFFIX}")
}

pub struct ResultCache<S> {
    store: S,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: KvStore + Sync> ResultCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Unexpired entry for `platform_id`
    ///
    /// Expired and unreadable entries are deleted and reported as a miss.
    pub async fn get_valid(
        &self,
        platform_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let key = cache_key(platform_id);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) if entry.is_expired(now) => {
                debug!(
                    "Cache entry for {} expired at {}",
                    platform_id,
                    entry.expires_at()
                );
                self.store.delete(&key).await?;
                Ok(None)
            }
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Dropping unreadable cache entry for {}: {}", platform_id, e);
                self.store.delete(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put(&self, platform_id: &str, result: DetectionResult, ttl: Duration) -> Result<()> {
        let key = cache_key(platform_id);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let entry = CacheEntry::new(platform_id, result, ttl);
        trace!("Caching {} for {}s", platform_id, entry.ttl_secs);
        self.store.set(&key, serde_json::to_value(&entry)?).await
    }

    pub async fn invalidate(&self, platform_id: &str) -> Result<()> {
        let key = cache_key(platform_id);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;
        self.store.delete(&key).await
    }

    /// Delete the entries for `platform_ids`, or every entry when empty
    ///
    /// Returns the number of platforms cleared.
    pub async fn clear(&self, platform_ids: &[String]) -> Result<usize> {
        let ids: Vec<String> = if platform_ids.is_empty() {
            self.store
                .keys()
                .await?
                .into_iter()
                .filter_map(|k| k.strip_suffix(KEY_SUFFIX).map(str::to_string))
                .collect()
        } else {
            platform_ids.to_vec()
        };

        for id in &ids {
            self.invalidate(id).await?;
        }
        info!("Cleared {} cached detection result(s)", ids.len());
        Ok(ids.len())
    }
}
