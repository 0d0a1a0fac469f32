//! NDJSON event output
//!
//! Every command reports on stdout as newline-delimited JSON, one object per
//! line, tagged with `"event"` and a millisecond `timestamp`. Logs go to the
//! log file so stdout stays machine-readable.
//!
//! ```json
//! {"event":"detection","platform_id":"csdn","logged_in":true,"username":"dev","completed":1,"total":3,"timestamp":1704700001000}
//! {"event":"sync_state","platform_id":"juejin","state":"waiting_ready","timestamp":1704700002000}
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crosspost_core::prelude::*;
use crosspost_core::{
    DetectionResult, FailureKind, InjectionMethod, PlatformDescriptor, PlatformId, ReportStatus,
    SyncOutcome, SyncReport, SyncState,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A registered platform
    Platform {
        id: String,
        name: String,
        entry_url: String,
        timestamp: i64,
    },

    /// Login state of one platform
    Detection {
        platform_id: String,
        logged_in: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        avatar_ref: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
        timestamp: i64,
    },

    /// Every requested platform was detected
    DetectionComplete { total: usize, timestamp: i64 },

    SessionStarted {
        session_id: String,
        platforms: Vec<String>,
        timestamp: i64,
    },

    /// A platform's sync pipeline moved to a new state
    SyncState {
        platform_id: String,
        state: SyncState,
        timestamp: i64,
    },

    /// A platform's sync pipeline finished
    SyncResult {
        platform_id: String,
        status: ReportStatus,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        method: Option<InjectionMethod>,
        fallback_used: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
        completed: usize,
        total: usize,
        timestamp: i64,
    },

    /// Final `platform_id → {status, message}` map of a session
    SessionReport {
        session_id: String,
        report: BTreeMap<PlatformId, SyncReport>,
        timestamp: i64,
    },

    CacheCleared { count: usize, timestamp: i64 },

    ConfigWritten {
        path: String,
        created: bool,
        timestamp: i64,
    },

    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl Event {
    /// Write this event to stdout as one JSON line
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────

    pub fn platform(descriptor: &PlatformDescriptor) -> Self {
        Self::Platform {
            id: descriptor.id.clone(),
            name: descriptor.display_name.clone(),
            entry_url: descriptor.entry_url.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn detection(platform_id: &str, result: &DetectionResult) -> Self {
        Self::Detection {
            platform_id: platform_id.to_string(),
            logged_in: result.logged_in,
            username: result.username.clone(),
            avatar_ref: result.avatar_ref.clone(),
            error: result.error.clone(),
            completed: None,
            total: None,
            timestamp: Self::now(),
        }
    }

    /// [`detection`](Self::detection) with progressive counters
    pub fn detection_progress(
        platform_id: &str,
        result: &DetectionResult,
        done: usize,
        of: usize,
    ) -> Self {
        let mut event = Self::detection(platform_id, result);
        if let Self::Detection {
            completed, total, ..
        } = &mut event
        {
            *completed = Some(done);
            *total = Some(of);
        }
        event
    }

    pub fn detection_complete(total: usize) -> Self {
        Self::DetectionComplete {
            total,
            timestamp: Self::now(),
        }
    }

    pub fn session_started(session_id: &str, platforms: &[String]) -> Self {
        Self::SessionStarted {
            session_id: session_id.to_string(),
            platforms: platforms.to_vec(),
            timestamp: Self::now(),
        }
    }

    pub fn sync_state(platform_id: &str, state: SyncState) -> Self {
        Self::SyncState {
            platform_id: platform_id.to_string(),
            state,
            timestamp: Self::now(),
        }
    }

    pub fn sync_result(outcome: &SyncOutcome, completed: usize, total: usize) -> Self {
        let report = outcome.report();
        Self::SyncResult {
            platform_id: outcome.platform_id.clone(),
            status: report.status,
            message: report.message,
            method: outcome.method,
            fallback_used: outcome.fallback_used,
            failure: outcome.failure,
            completed,
            total,
            timestamp: Self::now(),
        }
    }

    pub fn session_report(session_id: &str, report: BTreeMap<PlatformId, SyncReport>) -> Self {
        Self::SessionReport {
            session_id: session_id.to_string(),
            report,
            timestamp: Self::now(),
        }
    }

    pub fn cache_cleared(count: usize) -> Self {
        Self::CacheCleared {
            count,
            timestamp: Self::now(),
        }
    }

    pub fn config_written(path: &Path, created: bool) -> Self {
        Self::ConfigWritten {
            path: path.display().to_string(),
            created,
            timestamp: Self::now(),
        }
    }

    pub fn error(err: &Error) -> Self {
        Self::Error {
            message: err.to_string(),
            fatal: err.is_fatal(),
            timestamp: Self::now(),
        }
    }
}
