//! Per-platform sync state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{PlatformId, SurfaceRef};

/// Lifecycle of one platform within a sync session
///
/// `Pending → Opening → WaitingReady → Injecting → Verifying → {Done | Failed}`;
/// every non-terminal state may also move straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Opening,
    WaitingReady,
    Injecting,
    Verifying,
    Done,
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Done | SyncState::Failed)
    }

    /// The regular successor of this state
    pub fn next(&self) -> Option<SyncState> {
        match self {
            SyncState::Pending => Some(SyncState::Opening),
            SyncState::Opening => Some(SyncState::WaitingReady),
            SyncState::WaitingReady => Some(SyncState::Injecting),
            SyncState::Injecting => Some(SyncState::Verifying),
            SyncState::Verifying => Some(SyncState::Done),
            SyncState::Done | SyncState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: SyncState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == SyncState::Failed || self.next() == Some(to)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Opening => "opening",
            SyncState::WaitingReady => "waiting_ready",
            SyncState::Injecting => "injecting",
            SyncState::Verifying => "verifying",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an outcome ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The editor never became ready within its budget
    SurfaceTimeout,
    /// Content could not be confirmed in the editor, even after the fallback
    InjectionVerificationFailed,
    UnregisteredPlatform,
    /// Draft creation through the platform API failed
    DraftCreate,
    /// The host refused an operation (surface, script, navigation)
    Host,
    /// The per-platform budget ran out after the editor was ready
    Timeout,
    Cancelled,
}

/// Technique that placed the content into the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMethod {
    NativeValueSet,
    ClipboardPaste,
    FileImport,
}

/// Result of syncing one platform in one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub platform_id: PlatformId,
    pub state: SyncState,
    pub surface: Option<SurfaceRef>,
    pub method: Option<InjectionMethod>,
    pub fallback_used: bool,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncOutcome {
    pub fn new(platform_id: impl Into<PlatformId>) -> Self {
        Self {
            platform_id: platform_id.into(),
            state: SyncState::Pending,
            surface: None,
            method: None,
            fallback_used: false,
            failure: None,
            message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting skips, back-steps and moves out of a terminal state
    pub fn advance(&mut self, next: SyncState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                platform: self.platform_id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Finish successfully; only valid from `Verifying`
    pub fn complete(&mut self, message: impl Into<String>) -> Result<()> {
        self.advance(SyncState::Done)?;
        self.message = Some(message.into());
        Ok(())
    }

    /// Mark the outcome failed
    ///
    /// Returns `false` without touching the outcome when it is already terminal.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SyncState::Failed;
        self.failure = Some(kind);
        self.message = Some(message.into());
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.state == SyncState::Done
    }

    /// Summary handed back to the content source
    pub fn report(&self) -> SyncReport {
        SyncReport {
            status: if self.succeeded() {
                ReportStatus::Done
            } else {
                ReportStatus::Failed
            },
            message: self.message.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Done,
    Failed,
}

/// `{status: done|failed, message}` for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: ReportStatus,
    pub message: String,
}
