//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Host Automation Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Host error: {message}")]
    Host { message: String },

    #[error("Surface not found: {surface}")]
    SurfaceNotFound { surface: String },

    #[error("Script evaluation failed: {message}")]
    Script { message: String },

    #[error("DevTools protocol error: {message}")]
    Protocol { message: String },

    #[error("Surface group no longer exists: {group}")]
    GroupMissing { group: String },

    // ─────────────────────────────────────────────────────────────
    // Network Errors
    // ─────────────────────────────────────────────────────────────
    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("Request to {url} timed out after {elapsed:?}")]
    Timeout { url: String, elapsed: Duration },

    // ─────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Storage error: {message}")]
    Store { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Startup error: {message}")]
    Startup { message: String },

    // ─────────────────────────────────────────────────────────────
    // Orchestration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Unregistered platform: {id}")]
    UnregisteredPlatform { id: String },

    #[error("Duplicate platform id: {id}")]
    DuplicatePlatform { id: String },

    #[error("Session already holds an outcome for {platform}")]
    DuplicateOutcome { platform: String },

    #[error("Surface for {platform} was not ready after {waited:?}")]
    SurfaceTimeout { platform: String, waited: Duration },

    #[error("Injection into {platform} could not be verified: {reason}")]
    InjectionVerificationFailed { platform: String, reason: String },

    #[error("Invalid sync transition for {platform}: {from} -> {to}")]
    InvalidTransition {
        platform: String,
        from: String,
        to: String,
    },

    #[error("Draft creation failed: {message}")]
    DraftCreate { message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    pub fn surface_not_found(surface: impl Into<String>) -> Self {
        Self::SurfaceNotFound {
            surface: surface.into(),
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn group_missing(group: impl Into<String>) -> Self {
        Self::GroupMissing {
            group: group.into(),
        }
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    pub fn timeout(url: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            url: url.into(),
            elapsed,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    pub fn unregistered(id: impl Into<String>) -> Self {
        Self::UnregisteredPlatform { id: id.into() }
    }

    pub fn surface_timeout(platform: impl Into<String>, waited: Duration) -> Self {
        Self::SurfaceTimeout {
            platform: platform.into(),
            waited,
        }
    }

    pub fn verification_failed(platform: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InjectionVerificationFailed {
            platform: platform.into(),
            reason: reason.into(),
        }
    }

    pub fn draft_create(message: impl Into<String>) -> Self {
        Self::DraftCreate {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are scoped to a single platform; the batch carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Host { .. }
                | Error::SurfaceNotFound { .. }
                | Error::Script { .. }
                | Error::Protocol { .. }
                | Error::GroupMissing { .. }
                | Error::Http { .. }
                | Error::Timeout { .. }
                | Error::ChannelSend { .. }
                | Error::UnregisteredPlatform { .. }
                | Error::SurfaceTimeout { .. }
                | Error::InjectionVerificationFailed { .. }
                | Error::DraftCreate { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::DuplicatePlatform { .. }
                | Error::Startup { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions (for use with color-eyre)
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
