//! # crosspost-core - Core Domain Types
//!
//! Foundation crate for crosspost. Provides domain types, declarative
//! platform descriptors, the sync state machine, error handling and logging.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DetectionResult`], [`Detection`] - Login state and the tri-state strategy answer
//! - [`ContentPayload`] - Content handed to the sync engine
//! - [`SurfaceRef`], [`GroupToken`] - Opaque host handles
//!
//! ### Platform Descriptors (`platform`)
//! - [`PlatformDescriptor`] - Identity, detection plan and sync plan of one platform
//! - [`DetectionStrategy`], [`SyncStrategy`] - Tagged strategy descriptors
//!
//! ### Sync State Machine (`outcome`)
//! - [`SyncOutcome`], [`SyncState`], [`FailureKind`]
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use crosspost_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod outcome;
pub mod platform;
pub mod prelude;
pub mod types;

pub use error::{Error, Result, ResultExt};
pub use outcome::{
    FailureKind, InjectionMethod, ReportStatus, SyncOutcome, SyncReport, SyncState,
};
pub use platform::{
    ApiCall, ApiProbe, BodyFormat, CookieProbe, DetectionPlan, DetectionStrategy, EditorTargets,
    FieldSource, HttpMethod, LoginPredicate, PlatformDescriptor, PolicyStep, ProfileExtractor,
    ReadinessSignal, ResponseKind, ScrapeProbe, SurfaceProbe, SyncPlan, SyncStrategy,
    MAX_CACHE_TTL, MIN_CACHE_TTL, PAGE_LOAD_CEILING,
};
pub use types::{
    ContentPayload, Detection, DetectionResult, GroupToken, PlatformId, SurfaceRef,
};
