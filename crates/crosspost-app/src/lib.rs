//! # crosspost-app - Detection, Sync and Orchestration
//!
//! The orchestration layer of crosspost. Depends on [`crosspost_core`] for
//! domain types and on [`crosspost_host`] for the host, HTTP and storage
//! traits it drives.
//!
//! ## Public API
//!
//! ### Facade
//! - [`Orchestrator`] - Platform listing, detection, sync sessions and cache reset
//! - [`LiveOrchestrator`] - The orchestrator over the CDP host, reqwest and the cache file
//!
//! ### Building Blocks
//! - [`PlatformRegistry`] - Descriptors by id, with the built-in [`catalog`]
//! - [`DetectionChain`] - Ordered login detection with a TTL [`ResultCache`]
//! - [`SyncEngine`] - Per-platform sync state machine
//! - [`GroupingCoordinator`], [`SyncSession`] - Session-scoped surface grouping
//! - [`ProgressStream`], [`ProgressSink`], [`CancelHandle`] - Batch and progressive delivery
//!
//! ### Configuration (`config`)
//! - [`Settings`] - `config.toml` with defaults for every field

pub mod cache;
pub mod catalog;
pub mod config;
pub mod detection;
pub mod group;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod session;
pub mod sync;

pub use cache::{CacheEntry, ResultCache};
pub use config::Settings;
pub use detection::DetectionChain;
pub use group::GroupingCoordinator;
pub use orchestrator::{configured_registry, open_cache, LiveOrchestrator, Orchestrator};
pub use progress::{CancelHandle, ProgressEvent, ProgressSink, ProgressStream};
pub use registry::PlatformRegistry;
pub use session::SyncSession;
pub use sync::SyncEngine;
