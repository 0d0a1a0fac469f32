//! Sync dispatch: page scripts and the per-platform pipeline

pub mod engine;
pub mod scripts;

pub use engine::{failure_kind, fallback_for, StateObserver, SyncEngine};
