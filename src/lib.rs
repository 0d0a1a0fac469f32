//! crosspost
//!
//! Command-line front end: loads settings, builds the orchestrator and
//! reports every command as NDJSON events.

pub mod commands;
pub mod events;
pub mod markdown;

pub use events::Event;
