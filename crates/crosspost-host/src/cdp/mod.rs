//! Chrome DevTools Protocol host adapter
//!
//! - [`protocol`]: frame types, message parsing and the request tracker
//! - [`client`]: WebSocket client with reconnection
//! - [`host`]: [`HostSurface`](crate::HostSurface) implementation

pub mod client;
pub mod host;
pub mod protocol;

pub use client::{CdpClient, CdpHandle, ConnectionState};
pub use host::CdpHost;
pub use protocol::{CdpClientEvent, CdpEvent, TargetInfo};
