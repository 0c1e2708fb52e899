//! Escea LAN: driver for Escea gas fireplaces on the local network
//!
//! Appliances speak a fixed 15 byte frame protocol over UDP port 3300.
//! [`DiscoveryService`] finds them with a broadcast search and hands out one
//! [`Controller`] per appliance, which polls its status, applies setting
//! changes and rides out the appliance going quiet for a while.

pub mod controller;
pub mod core;
pub mod network;
pub mod protocol;
mod util;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use crate::controller::{Controller, Notifier, Snapshot};
pub use crate::core::{Config, Error, FanMode, Result, SerialNumber};
pub use crate::network::{DiscoveryService, Listener, Transport, UdpTransport};
pub use crate::protocol::ConnectionState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
