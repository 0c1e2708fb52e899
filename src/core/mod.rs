//! Core types and traits for the fireplace driver
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, FrameError, Result};
pub use self::types::{
    Config,
    ControllerConfig,
    DiscoveryConfig,
    FanMode,
    SerialNumber,
    TransportConfig,
};

/// UDP port every appliance listens on
pub const DEFAULT_PORT: u16 = 3300;

/// Lowest temperature the appliance accepts as a set point
pub const MIN_SET_TEMP: u8 = 4;

/// Highest temperature the appliance accepts as a set point
pub const MAX_SET_TEMP: u8 = 30;
