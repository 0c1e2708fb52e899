//! Protocol implementation module
//!
//! This module defines the fireplace LAN protocol frames, their
//! encoding/decoding, and the per-appliance connection state logic.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::{decode, encode_command, encode_response, FrameCodec};
pub use self::message::{
    Command, CommandId, DeviceAnnouncement, DeviceStatus, Frame, Response, ResponseId,
};
pub use self::state::{ConnectionState, Settings};

// Frame layout. Every frame, in either direction, is exactly FRAME_LEN bytes.
/// Total frame size in bytes
pub const FRAME_LEN: usize = 15;

/// Fixed first byte of every frame
pub const START_BYTE: u8 = 0x47;

/// Fixed last byte of every frame
pub const END_BYTE: u8 = 0x46;

pub(crate) const START_OFFSET: usize = 0;
pub(crate) const ID_OFFSET: usize = 1;
pub(crate) const LENGTH_OFFSET: usize = 2;
pub(crate) const PAYLOAD_OFFSET: usize = 3;
/// One past the last payload byte; the checksum covers ID_OFFSET..PAYLOAD_END
pub(crate) const PAYLOAD_END: usize = 12;
pub(crate) const CHECKSUM_OFFSET: usize = 13;
pub(crate) const END_OFFSET: usize = 14;
