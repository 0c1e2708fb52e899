use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::message::{CommandId, ResponseId};

/// Reasons a 15 byte buffer is not a usable frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("invalid start byte {0:#04x}")]
    BadStartByte(u8),

    #[error("invalid end byte {0:#04x}")]
    BadEndByte(u8),

    #[error("invalid checksum {actual:#04x}, expected {expected:#04x}")]
    BadChecksum { expected: u8, actual: u8 },

    #[error("identifier {id:#04x} declares {actual} payload bytes, expected {expected}")]
    BadPayloadLength { id: u8, expected: u8, actual: u8 },

    #[error("unknown identifier {0:#04x}")]
    UnknownIdentifier(u8),

    #[error("set temperature {0} is outside the supported range")]
    TemperatureOutOfRange(u8),
}

/// Custom error types for the fireplace driver
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("No response to {command:?} from {addr} within {timeout:?}")]
    NoResponse {
        command: CommandId,
        addr: SocketAddr,
        timeout: Duration,
    },

    #[error("Unexpected response {actual:?}, expected {expected:?}")]
    UnexpectedResponse {
        expected: ResponseId,
        actual: ResponseId,
    },

    #[error("Temperature {0} is outside the supported range")]
    TemperatureOutOfRange(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Closed")]
    Closed,
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
