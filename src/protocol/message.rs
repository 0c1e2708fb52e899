use serde::{Deserialize, Serialize};

use crate::core::{FanMode, FrameError, SerialNumber, MAX_SET_TEMP, MIN_SET_TEMP};

/// Command identifiers understood by the appliance firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    StatusPlease = 0x31,
    PowerOn = 0x39,
    PowerOff = 0x3a,
    SearchForFires = 0x50,
    FanBoostOn = 0x37,
    FanBoostOff = 0x38,
    FlameEffectOn = 0x56,
    FlameEffectOff = 0x55,
    NewSetTemp = 0x57,
}

/// Response identifiers sent back by the appliance firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseId {
    Status = 0x80,
    PowerOnAck = 0x8d,
    PowerOffAck = 0x8f,
    FanBoostOnAck = 0x8a,
    FanBoostOffAck = 0x8b,
    FlameEffectOnAck = 0x61,
    FlameEffectOffAck = 0x60,
    NewSetTempAck = 0x66,
    IAmAFire = 0x99,
}

impl CommandId {
    pub const ALL: [CommandId; 9] = [
        CommandId::StatusPlease,
        CommandId::PowerOn,
        CommandId::PowerOff,
        CommandId::SearchForFires,
        CommandId::FanBoostOn,
        CommandId::FanBoostOff,
        CommandId::FlameEffectOn,
        CommandId::FlameEffectOff,
        CommandId::NewSetTemp,
    ];

    /// Looks up a command identifier by its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as u8 == byte)
    }

    /// The only acknowledgement that legitimately answers this command
    pub fn expected_response(&self) -> ResponseId {
        match self {
            CommandId::StatusPlease => ResponseId::Status,
            CommandId::PowerOn => ResponseId::PowerOnAck,
            CommandId::PowerOff => ResponseId::PowerOffAck,
            CommandId::SearchForFires => ResponseId::IAmAFire,
            CommandId::FanBoostOn => ResponseId::FanBoostOnAck,
            CommandId::FanBoostOff => ResponseId::FanBoostOffAck,
            CommandId::FlameEffectOn => ResponseId::FlameEffectOnAck,
            CommandId::FlameEffectOff => ResponseId::FlameEffectOffAck,
            CommandId::NewSetTemp => ResponseId::NewSetTempAck,
        }
    }

    /// Payload length the firmware expects for this command
    pub fn payload_len(&self) -> u8 {
        match self {
            CommandId::NewSetTemp => 1,
            _ => 0,
        }
    }
}

impl ResponseId {
    pub const ALL: [ResponseId; 9] = [
        ResponseId::Status,
        ResponseId::PowerOnAck,
        ResponseId::PowerOffAck,
        ResponseId::FanBoostOnAck,
        ResponseId::FanBoostOffAck,
        ResponseId::FlameEffectOnAck,
        ResponseId::FlameEffectOffAck,
        ResponseId::NewSetTempAck,
        ResponseId::IAmAFire,
    ];

    /// Looks up a response identifier by its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as u8 == byte)
    }

    /// Payload length the firmware sends with this response
    pub fn payload_len(&self) -> u8 {
        match self {
            ResponseId::Status | ResponseId::IAmAFire => 6,
            _ => 0,
        }
    }
}

/// Outgoing command, carrying its payload where it has one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    StatusPlease,
    PowerOn,
    PowerOff,
    SearchForFires,
    FanBoostOn,
    FanBoostOff,
    FlameEffectOn,
    FlameEffectOff,
    /// New desired temperature, whole degrees
    NewSetTemp(u8),
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::StatusPlease => CommandId::StatusPlease,
            Command::PowerOn => CommandId::PowerOn,
            Command::PowerOff => CommandId::PowerOff,
            Command::SearchForFires => CommandId::SearchForFires,
            Command::FanBoostOn => CommandId::FanBoostOn,
            Command::FanBoostOff => CommandId::FanBoostOff,
            Command::FlameEffectOn => CommandId::FlameEffectOn,
            Command::FlameEffectOff => CommandId::FlameEffectOff,
            Command::NewSetTemp(_) => CommandId::NewSetTemp,
        }
    }

    pub fn expected_response(&self) -> ResponseId {
        self.id().expected_response()
    }

    /// Builds the set-temperature command, rejecting unsupported values
    pub fn set_temp(temp: u8) -> Result<Self, FrameError> {
        check_set_temp(temp)?;
        Ok(Command::NewSetTemp(temp))
    }

    /// Power command reaching `on`
    pub fn power(on: bool) -> Self {
        if on {
            Command::PowerOn
        } else {
            Command::PowerOff
        }
    }
}

/// Rejects set points the firmware does not accept
pub fn check_set_temp(temp: u8) -> Result<(), FrameError> {
    if (MIN_SET_TEMP..=MAX_SET_TEMP).contains(&temp) {
        Ok(())
    } else {
        Err(FrameError::TemperatureOutOfRange(temp))
    }
}

/// Decoded STATUS payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Unit has new timers programmed (informational only)
    pub has_new_timers: bool,
    pub fire_on: bool,
    pub fan_boost_on: bool,
    pub flame_effect_on: bool,
    pub desired_temp: u8,
    /// Room temperature
    pub current_temp: u8,
}

impl DeviceStatus {
    pub fn fan_mode(&self) -> FanMode {
        FanMode::from_toggles(self.fan_boost_on, self.flame_effect_on)
    }
}

/// Decoded I_AM_A_FIRE payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAnnouncement {
    pub serial: SerialNumber,
    /// Reported by the firmware, not used for anything
    pub pin: u16,
}

/// Incoming response with its typed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Status(DeviceStatus),
    PowerOnAck,
    PowerOffAck,
    FanBoostOnAck,
    FanBoostOffAck,
    FlameEffectOnAck,
    FlameEffectOffAck,
    NewSetTempAck,
    IAmAFire(DeviceAnnouncement),
}

impl Response {
    pub fn id(&self) -> ResponseId {
        match self {
            Response::Status(_) => ResponseId::Status,
            Response::PowerOnAck => ResponseId::PowerOnAck,
            Response::PowerOffAck => ResponseId::PowerOffAck,
            Response::FanBoostOnAck => ResponseId::FanBoostOnAck,
            Response::FanBoostOffAck => ResponseId::FanBoostOffAck,
            Response::FlameEffectOnAck => ResponseId::FlameEffectOnAck,
            Response::FlameEffectOffAck => ResponseId::FlameEffectOffAck,
            Response::NewSetTempAck => ResponseId::NewSetTempAck,
            Response::IAmAFire(_) => ResponseId::IAmAFire,
        }
    }

    /// The payload-free acknowledgement for `id`.
    ///
    /// Returns `None` for responses that carry a payload.
    pub fn ack(id: ResponseId) -> Option<Self> {
        match id {
            ResponseId::PowerOnAck => Some(Response::PowerOnAck),
            ResponseId::PowerOffAck => Some(Response::PowerOffAck),
            ResponseId::FanBoostOnAck => Some(Response::FanBoostOnAck),
            ResponseId::FanBoostOffAck => Some(Response::FanBoostOffAck),
            ResponseId::FlameEffectOnAck => Some(Response::FlameEffectOnAck),
            ResponseId::FlameEffectOffAck => Some(Response::FlameEffectOffAck),
            ResponseId::NewSetTempAck => Some(Response::NewSetTempAck),
            ResponseId::Status | ResponseId::IAmAFire => None,
        }
    }
}

/// One 15 byte protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Command(Command),
    Response(Response),
}
