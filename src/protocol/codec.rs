use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, FrameError, SerialNumber};
use super::message::{
    check_set_temp, Command, CommandId, DeviceAnnouncement, DeviceStatus, Frame, Response,
    ResponseId,
};
use super::{
    CHECKSUM_OFFSET, END_BYTE, END_OFFSET, FRAME_LEN, ID_OFFSET, LENGTH_OFFSET, PAYLOAD_END,
    PAYLOAD_OFFSET, START_BYTE, START_OFFSET,
};

/// Additive checksum over the identifier, length and payload bytes
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let sum: u32 = frame[ID_OFFSET..PAYLOAD_END].iter().map(|b| *b as u32).sum();
    (sum % 255) as u8
}

fn build(id: u8, payload: &[u8]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[START_OFFSET] = START_BYTE;
    frame[ID_OFFSET] = id;
    frame[LENGTH_OFFSET] = payload.len() as u8;
    frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
    frame[CHECKSUM_OFFSET] = checksum(&frame);
    frame[END_OFFSET] = END_BYTE;
    frame
}

/// Encodes an outgoing command.
///
/// Fails only for a set point outside the supported range.
pub fn encode_command(command: &Command) -> Result<[u8; FRAME_LEN], FrameError> {
    let id = command.id() as u8;
    match command {
        Command::NewSetTemp(temp) => {
            check_set_temp(*temp)?;
            Ok(build(id, &[*temp]))
        }
        _ => Ok(build(id, &[])),
    }
}

/// Encodes a response the way the appliance firmware does
pub fn encode_response(response: &Response) -> [u8; FRAME_LEN] {
    let id = response.id() as u8;
    match response {
        Response::Status(status) => build(
            id,
            &[
                status.has_new_timers as u8,
                status.fire_on as u8,
                status.fan_boost_on as u8,
                status.flame_effect_on as u8,
                status.desired_temp,
                status.current_temp,
            ],
        ),
        Response::IAmAFire(announcement) => {
            let mut payload = [0u8; 6];
            payload[..4].copy_from_slice(&announcement.serial.0.to_be_bytes());
            payload[4..].copy_from_slice(&announcement.pin.to_be_bytes());
            build(id, &payload)
        }
        _ => build(id, &[]),
    }
}

impl Frame {
    /// Wire representation of this frame
    pub fn to_bytes(&self) -> Result<[u8; FRAME_LEN], FrameError> {
        match self {
            Frame::Command(command) => encode_command(command),
            Frame::Response(response) => Ok(encode_response(response)),
        }
    }
}

fn check_payload_len(id: u8, expected: u8, actual: u8) -> Result<(), FrameError> {
    if expected == actual {
        Ok(())
    } else {
        Err(FrameError::BadPayloadLength { id, expected, actual })
    }
}

/// Decodes and validates one frame.
///
/// Checks run in wire order: length, start byte, end byte, checksum, then
/// identifier and the payload length that identifier requires.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let frame: &[u8; FRAME_LEN] = bytes.try_into().map_err(|_| FrameError::WrongLength {
        expected: FRAME_LEN,
        actual: bytes.len(),
    })?;

    if frame[START_OFFSET] != START_BYTE {
        return Err(FrameError::BadStartByte(frame[START_OFFSET]));
    }
    if frame[END_OFFSET] != END_BYTE {
        return Err(FrameError::BadEndByte(frame[END_OFFSET]));
    }

    let expected = checksum(frame);
    if frame[CHECKSUM_OFFSET] != expected {
        return Err(FrameError::BadChecksum {
            expected,
            actual: frame[CHECKSUM_OFFSET],
        });
    }

    let id = frame[ID_OFFSET];
    let length = frame[LENGTH_OFFSET];
    let payload = &frame[PAYLOAD_OFFSET..PAYLOAD_END];

    if let Some(response_id) = ResponseId::from_byte(id) {
        check_payload_len(id, response_id.payload_len(), length)?;
        return Ok(Frame::Response(decode_response(response_id, payload)));
    }

    // Commands only arrive here in loopback tests or as a broadcast echo
    if let Some(command_id) = CommandId::from_byte(id) {
        check_payload_len(id, command_id.payload_len(), length)?;
        return decode_command(command_id, payload).map(Frame::Command);
    }

    Err(FrameError::UnknownIdentifier(id))
}

fn decode_response(id: ResponseId, payload: &[u8]) -> Response {
    match id {
        ResponseId::Status => Response::Status(DeviceStatus {
            has_new_timers: payload[0] != 0,
            fire_on: payload[1] != 0,
            fan_boost_on: payload[2] != 0,
            flame_effect_on: payload[3] != 0,
            desired_temp: payload[4],
            current_temp: payload[5],
        }),
        ResponseId::IAmAFire => Response::IAmAFire(DeviceAnnouncement {
            serial: SerialNumber(u32::from_be_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])),
            pin: u16::from_be_bytes([payload[4], payload[5]]),
        }),
        ResponseId::PowerOnAck => Response::PowerOnAck,
        ResponseId::PowerOffAck => Response::PowerOffAck,
        ResponseId::FanBoostOnAck => Response::FanBoostOnAck,
        ResponseId::FanBoostOffAck => Response::FanBoostOffAck,
        ResponseId::FlameEffectOnAck => Response::FlameEffectOnAck,
        ResponseId::FlameEffectOffAck => Response::FlameEffectOffAck,
        ResponseId::NewSetTempAck => Response::NewSetTempAck,
    }
}

fn decode_command(id: CommandId, payload: &[u8]) -> Result<Command, FrameError> {
    Ok(match id {
        CommandId::StatusPlease => Command::StatusPlease,
        CommandId::PowerOn => Command::PowerOn,
        CommandId::PowerOff => Command::PowerOff,
        CommandId::SearchForFires => Command::SearchForFires,
        CommandId::FanBoostOn => Command::FanBoostOn,
        CommandId::FanBoostOff => Command::FanBoostOff,
        CommandId::FlameEffectOn => Command::FlameEffectOn,
        CommandId::FlameEffectOff => Command::FlameEffectOff,
        CommandId::NewSetTemp => Command::set_temp(payload[0])?,
    })
}

/// Frame codec for the fixed 15 byte protocol.
///
/// `decode` reads frames back to back from a byte stream. `decode_eof`
/// treats everything buffered as a single datagram, so a datagram of the
/// wrong size is rejected instead of being split or padded.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_LEN {
            return Ok(None);
        }

        let bytes = src.split_to(FRAME_LEN);
        Ok(Some(decode(&bytes)?))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let datagram = src.split();
        Ok(Some(decode(&datagram)?))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes()?;
        dst.reserve(FRAME_LEN);
        dst.put_slice(&bytes);
        Ok(())
    }
}
