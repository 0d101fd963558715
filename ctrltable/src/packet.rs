//! Framing for both wire formats.
//!
//! Protocol 1 packets are `FF FF id len inst params… checksum`, where `len` counts the
//! instruction (or error) byte, the parameters and the checksum. Protocol 2 packets are
//! `FF FF FD 00 id len_l len_h inst params… crc_l crc_h`, where `len` counts everything after
//! itself. Status packets put the error byte where protocol 1 has the instruction, and after the
//! `StatusReturn` instruction in protocol 2.

use crate::channel::ByteChannel;
use crate::checksum::{checksum1, crc16};
use crate::{ChannelError, Instruction, PacketError, ProtocolVersion};
use log::{debug, trace};
use std::time::Duration;

pub(crate) const HEADER_V1: [u8; 2] = [0xFF, 0xFF];
pub(crate) const HEADER_V2: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Noise tolerated ahead of a header on a live channel before giving up on finding one.
const MAX_RESYNC_BYTES: usize = 256;

/// Packets sent to this ID are executed by every device on the bus, and none of them reply.
pub const BROADCAST_ID: u8 = 0xFE;

/// Frames a protocol 1 payload: sync bytes, payload, checksum of the payload.
pub fn build_v1(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_V1.len() + payload.len() + 1);
    packet.extend_from_slice(&HEADER_V1);
    packet.extend_from_slice(payload);
    packet.push(checksum1(payload));
    packet
}

/// Frames a protocol 2 payload: header, payload, little-endian CRC of header and payload.
pub fn build_v2(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_V2.len() + payload.len() + 2);
    packet.extend_from_slice(&HEADER_V2);
    packet.extend_from_slice(payload);
    let crc = crc16(&packet, 0);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}

pub fn build(version: ProtocolVersion, payload: &[u8]) -> Vec<u8> {
    match version {
        ProtocolVersion::V1 => build_v1(payload),
        ProtocolVersion::V2 => build_v2(payload),
    }
}

/// The trailer a frame should end with, given the payload after its header.
fn expected_trailer(version: ProtocolVersion, payload: &[u8]) -> u16 {
    match version {
        ProtocolVersion::V1 => u16::from(checksum1(payload)),
        ProtocolVersion::V2 => crc16(payload, crc16(&HEADER_V2, 0)),
    }
}

fn push_length(payload: &mut Vec<u8>, version: ProtocolVersion, length: usize) {
    let max = match version {
        ProtocolVersion::V1 => usize::from(u8::MAX),
        ProtocolVersion::V2 => usize::from(u16::MAX),
    };
    assert!(
        length <= max,
        "packet length {} doesn't fit the protocol {} length field",
        length,
        version.number()
    );
    match version {
        ProtocolVersion::V1 => payload.push(length as u8),
        ProtocolVersion::V2 => payload.extend_from_slice(&(length as u16).to_le_bytes()),
    }
}

fn le_value(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .rev()
        .fold(0, |value, &byte| (value << 8) | u16::from(byte))
}

/// A packet from the controller to one device (or all of them).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstructionPacket {
    pub id: u8,
    pub instruction: Instruction,
    pub params: Vec<u8>,
}

impl InstructionPacket {
    /// Everything between the header and the trailer.
    pub fn payload(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut payload = vec![self.id];
        push_length(&mut payload, version, self.params.len() + 1 + version.trailer_len());
        payload.push(self.instruction.to_byte());
        payload.extend_from_slice(&self.params);
        payload
    }

    /// Panics if the parameters are too long for the length field of `version`.
    pub fn to_bytes(&self, version: ProtocolVersion) -> Vec<u8> {
        build(version, &self.payload(version))
    }
}

/// A device's reply to an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusPacket {
    pub id: u8,
    /// Error bitfield (protocol 1) or error code (protocol 2). Zero means success.
    pub error: u8,
    pub params: Vec<u8>,
}

impl StatusPacket {
    /// The number of bytes the length field covers besides the parameters.
    fn overhead(version: ProtocolVersion) -> usize {
        match version {
            ProtocolVersion::V1 => 1 + version.trailer_len(),
            ProtocolVersion::V2 => 2 + version.trailer_len(),
        }
    }

    pub fn payload(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut payload = vec![self.id];
        push_length(&mut payload, version, self.params.len() + Self::overhead(version));
        if version == ProtocolVersion::V2 {
            payload.push(Instruction::StatusReturn.to_byte());
        }
        payload.push(self.error);
        payload.extend_from_slice(&self.params);
        payload
    }

    pub fn to_bytes(&self, version: ProtocolVersion) -> Vec<u8> {
        build(version, &self.payload(version))
    }
}

/// Somewhere to pull frame bytes from, either a buffer or a live channel.
trait ByteSource {
    fn take(&mut self, count: usize) -> Result<Vec<u8>, PacketError>;

    fn take_byte(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    /// Takes the sync bytes that start a frame. Any mismatch is an error.
    fn sync(&mut self, header: &[u8]) -> Result<Vec<u8>, PacketError> {
        let got = self.take(header.len())?;
        check_sync(&got, header)?;
        Ok(got)
    }
}

struct SliceSource<'a> {
    remaining: &'a [u8],
}

impl ByteSource for SliceSource<'_> {
    fn take(&mut self, count: usize) -> Result<Vec<u8>, PacketError> {
        if self.remaining.len() < count {
            return Err(PacketError::IncompleteFrame {
                needed: count,
                got: self.remaining.len(),
            });
        }
        let (taken, rest) = self.remaining.split_at(count);
        self.remaining = rest;
        Ok(taken.to_vec())
    }
}

struct ChannelSource<'a, C: ?Sized> {
    channel: &'a mut C,
    timeout: Duration,
    started: bool,
}

impl<C: ByteChannel + ?Sized> ByteSource for ChannelSource<'_, C> {
    fn take(&mut self, count: usize) -> Result<Vec<u8>, PacketError> {
        let bytes = match self.channel.read(count, self.timeout) {
            Ok(bytes) => bytes,
            Err(ChannelError::Timeout) if self.started => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !bytes.is_empty() {
            self.started = true;
        }
        if bytes.len() < count {
            return Err(PacketError::IncompleteFrame {
                needed: count,
                got: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Drops stray bytes until the sync bytes turn up, as a live bus can carry line noise or
    /// the tail of an earlier frame.
    fn sync(&mut self, header: &[u8]) -> Result<Vec<u8>, PacketError> {
        let mut window = self.take(header.len())?;
        let mut discarded = 0;
        while window != header {
            if discarded == MAX_RESYNC_BYTES {
                check_sync(&window, header)?;
            }
            window.remove(0);
            window.push(self.take_byte()?);
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Skipped {} stray bytes before the header", discarded);
        }
        Ok(window)
    }
}

fn check_sync(got: &[u8], header: &[u8]) -> Result<(), PacketError> {
    match got
        .iter()
        .zip(header)
        .enumerate()
        .find(|(_, (got, wanted))| got != wanted)
    {
        Some((offset, (&byte, _))) => Err(PacketError::BadSync { offset, byte }),
        None => Ok(()),
    }
}

fn read_header(
    source: &mut impl ByteSource,
    version: ProtocolVersion,
) -> Result<Vec<u8>, PacketError> {
    source.sync(version.header())
}

fn check_trailer(
    source: &mut impl ByteSource,
    version: ProtocolVersion,
    payload: &[u8],
) -> Result<(), PacketError> {
    let actual = le_value(&source.take(version.trailer_len())?);
    let expected = expected_trailer(version, payload);
    if actual != expected {
        return Err(PacketError::Checksum { expected, actual });
    }
    Ok(())
}

fn decode_status(
    source: &mut impl ByteSource,
    version: ProtocolVersion,
    expected_params: usize,
) -> Result<StatusPacket, PacketError> {
    read_header(source, version)?;
    let mut payload = vec![source.take_byte()?];
    let length_bytes = source.take(version.field_width())?;
    let length = le_value(&length_bytes);
    payload.extend_from_slice(&length_bytes);
    if version == ProtocolVersion::V2 {
        let instruction = source.take_byte()?;
        payload.push(instruction);
        if instruction != Instruction::StatusReturn.to_byte() {
            return Err(PacketError::UnexpectedInstruction(instruction));
        }
    }
    let error = source.take_byte()?;
    payload.push(error);
    let params = source.take(expected_params)?;
    payload.extend_from_slice(&params);
    check_trailer(source, version, &payload)?;

    let expected_length = (expected_params + StatusPacket::overhead(version)) as u16;
    if length != expected_length {
        return Err(PacketError::LengthMismatch {
            expected: expected_length,
            actual: length,
        });
    }

    Ok(StatusPacket {
        id: payload[0],
        error,
        params,
    })
}

fn decode_frame(
    source: &mut impl ByteSource,
    version: ProtocolVersion,
) -> Result<Vec<u8>, PacketError> {
    let mut frame = read_header(source, version)?;
    let header_len = frame.len();
    frame.push(source.take_byte()?);
    let length_bytes = source.take(version.field_width())?;
    let length = le_value(&length_bytes);
    frame.extend_from_slice(&length_bytes);
    let minimum = (version.trailer_len() + 1) as u16;
    if length < minimum {
        return Err(PacketError::LengthMismatch {
            expected: minimum,
            actual: length,
        });
    }
    frame.extend(source.take(usize::from(length) - version.trailer_len())?);
    check_trailer(source, version, &frame[header_len..])?;
    let trailer = expected_trailer(version, &frame[header_len..]).to_le_bytes();
    frame.extend_from_slice(&trailer[..version.trailer_len()]);
    Ok(frame)
}

/// Parses a status packet carrying exactly `expected_params` parameter bytes from the start of
/// `bytes`. Anything after the packet is ignored.
pub fn parse_response(
    bytes: &[u8],
    version: ProtocolVersion,
    expected_params: usize,
) -> Result<StatusPacket, PacketError> {
    decode_status(&mut SliceSource { remaining: bytes }, version, expected_params)
}

/// Reads a status packet carrying exactly `expected_params` parameter bytes from `channel`.
pub fn read_response<C: ByteChannel + ?Sized>(
    channel: &mut C,
    version: ProtocolVersion,
    expected_params: usize,
    timeout: Duration,
) -> Result<StatusPacket, PacketError> {
    let mut source = ChannelSource {
        channel,
        timeout,
        started: false,
    };
    let status = decode_status(&mut source, version, expected_params)?;
    trace!("Received {:?}", status);
    Ok(status)
}

/// Parses one whole frame of any kind from the start of `bytes`, using its length field, and
/// returns its bytes once the trailer has been checked.
pub fn parse_frame(bytes: &[u8], version: ProtocolVersion) -> Result<Vec<u8>, PacketError> {
    decode_frame(&mut SliceSource { remaining: bytes }, version)
}

/// Reads one whole frame of any kind from `channel`. Used to discard echoed or relayed packets
/// without knowing their shape in advance.
pub fn read_frame<C: ByteChannel + ?Sized>(
    channel: &mut C,
    version: ProtocolVersion,
    timeout: Duration,
) -> Result<Vec<u8>, PacketError> {
    let mut source = ChannelSource {
        channel,
        timeout,
        started: false,
    };
    let frame = decode_frame(&mut source, version)?;
    trace!("Discarding frame {:02X?}", frame);
    Ok(frame)
}
