//! Turns servo control tables, as published in device documentation, into read/write
//! operations for the two-version half-duplex serial bus protocol, and frames, checks and
//! parses the packets those operations exchange.
//!
//! The pipeline is: document → [`table::FieldTableParser`] → [`FieldRecord`]s →
//! [`accessor::AccessorGenerator`] → [`OperationDescriptor`]s → [`render::EmissionBackend`].
//! At runtime a [`bus::Bus`] executes descriptors over any [`channel::ByteChannel`].

pub mod accessor;
pub mod bus;
pub mod channel;
pub mod checksum;
pub mod echo;
mod error;
pub mod packet;
pub mod render;
pub mod table;

pub use accessor::{OperationDescriptor, OperationKind, ReplyPolicy};
pub use error::{BusError, ChannelError, FormatError, GenerationError, PacketError, RowProblem};
pub use packet::{InstructionPacket, StatusPacket};
pub use table::{Access, FieldRecord};

use serde_derive::Deserialize;

/// The two incompatible wire formats spoken on the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize)]
pub enum ProtocolVersion {
    /// Two sync bytes, one byte address and length fields, additive checksum.
    V1,
    /// Four header bytes, two byte little-endian fields, CRC16 trailer.
    V2,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 2] = [Self::V1, Self::V2];

    pub fn number(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// The sync bytes every packet starts with.
    pub fn header(self) -> &'static [u8] {
        match self {
            Self::V1 => &packet::HEADER_V1,
            Self::V2 => &packet::HEADER_V2,
        }
    }

    /// Width in bytes of the address, data length and packet length fields.
    pub fn field_width(self) -> usize {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Width in bytes of the checksum or CRC at the end of each packet.
    pub fn trailer_len(self) -> usize {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Encodes `value` little-endian in [`Self::field_width`] bytes, or returns `None` if it
    /// doesn't fit.
    pub fn encode_field(self, value: u16) -> Option<Vec<u8>> {
        match self {
            Self::V1 => u8::try_from(value).ok().map(|byte| vec![byte]),
            Self::V2 => Some(value.to_le_bytes().to_vec()),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    FactoryReset = 0x06,
    Reboot = 0x08,
    Clear = 0x10,
    ControlTableBackup = 0x20,
    /// Only ever sent by devices, in status packets.
    StatusReturn = 0x55,
    SyncRead = 0x82,
    SyncWrite = 0x83,
    FastSyncRead = 0x8A,
    BulkRead = 0x92,
    BulkWrite = 0x93,
    FastBulkRead = 0x9A,
}

impl Instruction {
    pub fn parse(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::Ping,
            0x02 => Self::Read,
            0x03 => Self::Write,
            0x04 => Self::RegWrite,
            0x05 => Self::Action,
            0x06 => Self::FactoryReset,
            0x08 => Self::Reboot,
            0x10 => Self::Clear,
            0x20 => Self::ControlTableBackup,
            0x55 => Self::StatusReturn,
            0x82 => Self::SyncRead,
            0x83 => Self::SyncWrite,
            0x8A => Self::FastSyncRead,
            0x92 => Self::BulkRead,
            0x93 => Self::BulkWrite,
            0x9A => Self::FastBulkRead,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}
