use crate::accessor::OperationKind;

/// line {line_number}: {reason}: `{line}`
#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub struct FormatError {
    /// 1-based line number within the document.
    pub line_number: usize,
    /// The offending line, untrimmed.
    pub line: String,
    pub reason: RowProblem,
}

#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub enum RowProblem {
    /// expected at least {expected} columns but found {found}
    ColumnCount { expected: usize, found: usize },
    /// invalid address `{0}`
    Address(String),
    /// invalid size `{0}`
    Size(String),
    /// unknown access mode `{0}`
    Access(String),
}

#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub enum ChannelError {
    /// timed out waiting for bytes
    Timeout,
    /// I/O error: {0}
    Io(String),
}

#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub enum PacketError {
    /// checksum mismatch: computed {expected} but received {actual}
    Checksum { expected: u16, actual: u16 },
    /// incomplete frame: wanted {needed} bytes but only got {got}
    IncompleteFrame { needed: usize, got: usize },
    /// bad sync byte {byte} at offset {offset}
    BadSync { offset: usize, byte: u8 },
    /// length field is {actual} but {expected} was expected
    LengthMismatch { expected: u16, actual: u16 },
    /// got instruction {0} where a status packet was expected
    UnexpectedInstruction(u8),
    /// timed out waiting for a response
    Timeout,
    /// {0}
    Channel(ChannelError),
}

#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub enum GenerationError {
    /// field `{field}` has unsupported width {size}
    UnsupportedWidth { field: String, size: u16 },
    /// field `{field}` at address {address} can't be addressed with protocol 1
    AddressTooWide { field: String, address: u16 },
    /// response skip count {0} is larger than 2
    SkipCountTooLarge(u8),
    /// value {value} does not fit in {width} bytes
    ValueTooWide { value: u32, width: usize },
}

#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub enum BusError {
    /// {0}
    Packet(PacketError),
    /// {0}
    Channel(ChannelError),
    /// {0}
    Generation(GenerationError),
    /// device {id} reported error {error}
    Device { id: u8, error: u8 },
    /// `{field}` is a {kind} operation
    WrongKind { field: String, kind: OperationKind },
}

impl From<ChannelError> for PacketError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Timeout => Self::Timeout,
            other => Self::Channel(other),
        }
    }
}

impl From<PacketError> for BusError {
    fn from(error: PacketError) -> Self {
        Self::Packet(error)
    }
}

impl From<ChannelError> for BusError {
    fn from(error: ChannelError) -> Self {
        Self::Channel(error)
    }
}

impl From<GenerationError> for BusError {
    fn from(error: GenerationError) -> Self {
        Self::Generation(error)
    }
}

impl std::error::Error for FormatError {}
impl std::error::Error for ChannelError {}
impl std::error::Error for PacketError {}
impl std::error::Error for GenerationError {}
impl std::error::Error for BusError {}
