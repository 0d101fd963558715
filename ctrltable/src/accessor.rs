//! Turning field records into get/set operation descriptors.

use crate::table::{parse_document, TableSyntax};
use crate::{Access, FieldRecord, FormatError, GenerationError, Instruction, ProtocolVersion};
use core::fmt::{self, Display, Formatter};
use log::{debug, warn};
use serde_derive::Deserialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OperationKind {
    Get,
    Set,
}

impl OperationKind {
    pub fn instruction(self) -> Instruction {
        match self {
            Self::Get => Instruction::Read,
            Self::Set => Instruction::Write,
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Get => f.write_str("get"),
            Self::Set => f.write_str("set"),
        }
    }
}

/// How replies come back on this bus. This depends on the wiring and adapter in use, not on the
/// protocol version, so it is configured per run.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReplyPolicy {
    /// Packets to discard before the device's own reply: 0 on a direct link, 1 when the
    /// adapter echoes what it sends, 2 when a relay also forwards it.
    pub skip_count: u8,
    /// Whether devices answer writes. Off for broadcast addressing, or devices configured to
    /// only answer reads.
    pub status_return: bool,
}

impl ReplyPolicy {
    pub const MAX_SKIP_COUNT: u8 = 2;

    pub fn validate(self) -> Result<Self, GenerationError> {
        if self.skip_count > Self::MAX_SKIP_COUNT {
            return Err(GenerationError::SkipCountTooLarge(self.skip_count));
        }
        Ok(self)
    }
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            skip_count: 0,
            status_return: true,
        }
    }
}

/// Everything needed to read or write one field with one protocol version.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OperationDescriptor {
    pub field_name: String,
    pub version: ProtocolVersion,
    /// The field's address, encoded for `version`.
    pub address_bytes: Vec<u8>,
    /// The field's width, encoded for `version`.
    pub size_bytes: Vec<u8>,
    pub kind: OperationKind,
    pub response_skip_count: u8,
    /// The field's width in bytes: 1, 2 or 4.
    pub width: usize,
    /// Whether a status packet follows the skipped ones.
    pub expects_status: bool,
    /// One line of documentation for renderers.
    pub doc: String,
}

impl OperationDescriptor {
    pub fn instruction(&self) -> Instruction {
        self.kind.instruction()
    }

    /// Parameters of the read instruction: address then width.
    pub fn read_params(&self) -> Vec<u8> {
        let mut params = self.address_bytes.clone();
        params.extend_from_slice(&self.size_bytes);
        params
    }

    /// Parameters of the write instruction: address then `value`, little-endian.
    pub fn write_params(&self, value: u32) -> Result<Vec<u8>, GenerationError> {
        let bytes = value.to_le_bytes();
        if bytes[self.width..].iter().any(|&byte| byte != 0) {
            return Err(GenerationError::ValueTooWide {
                value,
                width: self.width,
            });
        }
        let mut params = self.address_bytes.clone();
        params.extend_from_slice(&bytes[..self.width]);
        Ok(params)
    }

    /// Interprets the parameters of a read reply as an unsigned little-endian value.
    pub fn decode(&self, params: &[u8]) -> u32 {
        params
            .iter()
            .take(self.width)
            .rev()
            .fold(0, |value, &byte| (value << 8) | u32::from(byte))
    }
}

/// Checks that `record` has a width the accessors can handle.
fn field_width(record: &FieldRecord) -> Result<usize, GenerationError> {
    match record.size {
        1 | 2 | 4 => Ok(usize::from(record.size)),
        size => Err(GenerationError::UnsupportedWidth {
            field: record.name.clone(),
            size,
        }),
    }
}

/// Produces the get descriptor, and the set descriptor for writable fields, of one record.
///
/// This is a pure function of its inputs, so the output can be snapshot tested.
pub fn generate(
    record: &FieldRecord,
    version: ProtocolVersion,
    policy: ReplyPolicy,
) -> Result<Vec<OperationDescriptor>, GenerationError> {
    let width = field_width(record)?;
    let address_bytes =
        version
            .encode_field(record.address)
            .ok_or_else(|| GenerationError::AddressTooWide {
                field: record.name.clone(),
                address: record.address,
            })?;
    let size_bytes = version
        .encode_field(record.size)
        .ok_or_else(|| GenerationError::UnsupportedWidth {
            field: record.name.clone(),
            size: record.size,
        })?;
    let get = OperationDescriptor {
        field_name: record.name.clone(),
        version,
        address_bytes,
        size_bytes,
        kind: OperationKind::Get,
        response_skip_count: policy.skip_count,
        width,
        expects_status: true,
        doc: format!("{} (initial: {})", record.description, record.initial_value),
    };
    let set = match record.access {
        Access::ReadOnly => None,
        Access::ReadWrite => Some(OperationDescriptor {
            kind: OperationKind::Set,
            expects_status: policy.status_return,
            ..get.clone()
        }),
    };
    Ok(std::iter::once(get).chain(set).collect())
}

/// A problem with one row of a document.
#[derive(displaydoc::Display, Debug, Clone, Eq, PartialEq)]
pub enum RowError {
    /// {0}
    Format(FormatError),
    /// line {line_number}: {error}
    Generation {
        line_number: usize,
        error: GenerationError,
    },
}

impl std::error::Error for RowError {}

/// The result of running the generator over one document.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Generated {
    pub descriptors: Vec<OperationDescriptor>,
    /// One entry per record and protocol version that produced descriptors, in order.
    pub field_index: Vec<String>,
    pub errors: Vec<RowError>,
}

pub struct AccessorGenerator {
    versions: Vec<ProtocolVersion>,
    policy: ReplyPolicy,
    syntax: TableSyntax,
}

impl AccessorGenerator {
    pub fn new(
        versions: Vec<ProtocolVersion>,
        policy: ReplyPolicy,
        syntax: TableSyntax,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            versions,
            policy: policy.validate()?,
            syntax,
        })
    }

    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Parses `document` and generates descriptors for every record it contains. Bad rows are
    /// collected in [`Generated::errors`] rather than stopping the run.
    pub fn run(&self, document: &str) -> Generated {
        let mut generated = Generated::default();
        let mut parser = parse_document(document, &self.syntax);
        while let Some(result) = parser.next() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    generated.errors.push(RowError::Format(e));
                    continue;
                }
            };
            if let Err(error) = field_width(&record) {
                warn!("Line {}: {}", parser.line_number(), error);
                generated.errors.push(RowError::Generation {
                    line_number: parser.line_number(),
                    error,
                });
                continue;
            }
            for &version in &self.versions {
                match generate(&record, version, self.policy) {
                    Ok(descriptors) => {
                        generated.field_index.push(record.name.clone());
                        generated.descriptors.extend(descriptors);
                    }
                    Err(error) => {
                        warn!("Line {}: {}", parser.line_number(), error);
                        generated.errors.push(RowError::Generation {
                            line_number: parser.line_number(),
                            error,
                        });
                    }
                }
            }
        }
        debug!(
            "Generated {} descriptors, {} errors",
            generated.descriptors.len(),
            generated.errors.len()
        );
        generated
    }

    /// Runs each document independently; errors in one never affect another.
    pub fn run_batch<'d>(&self, documents: impl IntoIterator<Item = &'d str>) -> Vec<Generated> {
        documents
            .into_iter()
            .map(|document| self.run(document))
            .collect()
    }
}
