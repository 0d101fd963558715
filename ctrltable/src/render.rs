//! Rendering operation descriptors as text.
//!
//! Rendering is kept separate from generation so that protocol details can be tested on the
//! descriptors themselves, and so that the output syntax can be swapped without touching them.

use crate::accessor::{OperationDescriptor, OperationKind};
use crate::ProtocolVersion;
use core::fmt::{self, Write};

pub trait EmissionBackend {
    fn render(&self, descriptors: &[OperationDescriptor]) -> Result<String, fmt::Error>;
}

/// Maps anything that can't appear in a Rust identifier to `_`.
pub fn identifier(name: &str) -> String {
    let mut identifier: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if identifier.starts_with(|c: char| c.is_ascii_digit()) {
        identifier.insert(0, '_');
    }
    identifier
}

fn value_type(width: usize) -> &'static str {
    match width {
        1 => "u8",
        2 => "u16",
        _ => "u32",
    }
}

fn byte_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders one Rust module per protocol version, with a function per descriptor that performs
/// the operation on a `ctrltable::bus::Bus`.
pub struct RustModuleBackend {
    /// Included in every function name, e.g. `get_xl320_led`.
    pub motor: String,
}

impl RustModuleBackend {
    pub fn new(motor: &str) -> Self {
        Self {
            motor: identifier(&motor.to_lowercase()),
        }
    }

    fn render_get(&self, out: &mut String, descriptor: &OperationDescriptor) -> fmt::Result {
        let value_type = value_type(descriptor.width);
        let decode = match descriptor.width {
            1 => "params[0]".to_string(),
            width => format!(
                "{}::from_le_bytes([{}])",
                value_type,
                (0..width)
                    .map(|i| format!("params[{}]", i))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        writeln!(out, "    /// {}", descriptor.doc)?;
        writeln!(
            out,
            "    pub fn get_{}_{}<C: ByteChannel>(bus: &mut Bus<C>, id: u8) -> Result<{}, BusError> {{",
            self.motor,
            identifier(&descriptor.field_name),
            value_type
        )?;
        writeln!(
            out,
            "        let params = bus.read(id, VERSION, &[{}], {}, {})?;",
            byte_list(&descriptor.read_params()),
            descriptor.response_skip_count,
            descriptor.width
        )?;
        writeln!(out, "        Ok({})", decode)?;
        writeln!(out, "    }}")
    }

    fn render_set(&self, out: &mut String, descriptor: &OperationDescriptor) -> fmt::Result {
        writeln!(
            out,
            "    pub fn set_{}_{}<C: ByteChannel>(bus: &mut Bus<C>, id: u8, value: {}) -> Result<Option<StatusPacket>, BusError> {{",
            self.motor,
            identifier(&descriptor.field_name),
            value_type(descriptor.width)
        )?;
        writeln!(
            out,
            "        let mut params = vec![{}];",
            byte_list(&descriptor.address_bytes)
        )?;
        writeln!(out, "        params.extend_from_slice(&value.to_le_bytes());")?;
        writeln!(
            out,
            "        bus.write(id, VERSION, &params, {}, {})",
            descriptor.response_skip_count, descriptor.expects_status
        )?;
        writeln!(out, "    }}")
    }
}

impl EmissionBackend for RustModuleBackend {
    fn render(&self, descriptors: &[OperationDescriptor]) -> Result<String, fmt::Error> {
        let mut out = String::new();
        writeln!(
            out,
            "//! Auto-generated from the {} control table. Do not modify.",
            self.motor
        )?;
        for version in ProtocolVersion::ALL {
            let mut for_version = descriptors
                .iter()
                .filter(|descriptor| descriptor.version == version)
                .peekable();
            if for_version.peek().is_none() {
                continue;
            }
            writeln!(out)?;
            writeln!(out, "pub mod protocol_{} {{", version.number())?;
            writeln!(out, "    use ctrltable::bus::Bus;")?;
            writeln!(out, "    use ctrltable::channel::ByteChannel;")?;
            writeln!(out, "    use ctrltable::{{BusError, ProtocolVersion, StatusPacket}};")?;
            writeln!(out)?;
            writeln!(out, "    const VERSION: ProtocolVersion = ProtocolVersion::{:?};", version)?;
            for descriptor in for_version {
                writeln!(out)?;
                match descriptor.kind {
                    OperationKind::Get => self.render_get(&mut out, descriptor)?,
                    OperationKind::Set => self.render_set(&mut out, descriptor)?,
                }
            }
            writeln!(out, "}}")?;
        }
        Ok(out)
    }
}

/// Renders a plain listing, one descriptor per line, for eyeballing generator output.
pub struct ListingBackend;

impl EmissionBackend for ListingBackend {
    fn render(&self, descriptors: &[OperationDescriptor]) -> Result<String, fmt::Error> {
        let mut out = String::new();
        for descriptor in descriptors {
            writeln!(
                out,
                "{:?}\t{}\t{}\t[{}]\t[{}]\tskip {}",
                descriptor.version,
                descriptor.kind,
                descriptor.field_name,
                byte_list(&descriptor.address_bytes),
                byte_list(&descriptor.size_bytes),
                descriptor.response_skip_count
            )?;
        }
        Ok(out)
    }
}
