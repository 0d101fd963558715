//! Extraction of control-table rows from loosely structured documentation.
//!
//! The documents this is aimed at are markdown pages with one or two control-table sections
//! (e.g. EEPROM and RAM areas), each introduced by an anchor and laid out as a pipe table:
//!
//! ```text
//! ## [Control Table of EEPROM Area](#control-table-of-eeprom-area)
//!
//! | Address | Size(Byte) | Data Name                | Access | Initial Value |
//! |:-------:|:----------:|:-------------------------|:------:|:-------------:|
//! | 0       | 2          | [Model Number](#model-number) | R | 350          |
//! ```

use crate::{FormatError, RowProblem};
use log::{debug, warn};
use serde_derive::Deserialize;
use std::iter::FusedIterator;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    pub fn parse(cell: &str) -> Option<Self> {
        match cell {
            "R" | "RO" => Some(Self::ReadOnly),
            "RW" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// One addressable item of a device's control table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldRecord {
    pub address: u16,
    /// Width in bytes, as documented.
    pub size: u16,
    /// Normalized name, usable as part of an identifier.
    pub name: String,
    pub description: String,
    pub access: Access,
    /// Documentation only. May be `-` or empty.
    pub initial_value: String,
}

/// Strips markdown link syntax and turns a documented name into `snake_case`.
///
/// `[Secondary(Shadow) ID](#secondary-shadow-id)` becomes `secondary_shadow_id`.
pub fn normalize_name(raw: &str) -> String {
    let raw = raw.trim();
    let label = match raw.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or(rest),
        None => raw,
    };
    label
        .trim()
        .replace("(Shadow)", "_shadow")
        .replace(' ', "_")
        .to_lowercase()
}

/// The markers that drive [`FieldTableParser`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TableSyntax {
    /// Text found on the line that starts each control-table section.
    pub section_marker: String,
    /// Text found on the line between a table's header and its rows.
    pub separator: String,
    pub delimiter: char,
    /// Text identifying a table's header row.
    pub header_marker: String,
    /// If the header row contains this, rows have a description column after the name.
    pub description_header: String,
    /// Rows containing any of these are placeholders, not fields.
    pub skip_markers: Vec<String>,
    /// The number of table sections a document has. Scanning stops after the last one.
    pub max_sections: usize,
}

impl Default for TableSyntax {
    fn default() -> Self {
        Self {
            section_marker: "control-table-of".to_string(),
            separator: "---".to_string(),
            delimiter: '|',
            header_marker: "| Address".to_string(),
            description_header: "Description".to_string(),
            skip_markers: vec!["---".to_string(), "...".to_string(), "…".to_string()],
            max_sections: 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ScanState {
    /// Looking for a table (after `sections` markers so far).
    Searching { sections: usize },
    InTable { sections: usize },
    /// Ignoring the rest of a section that had a bad row.
    Skipping { sections: usize },
    /// Done with this document.
    Idle,
}

/// A lazy, single-pass iterator over the field records of one document.
///
/// A malformed row yields a [`FormatError`] and abandons the rest of its section; scanning
/// picks up again at the next section marker.
pub struct FieldTableParser<'s, I> {
    lines: I,
    syntax: &'s TableSyntax,
    state: ScanState,
    line_number: usize,
    has_description: bool,
}

impl<'s, I, S> FieldTableParser<'s, I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    pub fn new(lines: I, syntax: &'s TableSyntax) -> Self {
        Self {
            lines,
            syntax,
            state: ScanState::Searching { sections: 0 },
            line_number: 0,
            has_description: false,
        }
    }

    /// The 1-based number of the line most recently consumed.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    fn sections(&self) -> usize {
        match self.state {
            ScanState::Searching { sections }
            | ScanState::InTable { sections }
            | ScanState::Skipping { sections } => sections,
            ScanState::Idle => self.syntax.max_sections,
        }
    }

    /// Advances the state machine for one line. Returns whether the line is a table row.
    fn step(&mut self, line: &str) -> bool {
        let sections = self.sections();
        if line.contains(&self.syntax.section_marker) {
            debug!("Section {} starts at line {}", sections + 1, self.line_number);
            self.state = ScanState::Searching {
                sections: sections + 1,
            };
            return false;
        }
        match self.state {
            ScanState::Searching { sections }
                if sections > 0 && line.contains(&self.syntax.separator) =>
            {
                self.state = ScanState::InTable { sections };
            }
            ScanState::InTable { sections } if line.trim().is_empty() => {
                debug!("Table ends at line {}", self.line_number);
                self.state = if sections >= self.syntax.max_sections {
                    ScanState::Idle
                } else {
                    ScanState::Searching { sections }
                };
                return false;
            }
            _ => {
                if line.contains(&self.syntax.header_marker) {
                    self.has_description = line.contains(&self.syntax.description_header);
                }
            }
        }
        matches!(self.state, ScanState::InTable { .. })
            && !self
                .syntax
                .skip_markers
                .iter()
                .any(|marker| line.contains(marker.as_str()))
    }

    fn abandon_section(&mut self) {
        let sections = self.sections();
        self.state = if sections >= self.syntax.max_sections {
            ScanState::Idle
        } else {
            ScanState::Skipping { sections }
        };
    }

    fn decode_row(&self, line: &str) -> Result<FieldRecord, RowProblem> {
        let delimiter = self.syntax.delimiter;
        let trimmed = line.trim();
        let inner = trimmed.strip_prefix(delimiter).unwrap_or(trimmed);
        let inner = inner.strip_suffix(delimiter).unwrap_or(inner);
        let cells: Vec<&str> = inner.split(delimiter).map(str::trim).collect();

        let expected = if self.has_description { 6 } else { 5 };
        if cells.len() < expected {
            return Err(RowProblem::ColumnCount {
                expected,
                found: cells.len(),
            });
        }
        let (raw_name, description, access, initial_value) = if self.has_description {
            (cells[2], cells[3], cells[4], cells[5])
        } else {
            (cells[2], cells[2], cells[3], cells[4])
        };

        Ok(FieldRecord {
            address: cells[0]
                .parse()
                .map_err(|_| RowProblem::Address(cells[0].to_string()))?,
            size: cells[1]
                .parse()
                .map_err(|_| RowProblem::Size(cells[1].to_string()))?,
            name: normalize_name(raw_name),
            description: description.to_string(),
            access: Access::parse(access).ok_or_else(|| RowProblem::Access(access.to_string()))?,
            initial_value: initial_value.to_string(),
        })
    }
}

impl<I, S> Iterator for FieldTableParser<'_, I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Result<FieldRecord, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.state != ScanState::Idle {
            let line = match self.lines.next() {
                Some(line) => line,
                None => {
                    self.state = ScanState::Idle;
                    return None;
                }
            };
            let line = line.as_ref();
            self.line_number += 1;
            if !self.step(line) {
                continue;
            }
            match self.decode_row(line) {
                Ok(record) => return Some(Ok(record)),
                Err(reason) => {
                    warn!(
                        "Abandoning section {} at line {}: {}",
                        self.sections(),
                        self.line_number,
                        reason
                    );
                    self.abandon_section();
                    return Some(Err(FormatError {
                        line_number: self.line_number,
                        line: line.to_string(),
                        reason,
                    }));
                }
            }
        }
        None
    }
}

impl<I, S> FusedIterator for FieldTableParser<'_, I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
}

/// Parses the field records of a whole document held in memory.
pub fn parse_document<'a>(
    document: &'a str,
    syntax: &'a TableSyntax,
) -> FieldTableParser<'a, std::str::Lines<'a>> {
    FieldTableParser::new(document.lines(), syntax)
}
