use ctrltable::table::TableSyntax;
use ctrltable::{ProtocolVersion, ReplyPolicy};
use eyre::{Report, WrapErr};
use serde_derive::Deserialize;
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILENAME: &str = "ctrlgen.toml";
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Protocol versions to generate operations for, in order.
    pub versions: Vec<ProtocolVersion>,
    pub table: TableSyntax,
    pub reply: ReplyPolicy,
    pub serial: Option<SerialConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            versions: ProtocolVersion::ALL.to_vec(),
            table: TableSyntax::default(),
            reply: ReplyPolicy::default(),
            serial: None,
        }
    }
}

impl Config {
    /// Reads the config file from the current directory, falling back to defaults if there is
    /// none.
    pub fn from_file() -> Result<Config, Report> {
        if !Path::new(CONFIG_FILENAME).exists() {
            return Ok(Config::default());
        }
        Config::read(CONFIG_FILENAME)
    }

    fn read(filename: &str) -> Result<Config, Report> {
        let config_file =
            read_to_string(filename).wrap_err_with(|| format!("Reading {}", filename))?;
        toml::from_str(&config_file).wrap_err_with(|| format!("Parsing {}", filename))
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How long a single read waits for bytes.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    100
}
