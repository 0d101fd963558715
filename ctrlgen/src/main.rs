mod config;
mod console;

use crate::config::{Config, DEFAULT_BAUD_RATE};
use ctrltable::accessor::AccessorGenerator;
use ctrltable::channel::SerialChannel;
use ctrltable::render::{EmissionBackend, ListingBackend, RustModuleBackend};
use eyre::{eyre, Report, WrapErr};
use log::{error, info};
use std::env;
use std::fs::read_to_string;
use std::process::exit;

fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    pretty_env_logger::init();
    color_backtrace::install();

    let config = Config::from_file()?;

    let mut args = env::args();
    let binary_name = args
        .next()
        .ok_or_else(|| eyre!("Binary name missing"))?;
    let args: Vec<String> = args.collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>()[..] {
        ["generate", document, motor] => generate(&config, document, motor, false),
        ["generate", document, motor, "--list"] => generate(&config, document, motor, true),
        ["console"] => console(&config, None),
        ["console", port] => console(&config, Some(port)),
        _ => {
            eprintln!("Usage:");
            eprintln!("  {} generate <document.md> <motor> [--list]", binary_name);
            eprintln!("  {} console [serial port]", binary_name);
            exit(1);
        }
    }
}

/// Prints the operations generated from one control-table document.
fn generate(config: &Config, document: &str, motor: &str, list: bool) -> Result<(), Report> {
    let generator = AccessorGenerator::new(
        config.versions.clone(),
        config.reply,
        config.table.clone(),
    )?;
    let text = read_to_string(document).wrap_err_with(|| format!("Reading {}", document))?;

    let generated = generator.run(&text);
    for row_error in &generated.errors {
        error!("{}: {}", document, row_error);
    }
    info!(
        "{} fields, {} operations from {}",
        generated.field_index.len(),
        generated.descriptors.len(),
        document
    );

    let rendered = if list {
        ListingBackend.render(&generated.descriptors)
    } else {
        RustModuleBackend::new(motor).render(&generated.descriptors)
    }
    .wrap_err("Rendering operations")?;
    print!("{}", rendered);
    Ok(())
}

fn console(config: &Config, port: Option<&str>) -> Result<(), Report> {
    let serial = config.serial.as_ref();
    let port = match port.or_else(|| serial.map(|serial| serial.port.as_str())) {
        Some(port) => port,
        None => {
            list_ports()?;
            return Err(eyre!("No serial port given, and none in the config file"));
        }
    };
    let baud_rate = serial.map_or(DEFAULT_BAUD_RATE, |serial| serial.baud_rate);
    let timeout = serial.map_or(ctrltable::bus::DEFAULT_RESPONSE_TIMEOUT, |serial| {
        serial.timeout()
    });

    let channel = SerialChannel::open(port, baud_rate)
        .wrap_err_with(|| format!("Failed to open serial port {}", port))?;
    info!("Opened {} at {} baud. Type hex bytes to send, q to quit.", port, baud_rate);
    console::run(channel, timeout)
}

fn list_ports() -> Result<(), Report> {
    let ports = serialport::available_ports().wrap_err("Listing serial ports")?;
    if ports.is_empty() {
        eprintln!("No serial ports found.");
    } else {
        eprintln!("Available serial ports:");
        for port in ports {
            eprintln!("  {}", port.port_name);
        }
    }
    Ok(())
}
