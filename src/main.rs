//! itedlb - Flash tool for ITE embedded controllers
//!
//! Drives the ITE DLB4 download board over USB to reprogram the flash
//! behind an ITE EC, either in-circuit through the EC debug interface or
//! directly on the SPI pins.
//!
//! # Architecture
//!
//! - `itedlb-core` holds the wire protocol, bring-up and the four flash
//!   passes (erase, blank check, program, verify). It only needs a
//!   [`itedlb_core::BulkPipe`].
//! - `itedlb-usb` provides that pipe over `nusb`.
//! - `itedlb-dummy` emulates the board in memory for dry runs.

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use std::time::Instant;

/// Printed after any failure that left the board in an unknown state
const REPLUG_HINT: &str =
    "Flash Fail... Please re-plug the DLB4 download board or power on the EC, then re-run";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    println!("ITE DLB4 Flash Tool v{}", env!("CARGO_PKG_VERSION"));

    if cli.list {
        return commands::list_boards();
    }

    if !cli.has_work() {
        println!("choose a file to flash..");
        return Ok(());
    }

    let start = Instant::now();
    log::info!("Start");

    if let Err(e) = commands::run(&cli) {
        eprintln!("Error: {}", e);
        eprintln!("{}", REPLUG_HINT);
        log::info!("Failed after {:.1?}", start.elapsed());
        std::process::exit(1);
    }

    log::info!("Done in {:.1?}", start.elapsed());
    Ok(())
}
