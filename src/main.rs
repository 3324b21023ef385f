//! mboot - memory transfer tool for NXP MCU bootloaders
//!
//! Talks to the ROM bootloader of Kinetis, LPC and i.MX RT parts to read,
//! write and erase memory, query bootloader properties and run the handful
//! of control commands the bootloader offers.
//!
//! # Architecture
//!
//! All device logic lives in `mboot-core`. Each invocation builds one
//! [`Transfer`] from a device bus (chosen with `--backend`), a selection
//! strategy (`--select`) and a [`Config`], runs a single command and
//! reports the outcome. The target is opened and closed inside that one
//! command; nothing is kept between invocations.

mod backends;
mod cli;
mod commands;
mod progress;

use clap::Parser;
use cli::{Cli, Commands, SelectMode};
use mboot_core::config::DebugLevel;
use mboot_core::select::{PromptSelection, RuleSelection, SelectionStrategy};
use mboot_core::transfer::Transfer;
use mboot_core::Config;
use progress::IndicatifProgress;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = DebugLevel::from_level(cli.debug);

    // Initialize logger; RUST_LOG still overrides the --debug level
    env_logger::Builder::new()
        .filter_level(log_level(debug))
        .parse_env(env_logger::Env::default())
        .init();

    println!();

    match run(cli, debug) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            if debug.is_verbose() {
                println!();
            }
            println!("{}", report);
            ExitCode::FAILURE
        }
    }
}

/// Log level selected by `--debug`
fn log_level(debug: DebugLevel) -> log::LevelFilter {
    match debug {
        DebugLevel::Off => log::LevelFilter::Warn,
        DebugLevel::Info => log::LevelFilter::Info,
        DebugLevel::Debug => log::LevelFilter::Debug,
    }
}

/// Run one command, returning the operator-facing error report on failure
fn run(cli: Cli, debug: DebugLevel) -> std::result::Result<(), String> {
    if let Commands::ListBackends = cli.command {
        commands::list_backends();
        return Ok(());
    }

    let bus = backends::open_bus(&cli.backend).map_err(|e| e.report(debug.is_verbose()))?;
    let config = Config {
        target: cli.target,
        debug,
    };
    let selector: Box<dyn SelectionStrategy> = match cli.select {
        SelectMode::Prompt => Box::new(PromptSelection::stdio()),
        SelectMode::First => Box::new(RuleSelection::First),
        SelectMode::Unique => Box::new(RuleSelection::Unique),
    };
    let mut transfer =
        Transfer::new(bus.as_ref(), selector, config).with_progress(Box::new(IndicatifProgress::new()));

    let result = match cli.command {
        Commands::Info => commands::run_info(&mut transfer),
        Commands::ListMemories => commands::run_list_memories(&mut transfer),
        Commands::ConfigureMemory {
            address,
            memory_id,
            file,
        } => commands::run_configure_memory(&mut transfer, &file, address, memory_id),
        Commands::ReceiveImage { file } => commands::run_receive_image(&mut transfer, &file),
        Commands::Write {
            address,
            offset,
            file,
        } => commands::run_write(&mut transfer, &file, address, offset),
        Commands::Read {
            address,
            length,
            compress,
            file,
        } => commands::run_read(&mut transfer, address, length, compress, file.as_deref()),
        Commands::Erase {
            address,
            length,
            mass,
        } => commands::run_erase(&mut transfer, address, length, mass),
        Commands::ReadWriteFuse {
            index,
            value,
            length,
        } => commands::run_fuse(&mut transfer, index, value, length),
        Commands::Unlock { key } => commands::run_unlock(&mut transfer, key.as_deref()),
        Commands::Fill {
            address,
            length,
            pattern,
        } => commands::run_fill(&mut transfer, address, length, pattern),
        Commands::Update { address } => commands::run_update(&mut transfer, address),
        Commands::Call { address, argument } => {
            commands::run_call(&mut transfer, address, argument)
        }
        Commands::Execute {
            address,
            argument,
            stackpointer,
        } => commands::run_execute(&mut transfer, address, argument, stackpointer),
        Commands::Reset => commands::run_reset(&mut transfer),
        Commands::ListBackends => Ok(()),
    };

    log::debug!("Transfer finished in state {}", transfer.state());
    result.map_err(|e| transfer.report(&e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(DebugLevel::from_level(0)), log::LevelFilter::Warn);
        assert_eq!(log_level(DebugLevel::from_level(1)), log::LevelFilter::Info);
        assert_eq!(log_level(DebugLevel::from_level(2)), log::LevelFilter::Debug);
    }

    #[test]
    fn test_debug_flag_enables_logger() {
        let cli = Cli::try_parse_from(["mboot", "-d", "1", "info"]).unwrap();
        let logger = env_logger::Builder::new()
            .filter_level(log_level(DebugLevel::from_level(cli.debug)))
            .build();
        let info = log::Metadata::builder()
            .level(log::Level::Info)
            .target("mboot_core::select")
            .build();
        let debug = log::Metadata::builder()
            .level(log::Level::Debug)
            .target("mboot_core::transfer")
            .build();
        assert!(log::Log::enabled(&logger, &info));
        assert!(!log::Log::enabled(&logger, &debug));
    }
}
