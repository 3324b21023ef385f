//! CLI argument parsing

use crate::backends;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Generate dynamic help text for the backend argument
fn backend_help() -> String {
    format!(
        "Device backend to use [available: {}]",
        backends::backend_names_short()
    )
}

/// How to resolve several matching targets
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectMode {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Take the first match
    First,
    /// Fail unless exactly one target matches
    Unique,
}

#[derive(Parser)]
#[command(name = "mboot")]
#[command(
    author,
    version,
    about = "NXP MCU bootloader memory transfer tool",
    long_about = None
)]
pub struct Cli {
    /// Select target by name (case-insensitive substring, e.g. KL27Z)
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Debug level: 0 off, 1 info, 2 debug
    #[arg(
        short,
        long,
        global = true,
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    pub debug: u8,

    /// How to pick a target when several match
    #[arg(long, global = true, value_enum, default_value_t = SelectMode::Prompt)]
    pub select: SelectMode,

    #[arg(short, long, global = true, default_value = "dummy", help = backend_help())]
    pub backend: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get MCU info (bootloader properties)
    Info,

    /// Get list of available memories
    #[command(alias = "memlist")]
    ListMemories,

    /// Configure external memory
    ConfigureMemory {
        /// Start address for storing the memory configuration inside RAM
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// External memory identifier (e.g. 0x9 for FlexSPI NOR)
        #[arg(short = 'i', long, default_value = "0", value_parser = parse_hex_u32)]
        memory_id: u32,

        /// Memory configuration block
        file: PathBuf,
    },

    /// Receive SB file
    #[command(alias = "sbfile")]
    ReceiveImage {
        /// Secure binary (*.sb) file
        file: PathBuf,
    },

    /// Write data into MCU memory
    Write {
        /// Start address (required for binary files without a base)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Number of leading file bytes to skip
        #[arg(short, long, default_value = "0", value_parser = parse_hex_u32)]
        offset: u32,

        /// Input file (*.bin, *.hex, *.ihex, *.srec, *.s19, *.sb)
        file: PathBuf,
    },

    /// Read data from MCU memory
    Read {
        /// Start address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes (defaults to the end of flash)
        #[arg(value_parser = parse_hex_u32)]
        length: Option<u32>,

        /// Collapse repeated rows in the hex dump
        #[arg(short, long)]
        compress: bool,

        /// Save into file instead of printing (*.bin, *.hex, *.ihex, *.srec, *.s19)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Erase MCU memory
    Erase {
        /// Start address
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Number of bytes to erase
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: Option<u32>,

        /// Erase complete MCU memory
        #[arg(short, long, conflicts_with_all = ["address", "length"])]
        mass: bool,
    },

    /// Read/Write eFuse from MCU
    #[command(alias = "efuse")]
    ReadWriteFuse {
        /// eFuse index
        #[arg(value_parser = parse_hex_u32)]
        index: u32,

        /// Value to program before reading back
        #[arg(value_parser = parse_hex_u32)]
        value: Option<u32>,

        /// eFuse word length in bytes
        #[arg(short, long, default_value = "4", value_parser = parse_hex_u32)]
        length: u32,
    },

    /// Unlock MCU
    Unlock {
        /// Backdoor key as S:<16 ASCII chars> or X:<32 hex digits>
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Fill MCU memory with a 32-bit pattern
    Fill {
        /// Start address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes
        #[arg(value_parser = parse_hex_u32)]
        length: u32,

        /// Fill pattern
        #[arg(short, long, default_value = "0xFFFFFFFF", value_parser = parse_hex_u32)]
        pattern: u32,
    },

    /// Copy backup app from address to main app region
    Update {
        /// Backup application address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
    },

    /// Call code at address with specified argument
    Call {
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        #[arg(value_parser = parse_hex_u32)]
        argument: u32,
    },

    /// Execute code at address with specified argument and stack pointer
    Execute {
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        #[arg(value_parser = parse_hex_u32)]
        argument: u32,

        #[arg(value_parser = parse_hex_u32)]
        stackpointer: u32,
    },

    /// Reset MCU
    Reset,

    /// List available device backends
    ListBackends,
}
