//! mboot-core - Core library for MCU bootloader memory transfers
//!
//! This crate provides everything that sits between the command line and a
//! bootloader connection: firmware image conversion, hex dumps of retrieved
//! memory, sector-aligned erase geometry, device selection and the transfer
//! workflow that ties them together.
//!
//! The bootloader itself is reached through the [`device::Device`] trait.
//! Concrete backends (USB HID drivers, emulators) live in other crates and
//! hand out devices through a [`device::DeviceBus`].
//!
//! # Example
//!
//! ```ignore
//! use mboot_core::select::RuleSelection;
//! use mboot_core::transfer::{ReadOutcome, ReadTarget, Transfer};
//! use mboot_core::Config;
//!
//! let mut transfer = Transfer::new(&bus, Box::new(RuleSelection::First), Config::default());
//! if let ReadOutcome::Dump(text) = transfer.read(0x0, Some(64), &ReadTarget::dump(false))? {
//!     println!("{}", text);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod align;
pub mod config;
pub mod device;
pub mod error;
pub mod hexdump;
pub mod image;
pub mod select;
pub mod tags;
pub mod transfer;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
