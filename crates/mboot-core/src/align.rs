//! Sector-aligned erase geometry
//!
//! Flash can only be erased in whole sectors. Before a region erase, and
//! before every write, the requested byte range is widened to the smallest
//! sector-aligned window that contains it.

use crate::error::{Error, Result};

/// A sector-aligned erase window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseWindow {
    /// First byte of the window (multiple of the sector size)
    pub start_address: u32,
    /// Length of the window in bytes (multiple of the sector size)
    pub length: u32,
}

impl EraseWindow {
    /// One past the last byte of the window
    pub fn end(&self) -> u64 {
        self.start_address as u64 + self.length as u64
    }

    /// Whether the window covers no bytes
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the window contains `[address, address + length)`
    pub fn covers(&self, address: u32, length: u32) -> bool {
        self.start_address <= address && self.end() >= address as u64 + length as u64
    }
}

/// Compute the erase window covering `[address, address + length)`
///
/// `sector_size` must be a non-zero power of two. The start is rounded down
/// and the end rounded up to sector boundaries, so the window always contains
/// the requested range even when `address` is not aligned. A zero `length`
/// yields an empty window at the aligned start.
///
/// # Errors
/// * `SectorSize` - If `sector_size` is zero or not a power of two
/// * `Range` - If the window would extend past the 32-bit address space
pub fn compute_erase_window(address: u32, length: u32, sector_size: u32) -> Result<EraseWindow> {
    if !sector_size.is_power_of_two() {
        return Err(Error::SectorSize(sector_size));
    }

    let mask = sector_size as u64 - 1;
    let start = address as u64 & !mask;

    if length == 0 {
        return Ok(EraseWindow {
            start_address: start as u32,
            length: 0,
        });
    }

    let end = (address as u64 + length as u64 + mask) & !mask;
    if end > u32::MAX as u64 + 1 || end - start > u32::MAX as u64 {
        return Err(Error::Range(format!(
            "erase range 0x{:08X}+0x{:X} exceeds the 32-bit address space",
            address, length
        )));
    }

    Ok(EraseWindow {
        start_address: start as u32,
        length: (end - start) as u32,
    })
}
