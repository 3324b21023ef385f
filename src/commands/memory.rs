//! Memory transfer commands: write, read, erase, fill, configure, SB files

use log::info;
use mboot_core::image::ImageFormat;
use mboot_core::tags::size_fmt;
use mboot_core::transfer::{
    EraseOutcome, EraseRequest, MassErase, ReadOutcome, ReadTarget, Transfer,
};
use mboot_core::Result;
use std::path::Path;

/// Program an image file into target memory
pub fn run_write(
    transfer: &mut Transfer,
    file: &Path,
    address: Option<u32>,
    offset: u32,
) -> Result<()> {
    // Resolve the format before anything is printed or opened
    let format = ImageFormat::from_path(file)?;

    println!(" Writing into MCU memory, please wait !\n");
    let summary = transfer.write(file, format, address, offset as usize)?;

    info!(
        "Wrote {} ({} bytes) at 0x{:08X}",
        size_fmt(summary.length as u64),
        summary.length,
        summary.address
    );
    println!(" Wrote Successfully.");
    Ok(())
}

/// Read target memory into a hex dump or a file
pub fn run_read(
    transfer: &mut Transfer,
    address: u32,
    length: Option<u32>,
    compress: bool,
    file: Option<&Path>,
) -> Result<()> {
    let target = match file {
        Some(path) => ReadTarget::file(path)?,
        None => ReadTarget::dump(compress),
    };

    println!(" Reading from MCU memory, please wait ! \n");
    match transfer.read(address, length, &target)? {
        ReadOutcome::Dump(text) => println!("{}", text),
        ReadOutcome::Saved { path, length } => {
            info!("Saved {} bytes", length);
            println!("\n Successfully saved into: {}", path.display());
        }
    }
    Ok(())
}

/// Erase a region or the whole flash
pub fn run_erase(
    transfer: &mut Transfer,
    address: Option<u32>,
    length: Option<u32>,
    mass: bool,
) -> Result<()> {
    let request = if mass {
        EraseRequest::Mass
    } else {
        EraseRequest::Region { address, length }
    };

    match transfer.erase(request)? {
        EraseOutcome::Mass(MassErase::Unsecure) => info!("Used flash erase all unsecure"),
        EraseOutcome::Mass(MassErase::Plain) => info!("Used flash erase all"),
        EraseOutcome::Region(window) => info!(
            "Erased 0x{:X} bytes at 0x{:08X}",
            window.length, window.start_address
        ),
    }
    println!(" Erased Successfully.");
    Ok(())
}

/// Fill target memory with a 32-bit pattern
pub fn run_fill(transfer: &mut Transfer, address: u32, length: u32, pattern: u32) -> Result<()> {
    transfer.fill(address, length, pattern)?;
    println!(" Filled Successfully.");
    Ok(())
}

/// Load a memory configuration block and apply it
pub fn run_configure_memory(
    transfer: &mut Transfer,
    file: &Path,
    address: Option<u32>,
    memory_id: u32,
) -> Result<()> {
    let placed = transfer.configure_memory(file, address, memory_id)?;
    println!(
        " Memory 0x{:X} configured (block at 0x{:08X}).",
        memory_id, placed
    );
    Ok(())
}

/// Send a secure binary file
pub fn run_receive_image(transfer: &mut Transfer, file: &Path) -> Result<()> {
    let sent = transfer.receive_sb_file(file)?;
    println!(" Sent {} ({} bytes) Successfully.", size_fmt(sent as u64), sent);
    Ok(())
}
