//! Fuse, security and execution control commands

use mboot_core::device::BackdoorKey;
use mboot_core::transfer::Transfer;
use mboot_core::Result;

/// Optionally program an eFuse word, then print its value
pub fn run_fuse(transfer: &mut Transfer, index: u32, value: Option<u32>, length: u32) -> Result<()> {
    let read_value = transfer.fuse(index, value, length)?;
    println!(" eFuse[{}] = 0x{:X}", index, read_value);
    Ok(())
}

/// Remove flash security, with a backdoor key or by mass erase
pub fn run_unlock(transfer: &mut Transfer, key: Option<&str>) -> Result<()> {
    // Parse before selecting a device so a bad key never touches the target
    let key = key.map(str::parse::<BackdoorKey>).transpose()?;
    transfer.unlock(key)?;
    println!(" Unlocked Successfully.");
    Ok(())
}

/// Start a reliable update from the backup application at `address`
pub fn run_update(transfer: &mut Transfer, address: u32) -> Result<()> {
    transfer.update(address)?;
    println!(" Update OK");
    Ok(())
}

/// Call code on the target
pub fn run_call(transfer: &mut Transfer, address: u32, argument: u32) -> Result<()> {
    transfer.call(address, argument)?;
    println!(" Call OK");
    Ok(())
}

/// Jump to code on the target with a new stack pointer
pub fn run_execute(
    transfer: &mut Transfer,
    address: u32,
    argument: u32,
    stack_pointer: u32,
) -> Result<()> {
    transfer.execute(address, argument, stack_pointer)?;
    println!(" Execute OK");
    Ok(())
}

/// Reset the target
pub fn run_reset(transfer: &mut Transfer) -> Result<()> {
    transfer.reset()?;
    println!(" Reset OK");
    Ok(())
}
