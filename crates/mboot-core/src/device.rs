//! Bootloader device abstraction
//!
//! This module provides the [`Device`] trait, the command surface of an open
//! bootloader connection, and the [`DeviceBus`] trait through which a backend
//! enumerates and opens targets. The packet framing and wire protocol behind
//! these traits belong to the backend.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::tags::{is_command_available, CommandTag, PropertyTag};

/// Identity of an attached target, as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Product name shown to the operator and matched by `--target`
    pub name: String,
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Backend-specific path (bus/port, emulator id, ...)
    pub path: String,
}

impl DeviceDescriptor {
    /// Whether `filter` is a case-insensitive substring of the name
    pub fn matches(&self, filter: &str) -> bool {
        self.name.to_lowercase().contains(&filter.to_lowercase())
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:04X}, 0x{:04X}) {}",
            self.name, self.vendor_id, self.product_id, self.path
        )
    }
}

/// 128-bit backdoor key used to unsecure a device without erasing it
///
/// Parsed from `S:` followed by exactly 16 ASCII characters, or `X:`
/// followed by exactly 32 hex digits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BackdoorKey(pub [u8; 16]);

impl BackdoorKey {
    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for BackdoorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BackdoorKey(..)")
    }
}

impl FromStr for BackdoorKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut key = [0u8; 16];

        if let Some(text) = s.strip_prefix("S:") {
            if text.len() != 16 || !text.is_ascii() {
                return Err(Error::Usage(
                    "backdoor key 'S:' form needs exactly 16 ASCII characters".into(),
                ));
            }
            key.copy_from_slice(text.as_bytes());
        } else if let Some(digits) = s.strip_prefix("X:") {
            if digits.len() != 32 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::Usage(
                    "backdoor key 'X:' form needs exactly 32 hex digits".into(),
                ));
            }
            for (i, byte) in key.iter_mut().enumerate() {
                *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                    .map_err(|e| Error::Usage(format!("invalid backdoor key: {}", e)))?;
            }
        } else {
            return Err(Error::Usage(format!(
                "unsupported backdoor key format '{}' (use S:<16 chars> or X:<32 hex digits>)",
                s
            )));
        }

        Ok(Self(key))
    }
}

/// An open connection to a bootloader target
///
/// Commands the bootloader implements on every part (property queries and
/// the memory primitives) are required. The remaining commands have
/// default implementations that report [`Error::Unsupported`]; backends
/// override the ones they can carry out.
///
/// All addresses are 32-bit. Failures are transport errors: a rejected
/// command carries the bootloader status code (see [`Error::Rejected`]).
pub trait Device {
    /// Query a property; `memory_id` selects an external memory (0 = internal)
    fn get_property(&mut self, tag: PropertyTag, memory_id: u32) -> Result<Vec<u32>>;

    /// Read `length` bytes starting at `address`
    fn read_memory(&mut self, address: u32, length: u32) -> Result<Vec<u8>>;

    /// Write `data` starting at `address`
    ///
    /// Flash targets must have been erased first.
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Erase `[address, address + length)`
    ///
    /// # Errors
    /// * `Rejected` - If the region is not sector-aligned
    fn erase_region(&mut self, address: u32, length: u32) -> Result<()>;

    /// Erase the complete internal flash
    fn erase_all(&mut self) -> Result<()> {
        Err(Error::Unsupported("flash erase all".into()))
    }

    /// Erase the complete internal flash and remove flash security
    fn erase_all_unsecure(&mut self) -> Result<()> {
        Err(Error::Unsupported("flash erase all unsecure".into()))
    }

    /// Fill `length` bytes starting at `address` with a 32-bit pattern
    fn fill_memory(&mut self, _address: u32, _length: u32, _pattern: u32) -> Result<()> {
        Err(Error::Unsupported("fill memory".into()))
    }

    /// Unsecure the device with a backdoor key
    fn security_disable(&mut self, _key: &BackdoorKey) -> Result<()> {
        Err(Error::Unsupported("flash security disable".into()))
    }

    /// Program a one-time-programmable word
    fn program_once(&mut self, _index: u32, _value: u32, _length: u32) -> Result<()> {
        Err(Error::Unsupported("flash program once".into()))
    }

    /// Read a one-time-programmable word
    fn read_once(&mut self, _index: u32, _length: u32) -> Result<u32> {
        Err(Error::Unsupported("flash read once".into()))
    }

    /// Stream a secure binary (SB) file to the bootloader
    fn receive_sb_file(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::Unsupported("receive SB file".into()))
    }

    /// Apply a memory configuration block previously written to `address`
    fn configure_memory(&mut self, _memory_id: u32, _address: u32) -> Result<()> {
        Err(Error::Unsupported("configure memory".into()))
    }

    /// Start a reliable update from the backup image at `address`
    fn reliable_update(&mut self, _address: u32) -> Result<()> {
        Err(Error::Unsupported("reliable update".into()))
    }

    /// Call the function at `address` with `argument`
    fn call(&mut self, _address: u32, _argument: u32) -> Result<()> {
        Err(Error::Unsupported("call".into()))
    }

    /// Jump to `address` with `argument` and a new stack pointer
    fn execute(&mut self, _address: u32, _argument: u32, _stack_pointer: u32) -> Result<()> {
        Err(Error::Unsupported("execute".into()))
    }

    /// Reset the target
    fn reset(&mut self) -> Result<()> {
        Err(Error::Unsupported("reset".into()))
    }

    /// Release the connection
    fn close(&mut self) -> Result<()>;
}

/// Convenience queries built on [`Device::get_property`]
pub trait DeviceExt: Device {
    /// First word of an internal-memory property
    fn property_word(&mut self, tag: PropertyTag) -> Result<u32> {
        self.get_property(tag, 0)?
            .first()
            .copied()
            .ok_or_else(|| Error::Transport(format!("device returned no value for {}", tag)))
    }

    /// Bitmap of implemented commands
    fn available_commands(&mut self) -> Result<u32> {
        self.property_word(PropertyTag::AvailableCommands)
    }

    /// Whether the device reports `tag` as implemented
    fn supports(&mut self, tag: CommandTag) -> Result<bool> {
        Ok(is_command_available(tag, self.available_commands()?))
    }

    /// Internal flash start address
    fn flash_start(&mut self) -> Result<u32> {
        self.property_word(PropertyTag::FlashStartAddress)
    }

    /// Internal flash size in bytes
    fn flash_size(&mut self) -> Result<u32> {
        self.property_word(PropertyTag::FlashSize)
    }

    /// Internal flash sector size in bytes
    fn flash_sector_size(&mut self) -> Result<u32> {
        self.property_word(PropertyTag::FlashSectorSize)
    }

    /// Internal RAM start address
    fn ram_start(&mut self) -> Result<u32> {
        self.property_word(PropertyTag::RamStartAddress)
    }

    /// Internal RAM size in bytes
    fn ram_size(&mut self) -> Result<u32> {
        self.property_word(PropertyTag::RamSize)
    }
}

impl<D: Device + ?Sized> DeviceExt for D {}

/// A backend able to list and open bootloader targets
pub trait DeviceBus {
    /// List attached targets whose name matches `filter`
    ///
    /// Matching is a case-insensitive substring test; `None` lists all.
    fn enumerate(&self, filter: Option<&str>) -> Result<Vec<DeviceDescriptor>>;

    /// Open the target described by `descriptor`
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Device>>;
}

/// Owned open connection that is closed exactly once
///
/// [`DeviceHandle::close`] consumes the handle and reports the close result.
/// A handle dropped without an explicit close is closed on drop and any
/// failure is logged.
pub struct DeviceHandle {
    device: Box<dyn Device>,
    name: String,
    closed: bool,
}

impl DeviceHandle {
    /// Wrap a freshly opened device
    pub fn new(device: Box<dyn Device>, descriptor: &DeviceDescriptor) -> Self {
        Self {
            device,
            name: descriptor.name.clone(),
            closed: false,
        }
    }

    /// Name of the connected target
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the connection
    pub fn close(mut self) -> Result<()> {
        self.close_once()
    }

    fn close_once(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing {}", self.name);
        self.device.close()
    }
}

impl Deref for DeviceHandle {
    type Target = dyn Device;

    fn deref(&self) -> &Self::Target {
        self.device.as_ref()
    }
}

impl DerefMut for DeviceHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device.as_mut()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close_once() {
            warn!("Failed to close {}: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting {
        closes: Rc<Cell<u32>>,
    }

    impl Device for Counting {
        fn get_property(&mut self, tag: PropertyTag, _memory_id: u32) -> Result<Vec<u32>> {
            match tag {
                PropertyTag::AvailableCommands => Ok(vec![CommandTag::FlashEraseAll.mask()]),
                PropertyTag::FlashSectorSize => Ok(vec![0x400]),
                _ => Ok(vec![]),
            }
        }

        fn read_memory(&mut self, _address: u32, length: u32) -> Result<Vec<u8>> {
            Ok(vec![0xFF; length as usize])
        }

        fn write_memory(&mut self, _address: u32, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn erase_region(&mut self, _address: u32, _length: u32) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            name: "KL27Z".into(),
            vendor_id: 0x15A2,
            product_id: 0x0073,
            path: "test:0".into(),
        }
    }

    #[test]
    fn test_handle_closes_once() {
        let closes = Rc::new(Cell::new(0));
        let handle = DeviceHandle::new(
            Box::new(Counting {
                closes: closes.clone(),
            }),
            &descriptor(),
        );
        handle.close().unwrap();
        assert_eq!(closes.get(), 1);

        {
            let _handle = DeviceHandle::new(
                Box::new(Counting {
                    closes: closes.clone(),
                }),
                &descriptor(),
            );
        }
        assert_eq!(closes.get(), 2);
    }

    #[test]
    fn test_default_commands_unsupported() {
        let mut dev = Counting {
            closes: Rc::new(Cell::new(0)),
        };
        assert!(matches!(dev.reset(), Err(Error::Unsupported(_))));
        assert!(matches!(dev.erase_all_unsecure(), Err(Error::Unsupported(_))));
        assert!(dev.supports(CommandTag::FlashEraseAll).unwrap());
        assert!(!dev.supports(CommandTag::FlashEraseAllUnsecure).unwrap());
        assert_eq!(dev.flash_sector_size().unwrap(), 0x400);
        assert!(matches!(dev.flash_size(), Err(Error::Transport(_))));
    }

    #[test]
    fn test_descriptor_match() {
        let d = descriptor();
        assert!(d.matches("kl27"));
        assert!(d.matches("L27Z"));
        assert!(!d.matches("lpc55"));
        assert_eq!(d.to_string(), "KL27Z (0x15A2, 0x0073) test:0");
    }

    #[test]
    fn test_backdoor_key() {
        let key: BackdoorKey = "S:0123456789ABCDEF".parse().unwrap();
        assert_eq!(key.as_bytes(), b"0123456789ABCDEF");

        let key: BackdoorKey = "X:000102030405060708090A0B0C0D0E0F".parse().unwrap();
        assert_eq!(key.as_bytes()[15], 0x0F);
        assert_eq!(key.as_bytes()[10], 0x0A);

        assert!("S:short".parse::<BackdoorKey>().is_err());
        assert!("X:0011".parse::<BackdoorKey>().is_err());
        assert!("X:zz0102030405060708090A0B0C0D0E0F".parse::<BackdoorKey>().is_err());
        assert!("0123456789ABCDEF".parse::<BackdoorKey>().is_err());
    }
}
