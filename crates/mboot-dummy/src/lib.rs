//! mboot-dummy - In-memory bootloader emulator for testing
//!
//! This crate provides emulated bootloader targets that answer the
//! [`Device`] command set from memory. It's useful for testing and
//! development without real hardware.
//!
//! The emulation follows the rules of real parts closely enough to exercise
//! the transfer workflow:
//!
//! - flash programming can only clear bits, so unerased flash must be erased
//!   before writing
//! - region erases must be sector-aligned
//! - a secured target rejects memory access until it is unsecured by a mass
//!   erase or the backdoor key
//! - commands missing from the available-commands bitmap are rejected

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, trace};

use mboot_core::device::{BackdoorKey, Device, DeviceBus, DeviceDescriptor};
use mboot_core::error::{Error, Result};
use mboot_core::tags::{is_command_available, CommandTag, PropertyTag, StatusCode};

/// Value of erased flash
const ERASED: u8 = 0xFF;

/// Configuration of an emulated target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Product name reported by enumeration
    pub name: String,
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Internal flash start address
    pub flash_start: u32,
    /// Internal flash size in bytes
    pub flash_size: u32,
    /// Flash sector size in bytes
    pub sector_size: u32,
    /// Internal RAM start address
    pub ram_start: u32,
    /// Internal RAM size in bytes
    pub ram_size: u32,
    /// Available-commands bitmap
    pub commands: u32,
    /// Packed bootloader version
    pub version: u32,
    /// Start secured
    pub secured: bool,
    /// Backdoor key accepted by `security_disable`
    pub backdoor_key: Option<[u8; 16]>,
    /// External memories answering the attributes query, by memory id
    pub external: Vec<(u32, Vec<u32>)>,
}

fn command_bitmap(tags: &[CommandTag]) -> u32 {
    tags.iter().fold(0, |bitmap, tag| bitmap | tag.mask())
}

impl DummyConfig {
    /// Kinetis KL27-like target with `FlashEraseAllUnsecure`
    pub fn kl27() -> Self {
        Self {
            name: "KL27Z".into(),
            vendor_id: 0x15A2,
            product_id: 0x0073,
            flash_start: 0x0000_0000,
            flash_size: 64 * 1024,
            sector_size: 1024,
            ram_start: 0x1FFF_F000,
            ram_size: 16 * 1024,
            commands: command_bitmap(&[
                CommandTag::FlashEraseAll,
                CommandTag::FlashEraseRegion,
                CommandTag::ReadMemory,
                CommandTag::WriteMemory,
                CommandTag::FillMemory,
                CommandTag::FlashSecurityDisable,
                CommandTag::GetProperty,
                CommandTag::ReceiveSbFile,
                CommandTag::Execute,
                CommandTag::Call,
                CommandTag::Reset,
                CommandTag::SetProperty,
                CommandTag::FlashEraseAllUnsecure,
                CommandTag::FlashProgramOnce,
                CommandTag::FlashReadOnce,
                CommandTag::FlashReadResource,
            ]),
            version: 0x4B02_0100,
            secured: false,
            backdoor_key: Some(*b"0123456789ABCDEF"),
            external: Vec::new(),
        }
    }

    /// LPC55-like target without `FlashEraseAllUnsecure`, with FlexSPI NOR
    pub fn lpc55() -> Self {
        Self {
            name: "LPC55S69".into(),
            vendor_id: 0x1FC9,
            product_id: 0x0021,
            flash_start: 0x0000_0000,
            flash_size: 608 * 1024,
            sector_size: 32 * 1024,
            ram_start: 0x2000_0000,
            ram_size: 256 * 1024,
            commands: command_bitmap(&[
                CommandTag::FlashEraseAll,
                CommandTag::FlashEraseRegion,
                CommandTag::ReadMemory,
                CommandTag::WriteMemory,
                CommandTag::FillMemory,
                CommandTag::GetProperty,
                CommandTag::ReceiveSbFile,
                CommandTag::Execute,
                CommandTag::Call,
                CommandTag::Reset,
                CommandTag::SetProperty,
                CommandTag::ConfigureMemory,
                CommandTag::ReliableUpdate,
            ]),
            version: 0x4B03_0000,
            secured: false,
            backdoor_key: None,
            external: vec![(0x009, vec![0b1011, 0x0800_0000, 8 * 1024, 0, 4096])],
        }
    }

    /// Enumeration record for this target
    pub fn descriptor(&self, index: usize) -> DeviceDescriptor {
        DeviceDescriptor {
            name: self.name.clone(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            path: format!("dummy:{}", index),
        }
    }
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self::kl27()
    }
}

/// Observable state of an emulated target
///
/// Shared between the bus and every connection opened on it, so tests can
/// inspect the effect of a command after the connection is gone.
#[derive(Debug)]
pub struct DummyTarget {
    config: DummyConfig,
    flash: Vec<u8>,
    ram: Vec<u8>,
    secured: bool,
    fuses: BTreeMap<u32, u32>,
    /// SB files received, in order
    pub sb_files: Vec<Vec<u8>>,
    /// Control commands received (`reset`, `call`, ...), in order
    pub events: Vec<String>,
    /// Number of successful opens
    pub opens: u32,
    /// Number of closes
    pub closes: u32,
    /// Fail every command with a transport error
    pub disconnected: bool,
}

/// Shared handle to an emulated target
pub type SharedTarget = Rc<RefCell<DummyTarget>>;

impl DummyTarget {
    /// Create a target with erased flash and zeroed RAM
    pub fn new(config: DummyConfig) -> Self {
        Self {
            flash: vec![ERASED; config.flash_size as usize],
            ram: vec![0; config.ram_size as usize],
            secured: config.secured,
            config,
            fuses: BTreeMap::new(),
            sb_files: Vec::new(),
            events: Vec::new(),
            opens: 0,
            closes: 0,
            disconnected: false,
        }
    }

    /// Configuration of this target
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Flash content
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Mutable flash content, for preloading test data
    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// RAM content
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Whether flash security is active
    pub fn is_secured(&self) -> bool {
        self.secured
    }

    /// Enable or disable flash security
    pub fn set_secured(&mut self, secured: bool) {
        self.secured = secured;
    }

    /// Current value of a program-once word
    pub fn fuse(&self, index: u32) -> Option<u32> {
        self.fuses.get(&index).copied()
    }

    fn property(&self, tag: PropertyTag, memory_id: u32) -> Option<Vec<u32>> {
        let c = &self.config;
        let value = match tag {
            PropertyTag::CurrentVersion => vec![c.version],
            PropertyTag::AvailablePeripherals => vec![1 << 4],
            PropertyTag::FlashStartAddress => vec![c.flash_start],
            PropertyTag::FlashSize => vec![c.flash_size],
            PropertyTag::FlashSectorSize => vec![c.sector_size],
            PropertyTag::FlashBlockCount => vec![1],
            PropertyTag::AvailableCommands => vec![c.commands],
            PropertyTag::CrcCheckStatus => vec![StatusCode::APP_CRC_CHECK_INACTIVE.0],
            PropertyTag::VerifyWrites => vec![1],
            PropertyTag::MaxPacketSize => vec![32],
            PropertyTag::ReservedRegions => {
                vec![0, 0, c.ram_start, c.ram_start + 0x7FF]
            }
            PropertyTag::RamStartAddress => vec![c.ram_start],
            PropertyTag::RamSize => vec![c.ram_size],
            PropertyTag::SystemDeviceId => vec![0x2270_0000 | c.product_id as u32],
            PropertyTag::SecurityState => vec![self.secured as u32],
            PropertyTag::UniqueDeviceId => vec![0x0012_3456, 0x789A_BCDE],
            PropertyTag::ExternalMemoryAttributes => {
                return c
                    .external
                    .iter()
                    .find(|(id, _)| *id == memory_id)
                    .map(|(_, words)| words.clone());
            }
            _ => return None,
        };
        Some(value)
    }
}

/// Which memory an address range falls into
enum Region {
    Flash(usize),
    Ram(usize),
}

fn rejected(command: CommandTag, status: StatusCode) -> Error {
    Error::Rejected { command, status }
}

/// An open connection to a [`DummyTarget`]
pub struct DummyDevice {
    target: SharedTarget,
}

impl DummyDevice {
    /// Common checks before any command: link up, command implemented
    fn begin(&self, command: CommandTag) -> Result<std::cell::RefMut<'_, DummyTarget>> {
        let target = self.target.borrow_mut();
        if target.disconnected {
            return Err(Error::Transport("device disconnected".into()));
        }
        if !is_command_available(command, target.config.commands) {
            return Err(rejected(command, StatusCode::UNKNOWN_COMMAND));
        }
        trace!("dummy: {}", command);
        Ok(target)
    }

    /// Like `begin`, and the target must not be secured
    fn begin_unsecured(&self, command: CommandTag) -> Result<std::cell::RefMut<'_, DummyTarget>> {
        let target = self.begin(command)?;
        if target.secured {
            return Err(rejected(command, StatusCode::SECURITY_VIOLATION));
        }
        Ok(target)
    }

    fn locate(
        target: &DummyTarget,
        command: CommandTag,
        address: u32,
        length: u32,
    ) -> Result<Region> {
        let c = &target.config;
        let end = address as u64 + length as u64;
        let within = |start: u32, size: u32| {
            address >= start && end <= start as u64 + size as u64
        };

        if within(c.flash_start, c.flash_size) {
            Ok(Region::Flash((address - c.flash_start) as usize))
        } else if within(c.ram_start, c.ram_size) {
            Ok(Region::Ram((address - c.ram_start) as usize))
        } else {
            let status = match command {
                CommandTag::ReadMemory => StatusCode::MEMORY_RANGE_INVALID,
                _ => StatusCode::FLASH_ADDRESS_ERROR,
            };
            Err(rejected(command, status))
        }
    }

    fn store(target: &mut DummyTarget, command: CommandTag, address: u32, data: &[u8]) -> Result<()> {
        match Self::locate(target, command, address, data.len() as u32)? {
            Region::Flash(offset) => {
                // Programming can only clear bits
                for (cell, &byte) in target.flash[offset..offset + data.len()]
                    .iter_mut()
                    .zip(data)
                {
                    *cell &= byte;
                }
            }
            Region::Ram(offset) => {
                target.ram[offset..offset + data.len()].copy_from_slice(data);
            }
        }
        Ok(())
    }
}

impl Device for DummyDevice {
    fn get_property(&mut self, tag: PropertyTag, memory_id: u32) -> Result<Vec<u32>> {
        let target = self.begin(CommandTag::GetProperty)?;
        target.property(tag, memory_id).ok_or(rejected(
            CommandTag::GetProperty,
            StatusCode::UNKNOWN_PROPERTY,
        ))
    }

    fn read_memory(&mut self, address: u32, length: u32) -> Result<Vec<u8>> {
        let target = self.begin_unsecured(CommandTag::ReadMemory)?;
        let len = length as usize;
        let data = match Self::locate(&target, CommandTag::ReadMemory, address, length)? {
            Region::Flash(offset) => target.flash[offset..offset + len].to_vec(),
            Region::Ram(offset) => target.ram[offset..offset + len].to_vec(),
        };
        Ok(data)
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let mut target = self.begin_unsecured(CommandTag::WriteMemory)?;
        Self::store(&mut target, CommandTag::WriteMemory, address, data)
    }

    fn erase_region(&mut self, address: u32, length: u32) -> Result<()> {
        let mut target = self.begin_unsecured(CommandTag::FlashEraseRegion)?;
        let sector = target.config.sector_size;
        if address % sector != 0 || length % sector != 0 {
            return Err(rejected(
                CommandTag::FlashEraseRegion,
                StatusCode::FLASH_ALIGNMENT_ERROR,
            ));
        }
        match Self::locate(&target, CommandTag::FlashEraseRegion, address, length)? {
            Region::Flash(offset) => {
                target.flash[offset..offset + length as usize].fill(ERASED);
                debug!("dummy: erased 0x{:X} bytes at 0x{:08X}", length, address);
                Ok(())
            }
            Region::Ram(_) => Err(rejected(
                CommandTag::FlashEraseRegion,
                StatusCode::FLASH_ADDRESS_ERROR,
            )),
        }
    }

    fn erase_all(&mut self) -> Result<()> {
        let mut target = self.begin(CommandTag::FlashEraseAll)?;
        target.flash.fill(ERASED);
        Ok(())
    }

    fn erase_all_unsecure(&mut self) -> Result<()> {
        let mut target = self.begin(CommandTag::FlashEraseAllUnsecure)?;
        target.flash.fill(ERASED);
        target.secured = false;
        Ok(())
    }

    fn fill_memory(&mut self, address: u32, length: u32, pattern: u32) -> Result<()> {
        let mut target = self.begin_unsecured(CommandTag::FillMemory)?;
        let data: Vec<u8> = pattern
            .to_le_bytes()
            .iter()
            .copied()
            .cycle()
            .take(length as usize)
            .collect();
        Self::store(&mut target, CommandTag::FillMemory, address, &data)
    }

    fn security_disable(&mut self, key: &BackdoorKey) -> Result<()> {
        let mut target = self.begin(CommandTag::FlashSecurityDisable)?;
        match target.config.backdoor_key {
            Some(expected) if &expected == key.as_bytes() => {
                target.secured = false;
                Ok(())
            }
            _ => Err(rejected(
                CommandTag::FlashSecurityDisable,
                StatusCode::FLASH_ACCESS_ERROR,
            )),
        }
    }

    fn program_once(&mut self, index: u32, value: u32, length: u32) -> Result<()> {
        let mut target = self.begin_unsecured(CommandTag::FlashProgramOnce)?;
        if length != 4 && length != 8 {
            return Err(rejected(
                CommandTag::FlashProgramOnce,
                StatusCode::INVALID_ARGUMENT,
            ));
        }
        // One-time programmable: bits can only be set once, never cleared
        let current = target.fuses.get(&index).copied().unwrap_or(0);
        if current & !value != 0 {
            return Err(rejected(
                CommandTag::FlashProgramOnce,
                StatusCode::FLASH_ACCESS_ERROR,
            ));
        }
        target.fuses.insert(index, current | value);
        Ok(())
    }

    fn read_once(&mut self, index: u32, length: u32) -> Result<u32> {
        let target = self.begin_unsecured(CommandTag::FlashReadOnce)?;
        if length != 4 && length != 8 {
            return Err(rejected(CommandTag::FlashReadOnce, StatusCode::INVALID_ARGUMENT));
        }
        Ok(target.fuses.get(&index).copied().unwrap_or(0))
    }

    fn receive_sb_file(&mut self, data: &[u8]) -> Result<()> {
        let mut target = self.begin(CommandTag::ReceiveSbFile)?;
        target.sb_files.push(data.to_vec());
        Ok(())
    }

    fn configure_memory(&mut self, memory_id: u32, address: u32) -> Result<()> {
        let mut target = self.begin(CommandTag::ConfigureMemory)?;
        Self::locate(&target, CommandTag::ConfigureMemory, address, 4)?;
        target
            .events
            .push(format!("configure_memory 0x{:X} 0x{:08X}", memory_id, address));
        Ok(())
    }

    fn reliable_update(&mut self, address: u32) -> Result<()> {
        let mut target = self.begin(CommandTag::ReliableUpdate)?;
        target.events.push(format!("reliable_update 0x{:08X}", address));
        Ok(())
    }

    fn call(&mut self, address: u32, argument: u32) -> Result<()> {
        let mut target = self.begin_unsecured(CommandTag::Call)?;
        target
            .events
            .push(format!("call 0x{:08X} 0x{:X}", address, argument));
        Ok(())
    }

    fn execute(&mut self, address: u32, argument: u32, stack_pointer: u32) -> Result<()> {
        let mut target = self.begin_unsecured(CommandTag::Execute)?;
        target.events.push(format!(
            "execute 0x{:08X} 0x{:X} 0x{:08X}",
            address, argument, stack_pointer
        ));
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut target = self.begin(CommandTag::Reset)?;
        target.events.push("reset".into());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.target.borrow_mut().closes += 1;
        Ok(())
    }
}

/// Bus of emulated targets
#[derive(Default)]
pub struct DummyBus {
    targets: Vec<(DeviceDescriptor, SharedTarget)>,
}

impl DummyBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a target and return its shared state
    pub fn attach(&mut self, config: DummyConfig) -> SharedTarget {
        let descriptor = config.descriptor(self.targets.len());
        let target = Rc::new(RefCell::new(DummyTarget::new(config)));
        self.targets.push((descriptor, target.clone()));
        target
    }

    /// Builder form of [`DummyBus::attach`]
    pub fn with(mut self, config: DummyConfig) -> Self {
        self.attach(config);
        self
    }

    /// Shared state of the target at `index`
    pub fn target(&self, index: usize) -> Option<SharedTarget> {
        self.targets.get(index).map(|(_, target)| target.clone())
    }
}

impl DeviceBus for DummyBus {
    fn enumerate(&self, filter: Option<&str>) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .targets
            .iter()
            .map(|(descriptor, _)| descriptor)
            .filter(|d| filter.map_or(true, |f| d.matches(f)))
            .cloned()
            .collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Device>> {
        let (_, target) = self
            .targets
            .iter()
            .find(|(d, _)| d.path == descriptor.path)
            .ok_or_else(|| Error::Transport(format!("{} is gone", descriptor)))?;

        {
            let mut state = target.borrow_mut();
            if state.disconnected {
                return Err(Error::Transport(format!("cannot open {}", descriptor)));
            }
            state.opens += 1;
        }
        debug!("dummy: opened {}", descriptor);

        Ok(Box::new(DummyDevice {
            target: target.clone(),
        }))
    }
}
