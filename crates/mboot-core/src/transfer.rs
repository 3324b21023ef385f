//! Memory transfer workflow
//!
//! A [`Transfer`] carries out one operator command against one target:
//! select a device, open it, run the operation, close it. The device is
//! closed exactly once on every path and before any error is handed back.
//!
//! Every command moves through the same states:
//!
//! ```text
//! Idle -> Connected -> Reading | Writing | Erasing | Configuring
//!      -> Disconnected -> Success | Failed
//! ```
//!
//! Selection or open failures go straight from `Idle` to `Failed`.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::align::{compute_erase_window, EraseWindow};
use crate::config::Config;
use crate::device::{BackdoorKey, DeviceBus, DeviceExt, DeviceHandle};
use crate::error::{Error, Result};
use crate::hexdump::HexDump;
use crate::image::{self, ImageFormat, MemoryImage};
use crate::select::{select_device, SelectionStrategy};
use crate::tags::{
    decode_property, is_command_available, CommandTag, ExternalMemoryAttributes, PropertyTag,
    PropertyValue, EXTERNAL_MEMORIES,
};

/// Largest block moved by a single read or write command
pub const CHUNK_SIZE: usize = 4096;

/// Gap left above a memory configuration block placed at the top of RAM
pub const CONFIG_BLOCK_RESERVE: u64 = 1024;

/// Progress callbacks for long running transfers
///
/// All methods default to doing nothing.
pub trait TransferProgress {
    /// A read of `total` bytes starts
    fn reading(&mut self, _total: usize) {}
    /// `done` bytes have been read so far
    fn read_progress(&mut self, _done: usize) {}
    /// An erase of `bytes` bytes starts
    fn erasing(&mut self, _bytes: usize) {}
    /// A write of `total` bytes starts
    fn writing(&mut self, _total: usize) {}
    /// `done` bytes have been written so far
    fn write_progress(&mut self, _done: usize) {}
    /// The current operation ended (successfully or not)
    fn finished(&mut self) {}
}

/// A no-op progress reporter
pub struct NoProgress;

impl TransferProgress for NoProgress {}

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing opened yet
    Idle,
    /// Device open, no operation started
    Connected,
    /// Reading memory or properties
    Reading,
    /// Writing memory
    Writing,
    /// Erasing flash
    Erasing,
    /// Configuration and control commands
    Configuring,
    /// Device closed
    Disconnected,
    /// Command completed
    Success,
    /// Command failed
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where `read` puts the data it retrieved
#[derive(Debug, Clone)]
pub enum ReadTarget {
    /// Render a hex dump
    Dump {
        /// Collapse repeated rows
        compress: bool,
    },
    /// Save to a file
    File {
        /// Output path
        path: PathBuf,
        /// Output format, usually resolved from the path extension
        format: ImageFormat,
    },
}

impl ReadTarget {
    /// Hex dump target
    pub fn dump(compress: bool) -> Self {
        Self::Dump { compress }
    }

    /// File target with the format taken from the extension of `path`
    pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ImageFormat::from_path(&path)?;
        Ok(Self::File { path, format })
    }
}

/// Result of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Rendered hex dump
    Dump(String),
    /// Data saved to a file
    Saved {
        /// Output path
        path: PathBuf,
        /// Number of bytes saved
        length: usize,
    },
}

/// What `erase` should erase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseRequest {
    /// The complete internal flash
    Mass,
    /// A region, widened to whole sectors; both fields are required
    Region {
        /// Start address
        address: Option<u32>,
        /// Length in bytes
        length: Option<u32>,
    },
}

/// Which mass erase command was used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MassErase {
    /// Erase all and remove flash security
    Unsecure,
    /// Plain erase all
    Plain,
}

/// Result of an erase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    /// Mass erase
    Mass(MassErase),
    /// Region erase over the given window
    Region(EraseWindow),
}

/// Result of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Address the data was written to
    pub address: u32,
    /// Number of bytes written
    pub length: usize,
    /// Flash window erased before writing
    pub erased: EraseWindow,
}

/// An internal memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalMemory {
    /// Start address
    pub address: u32,
    /// Size in bytes
    pub size: u32,
    /// Sector size (flash only)
    pub sector_size: Option<u32>,
}

/// Memories known to the bootloader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryList {
    /// Internal flash regions
    pub internal_flash: Vec<InternalMemory>,
    /// Internal RAM regions
    pub internal_ram: Vec<InternalMemory>,
    /// External memories that answered the attributes query
    pub external: Vec<(&'static str, ExternalMemoryAttributes)>,
}

/// One operator command against one device
pub struct Transfer<'a> {
    bus: &'a dyn DeviceBus,
    selector: Box<dyn SelectionStrategy + 'a>,
    progress: Box<dyn TransferProgress + 'a>,
    config: Config,
    state: TransferState,
}

impl<'a> Transfer<'a> {
    /// Create a transfer using `bus` for enumeration and `selector` when
    /// several targets match
    pub fn new(
        bus: &'a dyn DeviceBus,
        selector: Box<dyn SelectionStrategy + 'a>,
        config: Config,
    ) -> Self {
        Self {
            bus,
            selector,
            progress: Box::new(NoProgress),
            config,
            state: TransferState::Idle,
        }
    }

    /// Report progress of reads and writes to `progress`
    pub fn with_progress(mut self, progress: Box<dyn TransferProgress + 'a>) -> Self {
        self.progress = progress;
        self
    }

    /// Operator-facing report of an error returned by this transfer
    ///
    /// The debug level of the configuration decides between the one-line
    /// form and the full diagnostic form.
    pub fn report(&self, error: &Error) -> String {
        error.report(self.config.debug.is_verbose())
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransferState {
        self.state
    }

    fn set_state(&mut self, state: TransferState) {
        debug!("Transfer state: {} -> {}", self.state, state);
        self.state = state;
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.set_state(if result.is_ok() {
            TransferState::Success
        } else {
            TransferState::Failed
        });
        result
    }

    /// Select and open a device, run `op`, close the device
    ///
    /// The device is closed before returning on every path. An error from
    /// `op` takes precedence over an error from closing.
    fn run<T>(
        &mut self,
        busy: TransferState,
        op: impl FnOnce(&mut DeviceHandle, &mut dyn TransferProgress) -> Result<T>,
    ) -> Result<T> {
        self.set_state(TransferState::Idle);

        let opened = select_device(
            self.bus,
            self.config.target.as_deref(),
            self.selector.as_mut(),
        )
        .and_then(|descriptor| {
            let device = self.bus.open(&descriptor)?;
            Ok(DeviceHandle::new(device, &descriptor))
        });
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => return self.finish(Err(e)),
        };

        self.set_state(TransferState::Connected);
        debug!("Connected to {}", handle.name());
        self.set_state(busy);

        let result = op(&mut handle, self.progress.as_mut());
        self.progress.finished();
        let closed = handle.close();
        self.set_state(TransferState::Disconnected);

        let result = match (result, closed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        };
        self.finish(result)
    }

    /// Program an image file
    ///
    /// The image is loaded before any device is touched. `offset` leading
    /// bytes are dropped (ignored when not smaller than the image). The data
    /// goes to `address`, or to the image base when `None` (0 for binary
    /// files). The sector-aligned window around the target range is erased
    /// first.
    pub fn write(
        &mut self,
        path: &Path,
        format: ImageFormat,
        address: Option<u32>,
        offset: usize,
    ) -> Result<WriteSummary> {
        let mut image = image::load(path, format, None)?;
        let address = address.unwrap_or(image.base_address);
        image.skip_leading(offset);

        let length = u32::try_from(image.len())
            .ok()
            .filter(|len| address as u64 + *len as u64 <= u32::MAX as u64 + 1)
            .ok_or_else(|| {
                Error::Range(format!(
                    "0x{:X} bytes at 0x{:08X} exceed the 32-bit address space",
                    image.len(),
                    address
                ))
            })?;

        self.run(TransferState::Writing, |dev, progress| {
            let sector = dev.flash_sector_size()?;
            let window = compute_erase_window(address, length, sector)?;
            if !window.is_empty() {
                info!(
                    "Erasing 0x{:X} bytes at 0x{:08X} (sector size 0x{:X})",
                    window.length, window.start_address, sector
                );
                progress.erasing(window.length as usize);
                dev.erase_region(window.start_address, window.length)?;
            }

            write_chunked(dev, progress, address, &image.data)?;
            Ok(WriteSummary {
                address,
                length: image.len(),
                erased: window,
            })
        })
    }

    /// Read memory
    ///
    /// Without `length` the read runs from `address` to the end of the
    /// reported flash size.
    ///
    /// # Errors
    /// * `Range` - If `length` is omitted and `address` is at or past the
    ///   flash size, or if the range exceeds the 32-bit address space
    pub fn read(
        &mut self,
        address: u32,
        length: Option<u32>,
        target: &ReadTarget,
    ) -> Result<ReadOutcome> {
        let data = self.run(TransferState::Reading, |dev, progress| {
            let length = match length {
                Some(length) => length,
                None => {
                    let size = dev.flash_size()?;
                    if address >= size {
                        return Err(Error::Range(format!(
                            "address 0x{:08X} is outside the 0x{:X} byte flash, a length is required",
                            address, size
                        )));
                    }
                    size - address
                }
            };
            if address as u64 + length as u64 > u32::MAX as u64 + 1 {
                return Err(Error::Range(format!(
                    "0x{:X} bytes at 0x{:08X} exceed the 32-bit address space",
                    length, address
                )));
            }
            read_chunked(dev, progress, address, length)
        })?;

        let outcome = match target {
            ReadTarget::Dump { compress } => Ok(ReadOutcome::Dump(
                HexDump::new().compress(*compress).render(&data, address),
            )),
            ReadTarget::File { path, format } => {
                let length = data.len();
                image::save(path, &MemoryImage::new(address, data), *format).map(|()| {
                    ReadOutcome::Saved {
                        path: path.clone(),
                        length,
                    }
                })
            }
        };
        if outcome.is_err() {
            self.set_state(TransferState::Failed);
        }
        outcome
    }

    /// Erase flash
    ///
    /// Mass erase prefers the unsecuring variant when the device offers it.
    /// A region erase is widened to whole sectors.
    ///
    /// # Errors
    /// * `Usage` - If a region erase lacks an address or length; raised
    ///   before any device interaction
    /// * `Unsupported` - If a mass erase is requested and the device offers
    ///   neither erase-all command
    pub fn erase(&mut self, request: EraseRequest) -> Result<EraseOutcome> {
        match request {
            EraseRequest::Mass => self.run(TransferState::Erasing, |dev, _| {
                let commands = dev.available_commands()?;
                if is_command_available(CommandTag::FlashEraseAllUnsecure, commands) {
                    dev.erase_all_unsecure()?;
                    Ok(EraseOutcome::Mass(MassErase::Unsecure))
                } else if is_command_available(CommandTag::FlashEraseAll, commands) {
                    dev.erase_all()?;
                    Ok(EraseOutcome::Mass(MassErase::Plain))
                } else {
                    Err(Error::Unsupported(
                        "device offers no flash erase all command".into(),
                    ))
                }
            }),
            EraseRequest::Region {
                address: Some(address),
                length: Some(length),
            } => self.run(TransferState::Erasing, |dev, progress| {
                let sector = dev.flash_sector_size()?;
                let window = compute_erase_window(address, length, sector)?;
                if window.start_address != address || window.length != length {
                    info!(
                        "Erase region 0x{:08X}+0x{:X} widened to 0x{:08X}+0x{:X}",
                        address, length, window.start_address, window.length
                    );
                }
                if !window.is_empty() {
                    progress.erasing(window.length as usize);
                    dev.erase_region(window.start_address, window.length)?;
                }
                Ok(EraseOutcome::Region(window))
            }),
            EraseRequest::Region { .. } => Err(Error::Usage(
                "region erase needs both --address and --length (or use --mass)".into(),
            )),
        }
    }

    /// Query every bootloader property
    ///
    /// Properties the device rejects are skipped.
    pub fn mcu_info(&mut self) -> Result<Vec<(PropertyTag, PropertyValue)>> {
        self.run(TransferState::Reading, |dev, _| {
            let mut info = Vec::new();
            for tag in PropertyTag::ALL {
                match dev.get_property(tag, 0) {
                    Ok(values) if values.is_empty() => debug!("{} returned no value", tag),
                    Ok(values) => info.push((tag, decode_property(tag, &values))),
                    Err(e @ (Error::Rejected { .. } | Error::Unsupported(_))) => {
                        debug!("Skipping {}: {}", tag, e)
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(info)
        })
    }

    /// List internal memories and probe external ones
    pub fn memory_list(&mut self) -> Result<MemoryList> {
        self.run(TransferState::Reading, |dev, _| {
            let mut list = MemoryList::default();

            let flash_size = dev.flash_size()?;
            if flash_size > 0 {
                list.internal_flash.push(InternalMemory {
                    address: dev.flash_start()?,
                    size: flash_size,
                    sector_size: Some(dev.flash_sector_size()?),
                });
            }
            let ram_size = dev.ram_size()?;
            if ram_size > 0 {
                list.internal_ram.push(InternalMemory {
                    address: dev.ram_start()?,
                    size: ram_size,
                    sector_size: None,
                });
            }

            for (id, name) in EXTERNAL_MEMORIES {
                match dev.get_property(PropertyTag::ExternalMemoryAttributes, id) {
                    Ok(words) if !words.is_empty() => list
                        .external
                        .push((name, ExternalMemoryAttributes::from_words(&words))),
                    Ok(_) => (),
                    Err(e @ (Error::Rejected { .. } | Error::Unsupported(_))) => {
                        debug!("{} not available: {}", name, e)
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(list)
        })
    }

    /// Write a memory configuration block to RAM and apply it
    ///
    /// The file content is used as is. Without `address` the block is placed
    /// 1 KiB below the top of RAM.
    pub fn configure_memory(
        &mut self,
        path: &Path,
        address: Option<u32>,
        memory_id: u32,
    ) -> Result<u32> {
        let block = read_file(path)?;

        self.run(TransferState::Configuring, |dev, progress| {
            let address = match address {
                Some(address) => address,
                None => {
                    let top = dev.ram_start()? as u64 + dev.ram_size()? as u64;
                    top.checked_sub(block.len() as u64 + CONFIG_BLOCK_RESERVE)
                        .and_then(|a| u32::try_from(a).ok())
                        .ok_or_else(|| {
                            Error::Range("memory configuration does not fit into RAM".into())
                        })?
                }
            };
            write_chunked(dev, progress, address, &block)?;
            dev.configure_memory(memory_id, address)?;
            Ok(address)
        })
    }

    /// Send a secure binary file to the bootloader
    pub fn receive_sb_file(&mut self, path: &Path) -> Result<usize> {
        let data = read_file(path)?;
        self.run(TransferState::Writing, |dev, _| {
            dev.receive_sb_file(&data)?;
            Ok(data.len())
        })
    }

    /// Optionally program a one-time-programmable word, then read it back
    pub fn fuse(&mut self, index: u32, value: Option<u32>, length: u32) -> Result<u32> {
        self.run(TransferState::Configuring, |dev, _| {
            if let Some(value) = value {
                dev.program_once(index, value, length)?;
            }
            dev.read_once(index, length)
        })
    }

    /// Remove flash security
    ///
    /// Without a key the flash is mass erased to unsecure it.
    pub fn unlock(&mut self, key: Option<BackdoorKey>) -> Result<()> {
        self.run(TransferState::Configuring, |dev, _| match key {
            Some(key) => dev.security_disable(&key),
            None => dev.erase_all_unsecure(),
        })
    }

    /// Fill memory with a 32-bit pattern
    pub fn fill(&mut self, address: u32, length: u32, pattern: u32) -> Result<()> {
        self.run(TransferState::Writing, |dev, _| {
            dev.fill_memory(address, length, pattern)
        })
    }

    /// Copy a backup application to the main application region
    pub fn update(&mut self, address: u32) -> Result<()> {
        self.run(TransferState::Configuring, |dev, _| {
            dev.reliable_update(address)
        })
    }

    /// Call code at `address`
    pub fn call(&mut self, address: u32, argument: u32) -> Result<()> {
        self.run(TransferState::Configuring, |dev, _| {
            dev.call(address, argument)
        })
    }

    /// Jump to code at `address` with a new stack pointer
    pub fn execute(&mut self, address: u32, argument: u32, stack_pointer: u32) -> Result<()> {
        self.run(TransferState::Configuring, |dev, _| {
            dev.execute(address, argument, stack_pointer)
        })
    }

    /// Reset the target
    pub fn reset(&mut self) -> Result<()> {
        self.run(TransferState::Configuring, |dev, _| dev.reset())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::File {
        path: path.to_path_buf(),
        source,
    })
}

fn read_chunked(
    dev: &mut DeviceHandle,
    progress: &mut dyn TransferProgress,
    address: u32,
    length: u32,
) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(length as usize);
    progress.reading(length as usize);

    while data.len() < length as usize {
        let chunk = (length as usize - data.len()).min(CHUNK_SIZE);
        let block = dev.read_memory(address + data.len() as u32, chunk as u32)?;
        if block.len() != chunk {
            return Err(Error::Transport(format!(
                "short read: expected {} bytes, got {}",
                chunk,
                block.len()
            )));
        }
        data.extend_from_slice(&block);
        progress.read_progress(data.len());
    }

    Ok(data)
}

fn write_chunked(
    dev: &mut DeviceHandle,
    progress: &mut dyn TransferProgress,
    address: u32,
    data: &[u8],
) -> Result<()> {
    progress.writing(data.len());

    let mut done = 0;
    for chunk in data.chunks(CHUNK_SIZE) {
        dev.write_memory(address + done as u32, chunk)?;
        done += chunk.len();
        progress.write_progress(done);
    }

    Ok(())
}
