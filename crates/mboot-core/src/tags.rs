//! Bootloader property, command and status tables
//!
//! The numeric values follow the MCU bootloader reference manual. Only the
//! orchestration layer interprets them; the transport passes them through.

use core::fmt;

// ===========================================================================
// Commands
// ===========================================================================

/// Bootloader command tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandTag {
    /// Erase the complete internal flash
    FlashEraseAll = 0x01,
    /// Erase a sector-aligned flash region
    FlashEraseRegion = 0x02,
    /// Read memory
    ReadMemory = 0x03,
    /// Write memory
    WriteMemory = 0x04,
    /// Fill memory with a 32-bit pattern
    FillMemory = 0x05,
    /// Unsecure the device with a backdoor key
    FlashSecurityDisable = 0x06,
    /// Query a property
    GetProperty = 0x07,
    /// Receive a secure binary (SB) image
    ReceiveSbFile = 0x08,
    /// Jump to code with argument and stack pointer
    Execute = 0x09,
    /// Call code with argument and return to the bootloader
    Call = 0x0A,
    /// Reset the MCU
    Reset = 0x0B,
    /// Change a writable property
    SetProperty = 0x0C,
    /// Erase the complete flash and clear the security flag
    FlashEraseAllUnsecure = 0x0D,
    /// Program a one-time-programmable field
    FlashProgramOnce = 0x0E,
    /// Read a one-time-programmable field
    FlashReadOnce = 0x0F,
    /// Read a flash resource (IFR, version info)
    FlashReadResource = 0x10,
    /// Configure an external memory from a RAM parameter block
    ConfigureMemory = 0x11,
    /// Swap a backup application into the main region
    ReliableUpdate = 0x12,
    /// Generate a key blob
    GenerateKeyBlob = 0x13,
    /// Key provisioning
    KeyProvisioning = 0x15,
}

impl CommandTag {
    /// All known command tags in ascending order
    pub const ALL: [CommandTag; 20] = [
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
        CommandTag::ConfigureMemory,
        CommandTag::ReliableUpdate,
        CommandTag::GenerateKeyBlob,
        CommandTag::KeyProvisioning,
    ];

    /// Human-readable command name
    pub fn name(self) -> &'static str {
        match self {
            Self::FlashEraseAll => "FlashEraseAll",
            Self::FlashEraseRegion => "FlashEraseRegion",
            Self::ReadMemory => "ReadMemory",
            Self::WriteMemory => "WriteMemory",
            Self::FillMemory => "FillMemory",
            Self::FlashSecurityDisable => "FlashSecurityDisable",
            Self::GetProperty => "GetProperty",
            Self::ReceiveSbFile => "ReceiveSBFile",
            Self::Execute => "Execute",
            Self::Call => "Call",
            Self::Reset => "Reset",
            Self::SetProperty => "SetProperty",
            Self::FlashEraseAllUnsecure => "FlashEraseAllUnsecure",
            Self::FlashProgramOnce => "FlashProgramOnce",
            Self::FlashReadOnce => "FlashReadOnce",
            Self::FlashReadResource => "FlashReadResource",
            Self::ConfigureMemory => "ConfigureMemory",
            Self::ReliableUpdate => "ReliableUpdate",
            Self::GenerateKeyBlob => "GenerateKeyBlob",
            Self::KeyProvisioning => "KeyProvisioning",
        }
    }

    /// Bit of this command in the available-commands bitmap
    pub fn mask(self) -> u32 {
        1 << (self as u32 - 1)
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check whether `tag` is set in an available-commands bitmap
///
/// The bitmap is the first value of [`PropertyTag::AvailableCommands`]; bit
/// `n - 1` is set when the command with tag `n` is supported.
pub fn is_command_available(tag: CommandTag, bitmap: u32) -> bool {
    bitmap & tag.mask() != 0
}

// ===========================================================================
// Properties
// ===========================================================================

/// Bootloader property tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyTag {
    /// Bootloader version
    CurrentVersion = 0x01,
    /// Bitmap of peripherals the bootloader listens on
    AvailablePeripherals = 0x02,
    /// Start address of internal flash
    FlashStartAddress = 0x03,
    /// Size of internal flash
    FlashSize = 0x04,
    /// Smallest erasable flash unit
    FlashSectorSize = 0x05,
    /// Number of flash blocks
    FlashBlockCount = 0x06,
    /// Bitmap of supported commands
    AvailableCommands = 0x07,
    /// Status of the application CRC check
    CrcCheckStatus = 0x08,
    /// Whether writes are verified
    VerifyWrites = 0x0A,
    /// Maximum packet payload size
    MaxPacketSize = 0x0B,
    /// Memory regions reserved by the bootloader
    ReservedRegions = 0x0C,
    /// Whether address ranges are validated
    ValidateRegions = 0x0D,
    /// Start address of internal RAM
    RamStartAddress = 0x0E,
    /// Size of internal RAM
    RamSize = 0x0F,
    /// System device identification register
    SystemDeviceId = 0x10,
    /// Flash security state
    SecurityState = 0x11,
    /// Unique device identification
    UniqueDeviceId = 0x12,
    /// Flash access control support
    FlashFacSupport = 0x13,
    /// Flash access segment size
    FlashAccessSegmentSize = 0x14,
    /// Flash access segment count
    FlashAccessSegmentCount = 0x15,
    /// Flash read margin level
    FlashReadMargin = 0x16,
    /// QuadSPI initialization status
    QspiInitStatus = 0x17,
    /// Target build version
    TargetVersion = 0x18,
    /// Attributes of an external memory (selected by memory id)
    ExternalMemoryAttributes = 0x19,
    /// Reliable update status
    ReliableUpdateStatus = 0x1A,
    /// Flash page size
    FlashPageSize = 0x1B,
    /// IRQ notifier pin configuration
    IrqNotifierPin = 0x1C,
}

impl PropertyTag {
    /// Every property reported by the `info` command, in query order
    pub const ALL: [PropertyTag; 27] = [
        PropertyTag::CurrentVersion,
        PropertyTag::AvailablePeripherals,
        PropertyTag::FlashStartAddress,
        PropertyTag::FlashSize,
        PropertyTag::FlashSectorSize,
        PropertyTag::FlashBlockCount,
        PropertyTag::AvailableCommands,
        PropertyTag::CrcCheckStatus,
        PropertyTag::VerifyWrites,
        PropertyTag::MaxPacketSize,
        PropertyTag::ReservedRegions,
        PropertyTag::ValidateRegions,
        PropertyTag::RamStartAddress,
        PropertyTag::RamSize,
        PropertyTag::SystemDeviceId,
        PropertyTag::SecurityState,
        PropertyTag::UniqueDeviceId,
        PropertyTag::FlashFacSupport,
        PropertyTag::FlashAccessSegmentSize,
        PropertyTag::FlashAccessSegmentCount,
        PropertyTag::FlashReadMargin,
        PropertyTag::QspiInitStatus,
        PropertyTag::TargetVersion,
        PropertyTag::ExternalMemoryAttributes,
        PropertyTag::ReliableUpdateStatus,
        PropertyTag::FlashPageSize,
        PropertyTag::IrqNotifierPin,
    ];

    /// Human-readable property name
    pub fn name(self) -> &'static str {
        match self {
            Self::CurrentVersion => "CurrentVersion",
            Self::AvailablePeripherals => "AvailablePeripherals",
            Self::FlashStartAddress => "FlashStartAddress",
            Self::FlashSize => "FlashSize",
            Self::FlashSectorSize => "FlashSectorSize",
            Self::FlashBlockCount => "FlashBlockCount",
            Self::AvailableCommands => "AvailableCommands",
            Self::CrcCheckStatus => "CrcCheckStatus",
            Self::VerifyWrites => "VerifyWrites",
            Self::MaxPacketSize => "MaxPacketSize",
            Self::ReservedRegions => "ReservedRegions",
            Self::ValidateRegions => "ValidateRegions",
            Self::RamStartAddress => "RamStartAddress",
            Self::RamSize => "RamSize",
            Self::SystemDeviceId => "SystemDeviceIdent",
            Self::SecurityState => "FlashSecurityState",
            Self::UniqueDeviceId => "UniqueDeviceIdent",
            Self::FlashFacSupport => "FlashFacSupport",
            Self::FlashAccessSegmentSize => "FlashAccessSegmentSize",
            Self::FlashAccessSegmentCount => "FlashAccessSegmentCount",
            Self::FlashReadMargin => "FlashReadMargin",
            Self::QspiInitStatus => "QspiInitStatus",
            Self::TargetVersion => "TargetVersion",
            Self::ExternalMemoryAttributes => "ExternalMemoryAttributes",
            Self::ReliableUpdateStatus => "ReliableUpdateStatus",
            Self::FlashPageSize => "FlashPageSize",
            Self::IrqNotifierPin => "IrqNotifierPin",
        }
    }
}

impl fmt::Display for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded property value, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// A single value
    Scalar(String),
    /// A list of values (command names, reserved regions, ...)
    List(Vec<String>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Peripheral names indexed by bit position in `AvailablePeripherals`
const PERIPHERALS: [&str; 7] = [
    "UART", "I2C-Slave", "SPI-Slave", "CAN", "USB-HID", "USB-CDC", "USB-DFU",
];

/// Security state value reported by parts that use a magic "unsecure" word
const SECURITY_UNSECURE_MAGIC: u32 = 0x5AA5_5AA5;

/// Decode raw property words into a display value
///
/// `values` is the word list returned by the device; an empty list decodes
/// to an empty scalar.
pub fn decode_property(tag: PropertyTag, values: &[u32]) -> PropertyValue {
    let Some(&first) = values.first() else {
        return PropertyValue::Scalar(String::new());
    };

    match tag {
        PropertyTag::CurrentVersion | PropertyTag::TargetVersion => {
            PropertyValue::Scalar(format_version(first))
        }
        PropertyTag::AvailablePeripherals => PropertyValue::List(
            PERIPHERALS
                .iter()
                .enumerate()
                .filter(|(bit, _)| first & (1 << *bit) != 0)
                .map(|(_, name)| name.to_string())
                .collect(),
        ),
        PropertyTag::FlashStartAddress | PropertyTag::RamStartAddress => {
            PropertyValue::Scalar(format!("0x{:08X}", first))
        }
        PropertyTag::SystemDeviceId => PropertyValue::Scalar(format!("0x{:08X}", first)),
        PropertyTag::FlashSize
        | PropertyTag::FlashSectorSize
        | PropertyTag::RamSize
        | PropertyTag::MaxPacketSize
        | PropertyTag::FlashAccessSegmentSize
        | PropertyTag::FlashPageSize => PropertyValue::Scalar(size_fmt(first as u64)),
        PropertyTag::FlashBlockCount | PropertyTag::FlashAccessSegmentCount => {
            PropertyValue::Scalar(first.to_string())
        }
        PropertyTag::AvailableCommands => PropertyValue::List(
            CommandTag::ALL
                .iter()
                .filter(|tag| is_command_available(**tag, first))
                .map(|tag| tag.name().to_string())
                .collect(),
        ),
        PropertyTag::CrcCheckStatus
        | PropertyTag::QspiInitStatus
        | PropertyTag::ReliableUpdateStatus => {
            PropertyValue::Scalar(StatusCode(first).to_string())
        }
        PropertyTag::VerifyWrites | PropertyTag::ValidateRegions | PropertyTag::FlashFacSupport => {
            PropertyValue::Scalar(if first != 0 { "ON" } else { "OFF" }.to_string())
        }
        PropertyTag::ReservedRegions => PropertyValue::List(
            values
                .chunks_exact(2)
                .filter(|pair| pair[0] != 0 || pair[1] != 0)
                .map(|pair| {
                    let size = pair[1].wrapping_sub(pair[0]) as u64 + 1;
                    format!("0x{:08X} - 0x{:08X}, {}", pair[0], pair[1], size_fmt(size))
                })
                .collect(),
        ),
        PropertyTag::SecurityState => PropertyValue::Scalar(
            if first == 0 || first == SECURITY_UNSECURE_MAGIC {
                "UNSECURE"
            } else {
                "SECURE"
            }
            .to_string(),
        ),
        PropertyTag::UniqueDeviceId => PropertyValue::Scalar(
            values
                .iter()
                .map(|word| format!("{:08X}", word))
                .collect::<Vec<_>>()
                .join(""),
        ),
        PropertyTag::FlashReadMargin => PropertyValue::Scalar(
            match first {
                0 => "NORMAL",
                1 => "USER",
                2 => "FACTORY",
                _ => "UNKNOWN",
            }
            .to_string(),
        ),
        PropertyTag::IrqNotifierPin => PropertyValue::Scalar(format!(
            "IRQ Port[{}], Pin[{}] is {}",
            (first >> 8) & 0xFF,
            first & 0xFF,
            if first & 0x8000_0000 != 0 {
                "enabled"
            } else {
                "disabled"
            }
        )),
        PropertyTag::ExternalMemoryAttributes => PropertyValue::List(
            values.iter().map(|word| format!("0x{:08X}", word)).collect(),
        ),
    }
}

/// Format a packed version word (`mark.major.minor.bugfix`) as e.g. `K3.0.0`
fn format_version(value: u32) -> String {
    let mark = (value >> 24) as u8;
    let version = format!(
        "{}.{}.{}",
        (value >> 16) & 0xFF,
        (value >> 8) & 0xFF,
        value & 0xFF
    );
    if mark.is_ascii_alphabetic() {
        format!("{}{}", mark as char, version)
    } else {
        version
    }
}

/// Format a byte count as a human-readable size (`512 B`, `64.0 kiB`)
pub fn size_fmt(num: u64) -> String {
    const UNITS: [&str; 5] = ["kiB", "MiB", "GiB", "TiB", "PiB"];

    if num < 1024 {
        return format!("{} B", num);
    }

    let mut value = num as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

// ===========================================================================
// External memories
// ===========================================================================

/// External memory identifiers probed by `list-memories`
pub const EXTERNAL_MEMORIES: [(u32, &str); 9] = [
    (0x001, "QuadSPI NOR"),
    (0x008, "SEMC NOR"),
    (0x009, "FlexSPI NOR"),
    (0x00A, "SPIFI NOR"),
    (0x100, "SEMC NAND"),
    (0x101, "FlexSPI NAND"),
    (0x110, "SPI NOR/EEPROM"),
    (0x120, "SD Card"),
    (0x121, "MMC/eMMC"),
];

/// Decoded `ExternalMemoryAttributes` property
///
/// The first word is a bitmap saying which of the following fields are
/// valid: bit 0 start address, bit 1 size (in KiB), bit 2 page size, bit 3
/// sector size, bit 4 block size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalMemoryAttributes {
    /// Start address
    pub address: Option<u32>,
    /// Total size in bytes
    pub size: Option<u64>,
    /// Page size in bytes
    pub page_size: Option<u32>,
    /// Sector size in bytes
    pub sector_size: Option<u32>,
    /// Block size in bytes
    pub block_size: Option<u32>,
}

impl ExternalMemoryAttributes {
    /// Decode the raw property words
    pub fn from_words(words: &[u32]) -> Self {
        let flags = words.first().copied().unwrap_or(0);
        let field = |bit: u32, index: usize| {
            if flags & (1 << bit) != 0 {
                words.get(index).copied()
            } else {
                None
            }
        };

        Self {
            address: field(0, 1),
            size: field(1, 2).map(|kib| kib as u64 * 1024),
            page_size: field(2, 3),
            sector_size: field(3, 4),
            block_size: field(4, 5),
        }
    }
}

// ===========================================================================
// Status codes
// ===========================================================================

/// Status code reported by the bootloader in a generic response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Operation succeeded
    pub const SUCCESS: Self = Self(0);
    /// Generic failure
    pub const FAIL: Self = Self(1);
    /// Target is read-only
    pub const READ_ONLY: Self = Self(2);
    /// Argument out of range
    pub const OUT_OF_RANGE: Self = Self(3);
    /// Invalid argument
    pub const INVALID_ARGUMENT: Self = Self(4);
    /// Operation timed out
    pub const TIMEOUT: Self = Self(5);
    /// Flash size error
    pub const FLASH_SIZE_ERROR: Self = Self(100);
    /// Address or length not aligned to the flash geometry
    pub const FLASH_ALIGNMENT_ERROR: Self = Self(101);
    /// Address outside of flash
    pub const FLASH_ADDRESS_ERROR: Self = Self(102);
    /// Flash access error
    pub const FLASH_ACCESS_ERROR: Self = Self(103);
    /// Flash protection violation
    pub const FLASH_PROTECTION_VIOLATION: Self = Self(104);
    /// Flash command failure
    pub const FLASH_COMMAND_FAILURE: Self = Self(105);
    /// Wrong backdoor key or erase key
    pub const FLASH_ERASE_KEY_ERROR: Self = Self(107);
    /// Command not recognized
    pub const UNKNOWN_COMMAND: Self = Self(10000);
    /// Command rejected because the device is secured
    pub const SECURITY_VIOLATION: Self = Self(10001);
    /// Memory range invalid
    pub const MEMORY_RANGE_INVALID: Self = Self(10200);
    /// Memory read failed
    pub const MEMORY_READ_FAILED: Self = Self(10201);
    /// Memory write failed
    pub const MEMORY_WRITE_FAILED: Self = Self(10202);
    /// Property not known to this bootloader
    pub const UNKNOWN_PROPERTY: Self = Self(10300);
    /// Application CRC check passed
    pub const APP_CRC_CHECK_PASSED: Self = Self(10400);
    /// Application CRC check inactive
    pub const APP_CRC_CHECK_INACTIVE: Self = Self(10402);
    /// Reliable update succeeded
    pub const RELIABLE_UPDATE_SUCCESS: Self = Self(10600);
    /// Reliable update inactive
    pub const RELIABLE_UPDATE_INACTIVE: Self = Self(10602);
    /// Backup application invalid
    pub const RELIABLE_UPDATE_BACKUP_INVALID: Self = Self(10603);

    fn description(self) -> &'static str {
        match self.0 {
            0 => "Success",
            1 => "Failure",
            2 => "Read Only Error",
            3 => "Out Of Range Error",
            4 => "Invalid Argument Error",
            5 => "Timeout Error",
            100 => "FLASH Driver: Size Error",
            101 => "FLASH Driver: Alignment Error",
            102 => "FLASH Driver: Address Error",
            103 => "FLASH Driver: Access Error",
            104 => "FLASH Driver: Protection Violation",
            105 => "FLASH Driver: Command Failure",
            106 => "FLASH Driver: Unknown Property",
            107 => "FLASH Driver: Erase Key Error",
            10000 => "Unknown Command",
            10001 => "Security Violation",
            10002 => "Abort Data Phase",
            10200 => "Memory Range Invalid",
            10201 => "Memory Read Failed",
            10202 => "Memory Write Failed",
            10300 => "Unknown Property",
            10301 => "Read Only Property",
            10302 => "Invalid Property Value",
            10400 => "Application CRC Check: Passed",
            10401 => "Application CRC Check: Failed",
            10402 => "Application CRC Check: Inactive",
            10403 => "Application CRC Check: Invalid",
            10404 => "Application CRC Check: Out Of Range",
            10600 => "Reliable Update: Success",
            10601 => "Reliable Update: Fail",
            10602 => "Reliable Update: Inactive",
            10603 => "Reliable Update: Backup Application Invalid",
            10604 => "Reliable Update: Still In Main Application",
            _ => "Unknown Status Code",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}
