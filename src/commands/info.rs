//! Property and memory listing commands

use crate::backends;
use mboot_core::tags::{size_fmt, PropertyTag, PropertyValue};
use mboot_core::transfer::{MemoryList, Transfer};
use mboot_core::Result;
use std::fmt::Write;

/// Print every property the target answers
pub fn run_info(transfer: &mut Transfer) -> Result<()> {
    let info = transfer.mcu_info()?;
    print!("{}", format_info(&info));
    Ok(())
}

/// Print internal and external memories
pub fn run_list_memories(transfer: &mut Transfer) -> Result<()> {
    let list = transfer.memory_list()?;
    println!("{}", format_memory_list(&list));
    Ok(())
}

/// List all compiled-in device backends
pub fn list_backends() {
    print!("{}", backends::backend_help());
}

fn format_info(info: &[(PropertyTag, PropertyValue)]) -> String {
    let mut out = String::new();
    for (tag, value) in info {
        let _ = write!(out, " {}:", tag);
        match value {
            PropertyValue::List(items) => {
                for item in items {
                    let _ = write!(out, "\n  - {}", item);
                }
            }
            PropertyValue::Scalar(s) => {
                let _ = write!(out, "\n  = {}", s);
            }
        }
        out.push('\n');
    }
    out
}

fn format_memory_list(list: &MemoryList) -> String {
    let mut out = String::new();

    for (title, memories) in [
        ("Internal Flash", &list.internal_flash),
        ("Internal RAM", &list.internal_ram),
    ] {
        if memories.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{}:", title);
        for (i, mem) in memories.iter().enumerate() {
            let _ = write!(
                out,
                " {}) Start Address: 0x{:08X}, Size: {}",
                i,
                mem.address,
                size_fmt(mem.size as u64)
            );
            if let Some(sector) = mem.sector_size {
                let _ = write!(out, ", Sector Size: {}", size_fmt(sector as u64));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if !list.external.is_empty() {
        out.push_str("External Memories:\n");
        for (i, (name, attr)) in list.external.iter().enumerate() {
            let _ = writeln!(out, " {}) {}:", i, name);
            if let Some(address) = attr.address {
                let _ = writeln!(out, "     Start Address: 0x{:08X}", address);
            }
            if let Some(size) = attr.size {
                let _ = writeln!(out, "     Memory Size:   {} ({} B)", size_fmt(size), size);
            }
            if let Some(page) = attr.page_size {
                let _ = writeln!(out, "     Page Size:     {}", page);
            }
            if let Some(sector) = attr.sector_size {
                let _ = writeln!(out, "     Sector Size:   {}", sector);
            }
            if let Some(block) = attr.block_size {
                let _ = writeln!(out, "     Block Size:    {}", block);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mboot_core::tags::ExternalMemoryAttributes;
    use mboot_core::transfer::InternalMemory;

    #[test]
    fn test_format_info() {
        let info = vec![
            (
                PropertyTag::CurrentVersion,
                PropertyValue::Scalar("K3.0.0".into()),
            ),
            (
                PropertyTag::AvailablePeripherals,
                PropertyValue::List(vec!["UART".into(), "USB-HID".into()]),
            ),
        ];
        let text = format_info(&info);
        let expected = format!(
            " {}:\n  = K3.0.0\n {}:\n  - UART\n  - USB-HID\n",
            PropertyTag::CurrentVersion,
            PropertyTag::AvailablePeripherals
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_format_memory_list() {
        let list = MemoryList {
            internal_flash: vec![InternalMemory {
                address: 0,
                size: 64 * 1024,
                sector_size: Some(1024),
            }],
            internal_ram: vec![InternalMemory {
                address: 0x1FFF_F000,
                size: 16 * 1024,
                sector_size: None,
            }],
            external: vec![(
                "FlexSPI NOR",
                ExternalMemoryAttributes {
                    address: Some(0x0800_0000),
                    size: Some(8 * 1024 * 1024),
                    page_size: None,
                    sector_size: Some(4096),
                    block_size: None,
                },
            )],
        };

        let text = format_memory_list(&list);
        assert!(text.starts_with(
            "Internal Flash:\n 0) Start Address: 0x00000000, Size: 64.0 kiB, Sector Size: 1.0 kiB\n"
        ));
        assert!(text.contains("Internal RAM:\n 0) Start Address: 0x1FFFF000, Size: 16.0 kiB\n"));
        assert!(text.contains(" 0) FlexSPI NOR:\n     Start Address: 0x08000000\n"));
        assert!(text.contains("     Memory Size:   8.0 MiB (8388608 B)\n"));
        assert!(text.contains("     Sector Size:   4096\n"));
        assert!(!text.contains("Page Size"));
    }

    #[test]
    fn test_empty_memory_list() {
        assert_eq!(format_memory_list(&MemoryList::default()), "");
    }
}
