//! End-to-end transfer workflows against emulated targets

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use mboot_core::device::BackdoorKey;
use mboot_core::image::{self, ImageFormat, MemoryImage};
use mboot_core::select::{PromptSelection, RuleSelection};
use mboot_core::tags::{PropertyTag, PropertyValue};
use mboot_core::transfer::{
    EraseOutcome, EraseRequest, MassErase, ReadOutcome, ReadTarget, Transfer, TransferProgress,
    TransferState,
};
use mboot_core::{Config, Error, ErrorKind};
use mboot_dummy::{DummyBus, DummyConfig};

fn transfer(bus: &DummyBus) -> Transfer<'_> {
    Transfer::new(bus, Box::new(RuleSelection::Unique), Config::default())
}

#[test]
fn test_write_then_read_back_hex_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.hex");
    let firmware = MemoryImage::new(0x1003, (0..100u8).collect());
    image::save(&input, &firmware, ImageFormat::IntelHex).unwrap();

    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());
    // Stale content in the sector that must be erased first
    target.borrow_mut().flash_mut()[0x1000..0x1400].fill(0x00);

    let summary = transfer(&bus)
        .write(&input, ImageFormat::IntelHex, None, 0)
        .unwrap();
    assert_eq!(summary.address, 0x1003);
    assert_eq!(summary.erased.start_address, 0x1000);
    assert_eq!(summary.erased.length, 0x400);

    let output = dir.path().join("dump.srec");
    let outcome = transfer(&bus)
        .read(0x1003, Some(100), &ReadTarget::file(&output).unwrap())
        .unwrap();
    assert_eq!(
        outcome,
        ReadOutcome::Saved {
            path: output.clone(),
            length: 100
        }
    );

    let back = image::load(&output, ImageFormat::SRecord, None).unwrap();
    assert_eq!(back, firmware);
    assert!(std::fs::read_to_string(&output)
        .unwrap()
        .starts_with("S00800006D626F6F74"));

    // Bytes around the image inside the erased window are blank
    let t = target.borrow();
    assert_eq!(t.flash()[0x1000], 0xFF);
    assert_eq!(t.flash()[0x1003 + 100], 0xFF);
    assert_eq!(t.opens, 2);
    assert_eq!(t.closes, 2);
}

#[test]
fn test_write_binary_with_offset() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.bin");
    std::fs::write(&input, [0xAA, 0xBB, 0x01, 0x02, 0x03]).unwrap();

    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());

    let summary = transfer(&bus)
        .write(&input, ImageFormat::Binary, Some(0x400), 2)
        .unwrap();
    assert_eq!(summary.length, 3);
    assert_eq!(&target.borrow().flash()[0x400..0x404], &[1, 2, 3, 0xFF]);

    // Offset past the end keeps the whole file
    transfer(&bus)
        .write(&input, ImageFormat::Binary, Some(0x800), 5)
        .unwrap();
    assert_eq!(
        &target.borrow().flash()[0x800..0x805],
        &[0xAA, 0xBB, 0x01, 0x02, 0x03]
    );
}

#[test]
fn test_read_dump() {
    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());
    target.borrow_mut().flash_mut()[0x1000..0x1010].copy_from_slice(&[
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F,
    ]);

    let outcome = transfer(&bus)
        .read(0x1000, Some(16), &ReadTarget::dump(false))
        .unwrap();
    let ReadOutcome::Dump(text) = outcome else {
        panic!("expected a dump");
    };
    let rows: Vec<&str> = text.lines().filter(|l| l.starts_with(" 0")).collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with(" 00001000 | 00 01 02 03"));
}

#[test]
fn test_read_without_length_outside_flash() {
    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());

    let mut t = transfer(&bus);
    let err = t
        .read(0x1FFF_F000, None, &ReadTarget::dump(false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(t.state(), TransferState::Failed);
    assert_eq!(target.borrow().closes, 1);
}

#[test]
fn test_mass_erase_prefers_unsecure() {
    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());
    target.borrow_mut().set_secured(true);
    target.borrow_mut().flash_mut()[0] = 0x12;

    let outcome = transfer(&bus).erase(EraseRequest::Mass).unwrap();
    assert_eq!(outcome, EraseOutcome::Mass(MassErase::Unsecure));
    assert!(!target.borrow().is_secured());
    assert_eq!(target.borrow().flash()[0], 0xFF);
}

#[test]
fn test_mass_erase_plain_when_unsecure_missing() {
    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::lpc55());
    target.borrow_mut().flash_mut()[0] = 0x12;

    let outcome = transfer(&bus).erase(EraseRequest::Mass).unwrap();
    assert_eq!(outcome, EraseOutcome::Mass(MassErase::Plain));
    assert_eq!(target.borrow().flash()[0], 0xFF);
}

#[test]
fn test_no_device_is_reported_without_open() {
    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());

    let mut t = Transfer::new(
        &bus,
        Box::new(RuleSelection::First),
        Config::with_target("MK66"),
    );
    let err = t.reset().unwrap_err();
    assert!(matches!(err, Error::NoDeviceFound));
    assert_eq!(target.borrow().opens, 0);
    assert!(target.borrow().events.is_empty());
}

#[test]
fn test_selection_between_targets() {
    let mut bus = DummyBus::new();
    let kl27 = bus.attach(DummyConfig::kl27());
    let lpc55 = bus.attach(DummyConfig::lpc55());

    let err = transfer(&bus).reset().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(kl27.borrow().opens + lpc55.borrow().opens, 0);

    let mut listing = Vec::new();
    let prompt = PromptSelection::new(Cursor::new("1\n"), &mut listing);
    Transfer::new(&bus, Box::new(prompt), Config::default())
        .reset()
        .unwrap();
    assert_eq!(lpc55.borrow().events, vec!["reset"]);
    assert!(kl27.borrow().events.is_empty());
    let listing = String::from_utf8(listing).unwrap();
    assert!(listing.contains(" 0) KL27Z"));
    assert!(listing.contains(" 1) LPC55S69"));

    // A name filter leaves one candidate, no prompt needed
    Transfer::new(
        &bus,
        Box::new(RuleSelection::Unique),
        Config::with_target("kl27"),
    )
    .reset()
    .unwrap();
    assert_eq!(kl27.borrow().events, vec!["reset"]);
}

#[test]
fn test_open_failure_is_transport_error() {
    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.bin");
    std::fs::write(&input, [1u8; 16]).unwrap();

    target.borrow_mut().disconnected = true;
    let err = transfer(&bus)
        .write(&input, ImageFormat::Binary, None, 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(target.borrow().closes, 0);
    assert_eq!(target.borrow().opens, 0);
}

#[test]
fn test_secured_write_is_rejected_and_closed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.bin");
    std::fs::write(&input, [1u8; 16]).unwrap();

    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());
    target.borrow_mut().set_secured(true);

    let mut t = transfer(&bus);
    let err = t.write(&input, ImageFormat::Binary, None, 0).unwrap_err();
    assert!(err.status().is_some());
    assert_eq!(target.borrow().closes, 1);
    assert_eq!(t.state(), TransferState::Failed);

    let key: BackdoorKey = "X:30313233343536373839414243444546".parse().unwrap();
    transfer(&bus).unlock(Some(key)).unwrap();
    transfer(&bus)
        .write(&input, ImageFormat::Binary, None, 0)
        .unwrap();
    assert_eq!(&target.borrow().flash()[..16], &[1u8; 16]);
}

#[test]
fn test_info_and_memory_list() {
    let mut bus = DummyBus::new();
    bus.attach(DummyConfig::lpc55());

    let info = transfer(&bus).mcu_info().unwrap();
    let version = info
        .iter()
        .find(|(tag, _)| *tag == PropertyTag::CurrentVersion)
        .map(|(_, value)| value.clone());
    assert_eq!(version, Some(PropertyValue::Scalar("K3.0.0".into())));
    assert!(info
        .iter()
        .all(|(tag, _)| *tag != PropertyTag::ExternalMemoryAttributes));

    let list = transfer(&bus).memory_list().unwrap();
    assert_eq!(list.internal_flash.len(), 1);
    assert_eq!(list.internal_flash[0].size, 608 * 1024);
    assert_eq!(list.internal_flash[0].sector_size, Some(32 * 1024));
    assert_eq!(list.internal_ram[0].address, 0x2000_0000);
    assert_eq!(list.external.len(), 1);
    assert_eq!(list.external[0].0, "FlexSPI NOR");
    assert_eq!(list.external[0].1.size, Some(8 * 1024 * 1024));
}

#[test]
fn test_configure_memory_places_block_below_ram_top() {
    let dir = tempfile::tempdir().unwrap();
    let block = dir.path().join("flexspi.bin");
    std::fs::write(&block, [0xC0, 0xFF, 0xEE, 0x00]).unwrap();

    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::lpc55());

    let address = transfer(&bus).configure_memory(&block, None, 0x009).unwrap();
    let expected = 0x2000_0000 + 256 * 1024 - 4 - 1024;
    assert_eq!(address, expected);

    let t = target.borrow();
    let offset = (expected - 0x2000_0000) as usize;
    assert_eq!(&t.ram()[offset..offset + 4], &[0xC0, 0xFF, 0xEE, 0x00]);
    assert_eq!(
        t.events,
        vec![format!("configure_memory 0x9 0x{:08X}", expected)]
    );
}

#[test]
fn test_control_commands() {
    let dir = tempfile::tempdir().unwrap();
    let sb = dir.path().join("update.sb");
    std::fs::write(&sb, b"STMP-sb-content").unwrap();

    let mut bus = DummyBus::new();
    let target = bus.attach(DummyConfig::kl27());

    assert_eq!(transfer(&bus).receive_sb_file(&sb).unwrap(), 15);
    assert_eq!(transfer(&bus).fuse(2, Some(0x55), 4).unwrap(), 0x55);
    assert_eq!(transfer(&bus).fuse(2, None, 4).unwrap(), 0x55);
    transfer(&bus).fill(0x1FFF_F000, 8, 0xDEAD_BEEF).unwrap();
    transfer(&bus).call(0x1FFF_F001, 7).unwrap();
    transfer(&bus).execute(0x0000_0401, 0, 0x2000_0000).unwrap();
    transfer(&bus).reset().unwrap();

    // Not offered by this target
    let err = transfer(&bus).update(0x8000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    let t = target.borrow();
    assert_eq!(t.sb_files, vec![b"STMP-sb-content".to_vec()]);
    assert_eq!(&t.ram()[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
    assert_eq!(
        t.events,
        vec![
            "call 0x1FFFF001 0x7",
            "execute 0x00000401 0x0 0x20000000",
            "reset"
        ]
    );
    assert_eq!(t.opens, t.closes);
}

#[derive(Default)]
struct Recorder {
    events: Rc<RefCell<Vec<String>>>,
}

impl TransferProgress for Recorder {
    fn erasing(&mut self, bytes: usize) {
        self.events.borrow_mut().push(format!("erase {}", bytes));
    }

    fn writing(&mut self, total: usize) {
        self.events.borrow_mut().push(format!("write {}", total));
    }

    fn write_progress(&mut self, done: usize) {
        self.events.borrow_mut().push(format!("wrote {}", done));
    }

    fn finished(&mut self) {
        self.events.borrow_mut().push("done".into());
    }
}

#[test]
fn test_progress_reports_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.bin");
    std::fs::write(&input, vec![0x5A; 5000]).unwrap();

    let mut bus = DummyBus::new();
    bus.attach(DummyConfig::kl27());

    let recorder = Recorder::default();
    let events = recorder.events.clone();
    Transfer::new(&bus, Box::new(RuleSelection::First), Config::default())
        .with_progress(Box::new(recorder))
        .write(&input, ImageFormat::Binary, None, 0)
        .unwrap();

    assert_eq!(
        *events.borrow(),
        vec!["erase 5120", "write 5000", "wrote 4096", "wrote 5000", "done"]
    );
}
