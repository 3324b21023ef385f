//! Intel HEX reading and writing on top of the `ihex` crate

use ihex::{Reader, Record};

use super::{MemoryImage, Segment, RECORD_DATA_LEN};
use crate::error::Result;

/// Parse Intel HEX text into addressed segments
pub(super) fn parse(text: &str) -> Result<Vec<Segment>> {
    let mut base_address: u64 = 0;
    let mut segments = Vec::new();

    for record in Reader::new(text) {
        match record? {
            Record::Data { offset, value } => segments.push(Segment {
                address: base_address + offset as u64,
                data: value,
            }),
            Record::EndOfFile => break,
            Record::ExtendedSegmentAddress(segment) => base_address = (segment as u64) * 16,
            Record::ExtendedLinearAddress(upper) => base_address = (upper as u64) << 16,
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => (),
        }
    }

    Ok(segments)
}

/// Render an image as Intel HEX text
///
/// An Extended Linear Address record precedes the first data record whose
/// upper 16 address bits differ from the previous one. Data records never
/// cross a 64 KiB boundary.
pub(super) fn write(image: &MemoryImage) -> Result<String> {
    let mut records = Vec::new();
    let mut upper: u16 = 0;
    let mut pos = 0usize;

    while pos < image.data.len() {
        let address = image.base_address as u64 + pos as u64;
        let high = (address >> 16) as u16;
        let low = (address & 0xFFFF) as usize;
        if high != upper {
            records.push(Record::ExtendedLinearAddress(high));
            upper = high;
        }

        let len = RECORD_DATA_LEN
            .min(image.data.len() - pos)
            .min(0x1_0000 - low);
        records.push(Record::Data {
            offset: low as u16,
            value: image.data[pos..pos + len].to_vec(),
        });
        pos += len;
    }
    records.push(Record::EndOfFile);

    Ok(ihex::create_object_file_representation(&records)?)
}
