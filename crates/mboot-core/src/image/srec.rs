//! Motorola S-record reading and writing
//!
//! Each record is `S<type><count><address><data><checksum>` in hex, where
//! `count` covers address, data and checksum bytes and the checksum is the
//! ones' complement of the low byte of the sum of count, address and data.

use std::fmt::Write as _;

use super::{MemoryImage, Segment, RECORD_DATA_LEN};
use crate::error::{Error, Result};

/// Longest `S0` header text written
const MAX_HEADER_LEN: usize = 64;

/// Address field width of a record type
fn address_len(kind: u8) -> Option<usize> {
    match kind {
        0 | 1 | 5 | 9 => Some(2),
        2 | 6 | 8 => Some(3),
        3 | 7 => Some(4),
        _ => None,
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn record_error(line: usize, reason: impl Into<String>) -> Error {
    Error::Record {
        line,
        reason: reason.into(),
    }
}

/// Decode one record line into its type and the bytes after the type
/// (count, address, data, checksum)
fn decode_line(line_no: usize, line: &str) -> Result<(u8, Vec<u8>)> {
    if !line.is_ascii() {
        return Err(record_error(line_no, "invalid characters"));
    }
    let rest = line
        .strip_prefix('S')
        .ok_or_else(|| record_error(line_no, "record does not start with 'S'"))?;
    let mut chars = rest.chars();
    let kind = chars
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| record_error(line_no, "missing record type"))? as u8;

    let hex = chars.as_str();
    if hex.len() % 2 != 0 || hex.len() < 2 {
        return Err(record_error(line_no, "odd number of hex digits"));
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| record_error(line_no, "invalid hex digit"))?;

    let count = bytes[0] as usize;
    if count + 1 != bytes.len() {
        return Err(record_error(
            line_no,
            format!("byte count {} does not match record length", count),
        ));
    }

    let (body, sum) = bytes.split_at(bytes.len() - 1);
    if checksum(body) != sum[0] {
        return Err(record_error(
            line_no,
            format!(
                "checksum mismatch (expected {:02X}, found {:02X})",
                checksum(body),
                sum[0]
            ),
        ));
    }

    Ok((kind, bytes))
}

/// Parse S-record text into addressed segments
pub(super) fn parse(text: &str) -> Result<Vec<Segment>> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut data_records = 0u32;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let (kind, bytes) = decode_line(line_no, line)?;
        let addr_len = address_len(kind)
            .ok_or_else(|| record_error(line_no, format!("unsupported record type S{}", kind)))?;
        // count byte + address + checksum
        if bytes.len() < 1 + addr_len + 1 {
            return Err(record_error(line_no, "record too short for its address"));
        }
        let address = bytes[1..1 + addr_len]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let payload = &bytes[1 + addr_len..bytes.len() - 1];

        match kind {
            0 => (),
            1..=3 => {
                data_records += 1;
                // Extend the previous segment when records are consecutive
                match segments.last_mut() {
                    Some(seg) if seg.address + seg.data.len() as u64 == address => {
                        seg.data.extend_from_slice(payload)
                    }
                    _ => segments.push(Segment {
                        address,
                        data: payload.to_vec(),
                    }),
                }
            }
            5 | 6 => {
                if address != data_records as u64 {
                    return Err(record_error(
                        line_no,
                        format!(
                            "record count {} does not match {} data records",
                            address, data_records
                        ),
                    ));
                }
            }
            _ => break,
        }
    }

    Ok(segments)
}

fn push_record(out: &mut String, kind: u8, address: u32, addr_len: usize, data: &[u8]) {
    let mut bytes = Vec::with_capacity(1 + addr_len + data.len());
    bytes.push((addr_len + data.len() + 1) as u8);
    bytes.extend_from_slice(&address.to_be_bytes()[4 - addr_len..]);
    bytes.extend_from_slice(data);

    out.push('S');
    out.push(char::from(b'0' + kind));
    for b in &bytes {
        let _ = write!(out, "{:02X}", b);
    }
    let _ = writeln!(out, "{:02X}", checksum(&bytes));
}

/// Render an image as S-record text
///
/// The record family is the narrowest one able to hold the highest address
/// of the image.
pub(super) fn write(image: &MemoryImage, header: &str) -> String {
    let last = image.end_address().saturating_sub(1);
    let (data_kind, end_kind, addr_len) = if last <= 0xFFFF {
        (1, 9, 2)
    } else if last <= 0xFF_FFFF {
        (2, 8, 3)
    } else {
        (3, 7, 4)
    };

    let mut out = String::new();
    let header = header.as_bytes();
    push_record(&mut out, 0, 0, 2, &header[..header.len().min(MAX_HEADER_LEN)]);

    let mut count = 0u32;
    for (i, chunk) in image.data.chunks(RECORD_DATA_LEN).enumerate() {
        let address = image.base_address + (i * RECORD_DATA_LEN) as u32;
        push_record(&mut out, data_kind, address, addr_len, chunk);
        count += 1;
    }

    if count <= 0xFFFF {
        push_record(&mut out, 5, count, 2, &[]);
    } else if count <= 0xFF_FFFF {
        push_record(&mut out, 6, count, 3, &[]);
    }
    push_record(&mut out, end_kind, 0, addr_len, &[]);

    out
}
