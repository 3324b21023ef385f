//! Firmware image formats
//!
//! A [`MemoryImage`] is a contiguous byte buffer located at a base address.
//! Images are converted to and from three file formats:
//!
//! - raw binary (`.bin`, `.sb`), which carries no address
//! - Intel HEX (`.hex`, `.ihex`)
//! - Motorola S-record (`.srec`, `.s19`, `.s28`, `.s37`)
//!
//! Record formats may describe sparse memory. On load the records are
//! flattened into one buffer starting at the lowest addressed byte, with
//! holes filled with the erased-flash value `0xFF`.

mod intel_hex;
mod srec;

use std::fmt;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Value used to fill gaps between records
pub const FILL_BYTE: u8 = 0xFF;

/// Data bytes per record when saving record formats
pub const RECORD_DATA_LEN: usize = 32;

/// Header text written to S-record files unless overridden
pub const DEFAULT_SREC_HEADER: &str = "mboot";

/// Supported image file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Raw bytes without address information
    Binary,
    /// Intel HEX records
    IntelHex,
    /// Motorola S-records
    SRecord,
}

impl ImageFormat {
    /// Resolve a format from a file extension (case-insensitive, without dot)
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "bin" | "sb" => Ok(Self::Binary),
            "hex" | "ihex" => Ok(Self::IntelHex),
            "srec" | "s19" | "s28" | "s37" => Ok(Self::SRecord),
            other => Err(Error::Format(format!(
                "unsupported file extension '.{}' (expected bin, sb, hex, ihex, srec, s19, s28 or s37)",
                other
            ))),
        }
    }

    /// Resolve a format from the extension of `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            Error::Format(format!("'{}' has no file extension", path.display()))
        })?;
        Self::from_extension(ext)
    }

    /// Whether files of this format record their own load address
    pub fn has_addresses(self) -> bool {
        !matches!(self, Self::Binary)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::IntelHex => "Intel HEX",
            Self::SRecord => "S-record",
        })
    }
}

/// Contiguous memory content starting at `base_address`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    /// Address of `data[0]`
    pub base_address: u32,
    /// Image content
    pub data: Vec<u8>,
}

impl MemoryImage {
    /// Create an image from raw bytes
    pub fn new(base_address: u32, data: Vec<u8>) -> Self {
        Self { base_address, data }
    }

    /// Image length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last byte of the image
    pub fn end_address(&self) -> u64 {
        self.base_address as u64 + self.data.len() as u64
    }

    /// Drop `offset` leading bytes
    ///
    /// Does nothing when `offset` is not smaller than the image length. The
    /// base address is left unchanged, so the remaining bytes are placed
    /// where the image started.
    pub fn skip_leading(&mut self, offset: usize) {
        if offset < self.data.len() {
            self.data.drain(..offset);
        }
    }

    fn check_fits(&self) -> Result<()> {
        if self.end_address() > u32::MAX as u64 + 1 {
            return Err(Error::Range(format!(
                "image at 0x{:08X} with 0x{:X} bytes exceeds the 32-bit address space",
                self.base_address,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// An addressed block of data from one or more records
#[derive(Debug)]
struct Segment {
    address: u64,
    data: Vec<u8>,
}

/// Flatten record data into one contiguous image
///
/// Adjacent segments are joined, gaps are filled with [`FILL_BYTE`] and
/// overlapping segments are rejected.
fn flatten(mut segments: Vec<Segment>) -> Result<MemoryImage> {
    segments.retain(|s| !s.data.is_empty());
    segments.sort_by_key(|s| s.address);

    let Some(first) = segments.first() else {
        return Err(Error::Format("image contains no data records".into()));
    };
    let base = first.address;
    let mut data: Vec<u8> = Vec::new();

    for seg in &segments {
        let end = seg.address + seg.data.len() as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(Error::Format(format!(
                "record at 0x{:X} extends past the 32-bit address space",
                seg.address
            )));
        }

        let cursor = base + data.len() as u64;
        if seg.address < cursor {
            return Err(Error::Format(format!(
                "overlapping records at 0x{:08X}",
                seg.address
            )));
        }
        data.resize((seg.address - base) as usize, FILL_BYTE);
        data.extend_from_slice(&seg.data);
    }

    debug!(
        "Flattened {} segments into 0x{:X} bytes at 0x{:08X}",
        segments.len(),
        data.len(),
        base
    );
    Ok(MemoryImage::new(base as u32, data))
}

/// Decode image file content
///
/// `base` is the load address of binary content (default 0) and is ignored
/// for record formats, whose base is the lowest addressed byte.
pub fn decode(bytes: &[u8], format: ImageFormat, base: Option<u32>) -> Result<MemoryImage> {
    let image = match format {
        ImageFormat::Binary => MemoryImage::new(base.unwrap_or(0), bytes.to_vec()),
        ImageFormat::IntelHex => flatten(intel_hex::parse(text(bytes)?)?)?,
        ImageFormat::SRecord => flatten(srec::parse(text(bytes)?)?)?,
    };
    image.check_fits()?;
    Ok(image)
}

/// Encode an image in `format`
///
/// `header` sets the S-record `S0` text (default [`DEFAULT_SREC_HEADER`]);
/// other formats ignore it.
pub fn encode(image: &MemoryImage, format: ImageFormat, header: Option<&str>) -> Result<Vec<u8>> {
    image.check_fits()?;
    match format {
        ImageFormat::Binary => Ok(image.data.clone()),
        ImageFormat::IntelHex => Ok(intel_hex::write(image)?.into_bytes()),
        ImageFormat::SRecord => {
            Ok(srec::write(image, header.unwrap_or(DEFAULT_SREC_HEADER)).into_bytes())
        }
    }
}

/// Load an image file
pub fn load(path: &Path, format: ImageFormat, base: Option<u32>) -> Result<MemoryImage> {
    let bytes = std::fs::read(path).map_err(|source| Error::File {
        path: path.to_path_buf(),
        source,
    })?;
    let image = decode(&bytes, format, base)?;
    debug!(
        "Loaded {} image {}: 0x{:X} bytes at 0x{:08X}",
        format,
        path.display(),
        image.len(),
        image.base_address
    );
    Ok(image)
}

/// Save an image file
pub fn save(path: &Path, image: &MemoryImage, format: ImageFormat) -> Result<()> {
    let bytes = encode(image, format, None)?;
    std::fs::write(path, bytes).map_err(|source| Error::File {
        path: path.to_path_buf(),
        source,
    })
}

fn text(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::Format(format!("image is not text: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryImage {
        MemoryImage::new(0x0800_0000, (0..200u32).map(|i| (i * 7) as u8).collect())
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("BIN").unwrap(), ImageFormat::Binary);
        assert_eq!(ImageFormat::from_extension("sb").unwrap(), ImageFormat::Binary);
        assert_eq!(ImageFormat::from_extension("ihex").unwrap(), ImageFormat::IntelHex);
        assert_eq!(ImageFormat::from_extension("s19").unwrap(), ImageFormat::SRecord);
        assert_eq!(ImageFormat::from_extension("s37").unwrap(), ImageFormat::SRecord);
        assert!(matches!(
            ImageFormat::from_extension("elf"),
            Err(Error::Format(_))
        ));
        assert_eq!(
            ImageFormat::from_path(Path::new("out/fw.Hex")).unwrap(),
            ImageFormat::IntelHex
        );
        assert!(ImageFormat::from_path(Path::new("firmware")).is_err());
    }

    #[test]
    fn test_round_trip_all_formats() {
        let image = sample();
        for format in [ImageFormat::Binary, ImageFormat::IntelHex, ImageFormat::SRecord] {
            let bytes = encode(&image, format, None).unwrap();
            let base = (!format.has_addresses()).then_some(image.base_address);
            let back = decode(&bytes, format, base).unwrap();
            assert_eq!(back, image, "{}", format);
        }
    }

    #[test]
    fn test_binary_default_base() {
        let image = decode(&[1, 2, 3], ImageFormat::Binary, None).unwrap();
        assert_eq!(image.base_address, 0);
        assert_eq!(image.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_flatten_fills_gaps() {
        let image = flatten(vec![
            Segment {
                address: 0x110,
                data: vec![3, 4],
            },
            Segment {
                address: 0x100,
                data: vec![1, 2],
            },
        ])
        .unwrap();
        assert_eq!(image.base_address, 0x100);
        assert_eq!(image.len(), 0x12);
        assert_eq!(&image.data[..2], &[1, 2]);
        assert!(image.data[2..0x10].iter().all(|&b| b == FILL_BYTE));
        assert_eq!(&image.data[0x10..], &[3, 4]);
    }

    #[test]
    fn test_flatten_rejects_overlap() {
        let err = flatten(vec![
            Segment {
                address: 0x100,
                data: vec![0; 8],
            },
            Segment {
                address: 0x104,
                data: vec![0; 8],
            },
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_skip_leading() {
        let mut image = MemoryImage::new(0x1000, vec![1, 2, 3, 4]);
        image.skip_leading(1);
        assert_eq!(image.data, vec![2, 3, 4]);
        assert_eq!(image.base_address, 0x1000);

        image.skip_leading(3);
        assert_eq!(image.data, vec![2, 3, 4]);
        image.skip_leading(10);
        assert_eq!(image.data, vec![2, 3, 4]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let image = sample();
        for name in ["fw.bin", "fw.hex", "fw.srec"] {
            let path = dir.path().join(name);
            let format = ImageFormat::from_path(&path).unwrap();
            save(&path, &image, format).unwrap();
            let back = load(&path, format, Some(image.base_address)).unwrap();
            assert_eq!(back, image);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load(Path::new("/nonexistent/fw.bin"), ImageFormat::Binary, None).unwrap_err();
        assert!(matches!(err, Error::File { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }

    #[test]
    fn test_image_must_fit_address_space() {
        let image = MemoryImage::new(0xFFFF_FFF0, vec![0; 0x20]);
        assert!(matches!(
            encode(&image, ImageFormat::IntelHex, None),
            Err(Error::Range(_))
        ));
        assert!(decode(&[0; 0x20], ImageFormat::Binary, Some(0xFFFF_FFF0)).is_err());
    }
}
