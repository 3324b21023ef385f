//! Error types for mboot-core
//!
//! Every failure surfaced to the command boundary is an [`Error`]. Each
//! variant belongs to exactly one [`ErrorKind`], which is what callers match
//! on when they only care about the category (usage mistake, missing device,
//! transport failure, ...).

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::tags::{CommandTag, StatusCode};

/// Broad category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing arguments, detected before any device interaction
    Usage,
    /// Enumeration returned no matching device
    NoDeviceFound,
    /// Opening or talking to the device failed
    Transport,
    /// The device does not report the required capability
    UnsupportedOperation,
    /// Address or length outside the addressable space
    Range,
    /// Malformed firmware image content or unsupported image type
    Format,
    /// Filesystem access failure
    Io,
    /// A documented precondition of an operation was violated
    Precondition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Usage => "usage error",
            Self::NoDeviceFound => "no device found",
            Self::Transport => "transport error",
            Self::UnsupportedOperation => "unsupported operation",
            Self::Range => "range error",
            Self::Format => "format error",
            Self::Io => "I/O error",
            Self::Precondition => "precondition violated",
        };
        f.write_str(name)
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid command line usage
    #[error("{0}")]
    Usage(String),

    /// No device matched the target filter
    #[error("target not detected")]
    NoDeviceFound,

    /// Transport-level failure (open, disconnect, timeout)
    #[error("transport failure: {0}")]
    Transport(String),

    /// The device answered a command with a non-success status
    #[error("{command} rejected by device: {status}")]
    Rejected {
        /// Command that was rejected
        command: CommandTag,
        /// Status code reported by the bootloader
        status: StatusCode,
    },

    /// Capability not reported by the device
    #[error("not supported: {0}")]
    Unsupported(String),

    /// Address or length outside the addressable space
    #[error("{0}")]
    Range(String),

    /// Malformed image content
    #[error("invalid image: {0}")]
    Format(String),

    /// Malformed record at a specific line of a record-based image
    #[error("line {line}: {reason}")]
    Record {
        /// 1-based line number
        line: usize,
        /// What is wrong with the record
        reason: String,
    },

    /// A file could not be opened, read or written
    #[error("could not access {}: {source}", .path.display())]
    File {
        /// Path of the file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Other I/O error (stdin/stdout)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sector size reported by the device is not a power of two
    #[error("sector size 0x{0:X} is not a non-zero power of two")]
    SectorSize(u32),
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Usage,
            Self::NoDeviceFound => ErrorKind::NoDeviceFound,
            Self::Transport(_) | Self::Rejected { .. } => ErrorKind::Transport,
            Self::Unsupported(_) => ErrorKind::UnsupportedOperation,
            Self::Range(_) => ErrorKind::Range,
            Self::Format(_) | Self::Record { .. } => ErrorKind::Format,
            Self::File { .. } | Self::Io(_) => ErrorKind::Io,
            Self::SectorSize(_) => ErrorKind::Precondition,
        }
    }

    /// Status code of a rejected command, if the device reported one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build the message shown to the operator
    ///
    /// Without `verbose` this is a single line. With `verbose` the full
    /// debug representation and the chain of sources follow.
    pub fn report(&self, verbose: bool) -> String {
        if !verbose {
            return format!(" ERROR: {}", self);
        }

        let mut report = format!(" ERROR ({}): {}\n   {:?}", self.kind(), self, self);
        let mut source = StdError::source(self);
        while let Some(cause) = source {
            report.push_str(&format!("\n   caused by: {}", cause));
            source = cause.source();
        }
        report
    }
}

impl From<ihex::ReaderError> for Error {
    fn from(e: ihex::ReaderError) -> Self {
        Error::Format(e.to_string())
    }
}

impl From<ihex::WriterError> for Error {
    fn from(e: ihex::WriterError) -> Self {
        Error::Format(e.to_string())
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::NoDeviceFound.kind(), ErrorKind::NoDeviceFound);
        assert_eq!(
            Error::Rejected {
                command: CommandTag::WriteMemory,
                status: StatusCode::FLASH_ALIGNMENT_ERROR,
            }
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            Error::Record {
                line: 3,
                reason: "bad checksum".into()
            }
            .kind(),
            ErrorKind::Format
        );
        assert_eq!(Error::SectorSize(3).kind(), ErrorKind::Precondition);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(Error::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_report() {
        let err = Error::Rejected {
            command: CommandTag::FlashEraseRegion,
            status: StatusCode::SECURITY_VIOLATION,
        };
        assert_eq!(
            err.report(false),
            " ERROR: FlashEraseRegion rejected by device: Security Violation (10001)"
        );
        assert!(!err.report(false).contains('\n'));

        let err = Error::File {
            path: PathBuf::from("fw.hex"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let verbose = err.report(true);
        assert!(verbose.starts_with(" ERROR (I/O error): could not access fw.hex"));
        assert!(verbose.contains("caused by: missing"));
    }
}
