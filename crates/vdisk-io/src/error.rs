use std::fmt;
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskError>;

/// Result of a byte-addressed transfer: the number of bytes moved, or the error together with the
/// bytes that were moved before it occurred.
pub type TransferResult = std::result::Result<usize, TransferError>;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Raw failure reported by a [`SectorDevice`](crate::SectorDevice).
///
/// Carries the collaborator's numeric code and message verbatim so callers can inspect them
/// after the adapter has classified the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (error code {code})")]
pub struct DeviceError {
    pub code: u64,
    pub message: String,
}

impl DeviceError {
    pub const INVALID_ARGUMENT: u64 = 1;
    pub const IO: u64 = 2;
    pub const READ_ONLY: u64 = 3;
    pub const HANDLE_CLOSED: u64 = 4;
    /// The request addressed sectors outside the device.
    pub const OUT_OF_RANGE: u64 = 16009;

    pub fn new(code: u64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_ARGUMENT, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(Self::OUT_OF_RANGE, message)
    }

    pub fn handle_closed() -> Self {
        Self::new(Self::HANDLE_CLOSED, "device handle is closed")
    }

    pub fn read_only() -> Self {
        Self::new(Self::READ_ONLY, "device is read-only")
    }

    pub fn io(err: io::Error) -> Self {
        Self::new(Self::IO, err.to_string())
    }

    pub fn is_out_of_range(&self) -> bool {
        self.code == Self::OUT_OF_RANGE
    }
}

/// The step of an adapter operation during which a device call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadLeading,
    ReadAligned,
    ReadTrailing,
    /// Loading the leading partial sector before merging a write into it.
    WriteLeadingLoad,
    WriteLeadingStore,
    WriteAligned,
    WriteTrailingLoad,
    WriteTrailingStore,
    Info,
    QueryAllocatedBlocks,
    Close,
}

impl Phase {
    pub fn is_read_path(self) -> bool {
        matches!(
            self,
            Phase::ReadLeading | Phase::ReadAligned | Phase::ReadTrailing
        )
    }

    pub fn is_write_path(self) -> bool {
        matches!(
            self,
            Phase::WriteLeadingLoad
                | Phase::WriteLeadingStore
                | Phase::WriteAligned
                | Phase::WriteTrailingLoad
                | Phase::WriteTrailingStore
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::ReadLeading => "read of leading partial sector",
            Phase::ReadAligned => "aligned sector read",
            Phase::ReadTrailing => "read of trailing partial sector",
            Phase::WriteLeadingLoad => "load of leading partial sector for merge",
            Phase::WriteLeadingStore => "store of merged leading partial sector",
            Phase::WriteAligned => "aligned sector write",
            Phase::WriteTrailingLoad => "load of trailing partial sector for merge",
            Phase::WriteTrailingStore => "store of merged trailing partial sector",
            Phase::Info => "device info query",
            Phase::QueryAllocatedBlocks => "allocated block query",
            Phase::Close => "device close",
        };
        f.write_str(s)
    }
}

/// Stream-level outcome of an adapter or cursor operation.
#[derive(Debug, Error)]
pub enum DiskError {
    /// The read started at or past the end of the device.
    #[error("end of stream")]
    EndOfStream,

    /// The write does not fit inside the device; nothing was committed by the bounds check.
    #[error("short write")]
    ShortWrite,

    #[error("invalid offset {0}: cannot seek before the start of the device")]
    InvalidOffset(i128),

    #[error("not implemented: {0}")]
    Unsupported(&'static str),

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("{phase} failed: {source}")]
    Device {
        phase: Phase,
        #[source]
        source: DeviceError,
    },
}

impl DiskError {
    /// The raw device code, when the error originated from the device.
    pub fn device_code(&self) -> Option<u64> {
        match self {
            DiskError::Device { source, .. } => Some(source.code),
            _ => None,
        }
    }
}

/// A failed transfer that may still have moved some bytes.
#[derive(Debug, Error)]
#[error("{error} (after {transferred} bytes)")]
pub struct TransferError {
    pub transferred: usize,
    #[source]
    pub error: DiskError,
}

impl TransferError {
    pub fn new(transferred: usize, error: DiskError) -> Self {
        Self { transferred, error }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self.error, DiskError::EndOfStream)
    }

    pub fn into_error(self) -> DiskError {
        self.error
    }
}

impl From<DiskError> for TransferError {
    fn from(error: DiskError) -> Self {
        Self::new(0, error)
    }
}

/// Bytes moved by a transfer, whether or not it failed.
pub fn transferred(result: &TransferResult) -> usize {
    match result {
        Ok(n) => *n,
        Err(err) => err.transferred,
    }
}

impl From<DiskError> for io::Error {
    fn from(err: DiskError) -> Self {
        map_disk_error_to_io(err)
    }
}

impl From<TransferError> for io::Error {
    fn from(err: TransferError) -> Self {
        map_disk_error_to_io(err.error)
    }
}

fn map_disk_error_to_io(err: DiskError) -> io::Error {
    match err {
        err @ DiskError::EndOfStream => io::Error::new(io::ErrorKind::UnexpectedEof, err),
        err @ DiskError::ShortWrite => io::Error::new(io::ErrorKind::WriteZero, err),
        err @ (DiskError::InvalidOffset(_) | DiskError::OffsetOverflow) => {
            io::Error::new(io::ErrorKind::InvalidInput, err)
        }
        err @ DiskError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
        DiskError::Device { phase, source } => {
            let kind = match source.code {
                DeviceError::INVALID_ARGUMENT => io::ErrorKind::InvalidInput,
                DeviceError::READ_ONLY => io::ErrorKind::PermissionDenied,
                DeviceError::HANDLE_CLOSED => io::ErrorKind::NotConnected,
                _ => io::ErrorKind::Other,
            };
            io::Error::new(kind, DiskError::Device { phase, source })
        }
    }
}
