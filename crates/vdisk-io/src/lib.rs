//! Byte-addressed I/O over sector-addressed block storage.
//!
//! Block storage services only accept whole-sector reads and writes, while most consumers want
//! ordinary `(offset, length)` semantics. This crate provides:
//!
//! - [`SectorDevice`]: the narrow whole-sector contract a storage collaborator implements
//! - [`SectorAdapter`]: arbitrary byte ranges on top of a `SectorDevice`, merging partial sectors
//!   with read-modify-write and passing aligned runs straight through
//! - [`StreamCursor`]: sequential `read`/`write`/`seek` with a shared running offset, also usable
//!   through `std::io::{Read, Write, Seek}`
//! - [`MemDevice`] and [`FileDevice`]: in-memory and raw image file devices
//!
//! ```rust
//! use vdisk_io::{MemDevice, SectorAdapter};
//!
//! let adapter = SectorAdapter::open(MemDevice::new(4).unwrap()).unwrap();
//! adapter.write_at(500, b"straddles a sector boundary").unwrap();
//!
//! let mut buf = [0u8; 27];
//! assert_eq!(adapter.read_at(500, &mut buf).unwrap(), 27);
//! assert_eq!(&buf, b"straddles a sector boundary");
//! ```

mod adapter;
mod cursor;
mod device;
mod error;
mod file;
mod mem;
pub(crate) mod range_set;
mod util;

pub use adapter::{map_device_error, SectorAdapter};
pub use cursor::StreamCursor;
pub use device::{
    check_chunked_query, check_sector_request, coalesce_chunks, AdapterType, AllocatedBlock,
    DeviceInfo, Geometry, SectorDevice, MAX_CHUNK_NUMBER, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
    SECTOR_SIZE,
};
pub use error::{
    transferred, DeviceError, DeviceResult, DiskError, Phase, Result, TransferError,
    TransferResult,
};
pub use file::{FileDevice, FileDeviceOptions};
pub use mem::{MemDevice, MemDeviceStats};
pub use util::is_aligned;

#[cfg(test)]
mod proptests;
