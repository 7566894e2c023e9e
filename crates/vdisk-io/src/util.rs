use crate::{DiskError, Result, SECTOR_SIZE};

const SECTOR_SIZE_U64: u64 = SECTOR_SIZE as u64;

/// Whether both the byte offset and the byte length fall on sector boundaries.
pub fn is_aligned(offset: u64, len: usize) -> bool {
    offset % SECTOR_SIZE_U64 == 0 && len % SECTOR_SIZE == 0
}

pub fn checked_end(offset: u64, len: usize) -> Result<u64> {
    let len = u64::try_from(len).map_err(|_| DiskError::OffsetOverflow)?;
    offset.checked_add(len).ok_or(DiskError::OffsetOverflow)
}
