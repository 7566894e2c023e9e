use std::sync::{Mutex, MutexGuard};

use crate::util::{checked_end, is_aligned};
use crate::{
    AllocatedBlock, DeviceError, DeviceInfo, DiskError, Phase, Result, SectorDevice, StreamCursor,
    TransferError, TransferResult, SECTOR_SIZE,
};

const SECTOR_SIZE_U64: u64 = SECTOR_SIZE as u64;

/// Byte-addressed reads and writes on top of a whole-sector [`SectorDevice`].
///
/// A request is split into a leading partial sector, a run of aligned sectors and a trailing
/// partial sector. Partial sectors are merged through a scratch sector (read-modify-write on the
/// write path); the aligned run goes straight to the device.
///
/// # Locking
///
/// The adapter lock is only taken when the request's offset or length is not a multiple of
/// [`SECTOR_SIZE`]. Unaligned requests are therefore serialized against each other, but an
/// aligned request runs unlocked and can race with the read-modify-write of an unaligned request
/// that shares a sector with it. Aligned requests rely on the device making each whole-sector call
/// atomic.
pub struct SectorAdapter<D> {
    device: D,
    info: DeviceInfo,
    capacity: u64,
    rmw_lock: Mutex<()>,
}

impl<D: SectorDevice> SectorAdapter<D> {
    /// Fetch the device info and wrap the device. If the info query fails the device is closed
    /// before the error is returned.
    pub fn open(mut device: D) -> Result<Self> {
        match device.info() {
            Ok(info) => Ok(Self::with_info(device, info)),
            Err(source) => {
                tracing::warn!(code = source.code, "device info query failed; closing device");
                if let Err(close_err) = device.close() {
                    tracing::warn!(
                        code = close_err.code,
                        "closing device after failed open: {close_err}"
                    );
                }
                Err(map_device_error(Phase::Info, source))
            }
        }
    }

    /// Wrap a device whose info snapshot was obtained elsewhere.
    pub fn with_info(device: D, info: DeviceInfo) -> Self {
        let capacity = info.capacity_bytes();
        Self {
            device,
            info,
            capacity,
            rmw_lock: Mutex::new(()),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Device size in bytes, fixed for the life of the adapter.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// A sequential cursor positioned at offset 0.
    pub fn cursor(&self) -> StreamCursor<'_, D> {
        StreamCursor::new(self)
    }

    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Reads are clamped at the end of the device. Starting at or past the end yields
    /// [`DiskError::EndOfStream`] without touching the device.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> TransferResult {
        if offset >= self.capacity {
            return Err(DiskError::EndOfStream.into());
        }
        let available = self.capacity - offset;
        let len = usize::try_from(available).map_or(buf.len(), |avail| avail.min(buf.len()));
        let buf = &mut buf[..len];
        if buf.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock_unaligned(offset, buf.len());
        tracing::trace!(offset, len = buf.len(), "read_at");

        let mut lba = offset / SECTOR_SIZE_U64;
        let mut total = 0usize;

        let head = (offset % SECTOR_SIZE_U64) as usize;
        if head != 0 {
            let mut scratch = [0u8; SECTOR_SIZE];
            self.device
                .read_sectors(lba, 1, &mut scratch)
                .map_err(|err| failed(Phase::ReadLeading, err, total))?;
            let count = (SECTOR_SIZE - head).min(buf.len());
            buf[..count].copy_from_slice(&scratch[head..head + count]);
            lba += 1;
            total += count;
        }

        let aligned_sectors = (buf.len() - total) / SECTOR_SIZE;
        if aligned_sectors > 0 {
            let end = total + aligned_sectors * SECTOR_SIZE;
            self.device
                .read_sectors(lba, aligned_sectors as u64, &mut buf[total..end])
                .map_err(|err| failed(Phase::ReadAligned, err, total))?;
            lba += aligned_sectors as u64;
            total = end;
        }

        if total < buf.len() {
            let mut scratch = [0u8; SECTOR_SIZE];
            self.device
                .read_sectors(lba, 1, &mut scratch)
                .map_err(|err| failed(Phase::ReadTrailing, err, total))?;
            let count = buf.len() - total;
            buf[total..].copy_from_slice(&scratch[..count]);
            total += count;
        }

        Ok(total)
    }

    /// Write all of `buf` at `offset`.
    ///
    /// A write that does not fit entirely inside the device fails with [`DiskError::ShortWrite`]
    /// before any device call.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> TransferResult {
        let fits = checked_end(offset, buf.len()).is_ok_and(|end| end <= self.capacity);
        if offset > self.capacity || !fits {
            return Err(DiskError::ShortWrite.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock_unaligned(offset, buf.len());
        tracing::trace!(offset, len = buf.len(), "write_at");

        let mut lba = offset / SECTOR_SIZE_U64;
        let mut total = 0usize;

        let head = (offset % SECTOR_SIZE_U64) as usize;
        if head != 0 {
            let mut scratch = [0u8; SECTOR_SIZE];
            self.device
                .read_sectors(lba, 1, &mut scratch)
                .map_err(|err| failed(Phase::WriteLeadingLoad, err, total))?;
            let count = (SECTOR_SIZE - head).min(buf.len());
            scratch[head..head + count].copy_from_slice(&buf[..count]);
            self.device
                .write_sectors(lba, 1, &scratch)
                .map_err(|err| failed(Phase::WriteLeadingStore, err, total))?;
            lba += 1;
            total += count;
        }

        let aligned_sectors = (buf.len() - total) / SECTOR_SIZE;
        if aligned_sectors > 0 {
            let end = total + aligned_sectors * SECTOR_SIZE;
            self.device
                .write_sectors(lba, aligned_sectors as u64, &buf[total..end])
                .map_err(|err| failed(Phase::WriteAligned, err, total))?;
            lba += aligned_sectors as u64;
            total = end;
        }

        if total < buf.len() {
            let mut scratch = [0u8; SECTOR_SIZE];
            self.device
                .read_sectors(lba, 1, &mut scratch)
                .map_err(|err| failed(Phase::WriteTrailingLoad, err, total))?;
            let count = buf.len() - total;
            scratch[..count].copy_from_slice(&buf[total..]);
            self.device
                .write_sectors(lba, 1, &scratch)
                .map_err(|err| failed(Phase::WriteTrailingStore, err, total))?;
            total += count;
        }

        Ok(total)
    }

    /// Allocated extents in `[start_sector, start_sector + sector_count)` at `chunk_size`
    /// granularity.
    pub fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> Result<Vec<AllocatedBlock>> {
        self.device
            .query_allocated_blocks(start_sector, sector_count, chunk_size)
            .map_err(|err| map_device_error(Phase::QueryAllocatedBlocks, err))
    }

    /// Release the device handle.
    pub fn close(mut self) -> Result<()> {
        self.device
            .close()
            .map_err(|err| map_device_error(Phase::Close, err))
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    fn lock_unaligned(&self, offset: u64, len: usize) -> Option<MutexGuard<'_, ()>> {
        if is_aligned(offset, len) {
            return None;
        }
        Some(
            self.rmw_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// Classify a device failure into a stream-level outcome.
///
/// "Out of range" becomes end-of-stream on the read path and a short write on the write path
/// (including the load half of a read-modify-write). Everything else is passed through with its
/// code and message.
pub fn map_device_error(phase: Phase, source: DeviceError) -> DiskError {
    if source.is_out_of_range() {
        if phase.is_read_path() {
            return DiskError::EndOfStream;
        }
        if phase.is_write_path() {
            return DiskError::ShortWrite;
        }
    }
    DiskError::Device { phase, source }
}

fn failed(phase: Phase, err: DeviceError, transferred: usize) -> TransferError {
    TransferError::new(transferred, map_device_error(phase, err))
}
