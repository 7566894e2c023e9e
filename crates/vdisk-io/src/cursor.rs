use std::io::{self, SeekFrom};
use std::sync::{Mutex, MutexGuard};

use crate::{transferred, DiskError, Result, SectorAdapter, SectorDevice, TransferResult};

/// Sequential access over a [`SectorAdapter`] with an implicit running offset.
///
/// The offset lock only covers the read-modify-write of the offset around one delegated call; it
/// adds no atomicity to the device I/O itself. Positional `read_at`/`write_at` bypass it.
pub struct StreamCursor<'a, D> {
    adapter: &'a SectorAdapter<D>,
    offset: Mutex<u64>,
}

impl<'a, D: SectorDevice> StreamCursor<'a, D> {
    pub fn new(adapter: &'a SectorAdapter<D>) -> Self {
        Self {
            adapter,
            offset: Mutex::new(0),
        }
    }

    pub fn adapter(&self) -> &'a SectorAdapter<D> {
        self.adapter
    }

    pub fn position(&self) -> u64 {
        *self.lock_offset()
    }

    /// Read at the current offset and advance it by the bytes actually read, even when the read
    /// fails partway.
    pub fn read(&self, buf: &mut [u8]) -> TransferResult {
        let mut offset = self.lock_offset();
        let result = self.adapter.read_at(*offset, buf);
        let n = transferred(&result);
        *offset += n as u64;
        tracing::debug!(
            transferred = n,
            len = buf.len(),
            offset = *offset,
            "cursor read"
        );
        result
    }

    /// Write at the current offset and advance it by the bytes actually written.
    pub fn write(&self, buf: &[u8]) -> TransferResult {
        let mut offset = self.lock_offset();
        let result = self.adapter.write_at(*offset, buf);
        let n = transferred(&result);
        *offset += n as u64;
        tracing::debug!(
            transferred = n,
            len = buf.len(),
            offset = *offset,
            "cursor write"
        );
        result
    }

    /// Move the cursor. Seeking relative to the end of the device is not supported.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut offset = self.lock_offset();
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(*offset) + i128::from(delta),
            SeekFrom::End(_) => return Err(DiskError::Unsupported("seek relative to end")),
        };
        if target < 0 {
            return Err(DiskError::InvalidOffset(target));
        }
        *offset = u64::try_from(target).map_err(|_| DiskError::OffsetOverflow)?;
        Ok(*offset)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> TransferResult {
        self.adapter.read_at(offset, buf)
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> TransferResult {
        self.adapter.write_at(offset, buf)
    }

    fn lock_offset(&self) -> MutexGuard<'_, u64> {
        self.offset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// `std::io` treats end-of-stream as `Ok(0)` and reports a short transfer before its error; the
// error resurfaces on the next call since the offset has already advanced.
fn io_result(result: TransferResult) -> io::Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(err) if err.transferred > 0 => Ok(err.transferred),
        Err(err) if err.is_end_of_stream() => Ok(0),
        Err(err) => Err(err.into()),
    }
}

impl<D: SectorDevice> io::Read for &StreamCursor<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io_result(StreamCursor::read(*self, buf))
    }
}

impl<D: SectorDevice> io::Write for &StreamCursor<'_, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io_result(StreamCursor::write(*self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: SectorDevice> io::Seek for &StreamCursor<'_, D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        StreamCursor::seek(*self, pos).map_err(io::Error::from)
    }
}

impl<D: SectorDevice> io::Read for StreamCursor<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<D: SectorDevice> io::Write for StreamCursor<'_, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: SectorDevice> io::Seek for StreamCursor<'_, D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        io::Seek::seek(&mut &*self, pos)
    }
}
