use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::device::{check_chunked_query, check_sector_request, coalesce_chunks};
use crate::{AllocatedBlock, DeviceError, DeviceInfo, DeviceResult, SectorDevice, SECTOR_SIZE};

/// How a raw image file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileDeviceOptions {
    pub read_only: bool,
    /// Create (or truncate) the image with this many zeroed sectors.
    pub create_sectors: Option<u64>,
}

/// Raw flat disk image backed by a host file.
///
/// Uses positional I/O so concurrent calls never share a file cursor. A flat image has every
/// sector allocated.
#[derive(Debug)]
pub struct FileDevice {
    file: Option<File>,
    info: DeviceInfo,
    read_only: bool,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>, options: FileDeviceOptions) -> DeviceResult<Self> {
        let path = path.as_ref();
        if options.read_only && options.create_sectors.is_some() {
            return Err(DeviceError::invalid_argument(
                "cannot create an image in read-only mode",
            ));
        }

        let mut open = OpenOptions::new();
        open.read(true).write(!options.read_only);
        if options.create_sectors.is_some() {
            open.create(true).truncate(true);
        }
        let file = open.open(path).map_err(|err| {
            DeviceError::new(
                DeviceError::IO,
                format!("open {}: {err}", path.display()),
            )
        })?;

        if let Some(sectors) = options.create_sectors {
            let len = sectors
                .checked_mul(SECTOR_SIZE as u64)
                .ok_or_else(|| DeviceError::invalid_argument("image size overflows"))?;
            file.set_len(len).map_err(DeviceError::io)?;
        }

        Self::from_file(file, options.read_only)
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> DeviceResult<Self> {
        Self::open(
            path,
            FileDeviceOptions {
                read_only: true,
                create_sectors: None,
            },
        )
    }

    pub fn from_file(file: File, read_only: bool) -> DeviceResult<Self> {
        let len = file.metadata().map_err(DeviceError::io)?.len();
        if len % SECTOR_SIZE as u64 != 0 {
            return Err(DeviceError::invalid_argument(format!(
                "image length {len} is not a multiple of {SECTOR_SIZE}"
            )));
        }
        Ok(Self {
            file: Some(file),
            info: DeviceInfo::flat(len / SECTOR_SIZE as u64),
            read_only,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn file(&self) -> DeviceResult<&File> {
        self.file.as_ref().ok_or_else(DeviceError::handle_closed)
    }
}

impl SectorDevice for FileDevice {
    fn info(&self) -> DeviceResult<DeviceInfo> {
        self.file()?;
        Ok(self.info.clone())
    }

    fn read_sectors(
        &self,
        start_sector: u64,
        sector_count: u64,
        buf: &mut [u8],
    ) -> DeviceResult<()> {
        let file = self.file()?;
        let range =
            check_sector_request(start_sector, sector_count, buf.len(), self.info.capacity_sectors)?;
        read_exact_at(file, buf, range.start).map_err(DeviceError::io)
    }

    fn write_sectors(&self, start_sector: u64, sector_count: u64, buf: &[u8]) -> DeviceResult<()> {
        let file = self.file()?;
        if self.read_only {
            return Err(DeviceError::read_only());
        }
        let range =
            check_sector_request(start_sector, sector_count, buf.len(), self.info.capacity_sectors)?;
        write_all_at(file, buf, range.start).map_err(DeviceError::io)
    }

    fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> DeviceResult<Vec<AllocatedBlock>> {
        self.file()?;
        check_chunked_query(
            start_sector,
            sector_count,
            chunk_size,
            self.info.capacity_sectors,
        )?;
        Ok(coalesce_chunks(
            start_sector,
            sector_count,
            chunk_size,
            |_, _| true,
        ))
    }

    fn close(&mut self) -> DeviceResult<()> {
        let file = self.file.take().ok_or_else(DeviceError::handle_closed)?;
        if !self.read_only {
            file.sync_all().map_err(DeviceError::io)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
