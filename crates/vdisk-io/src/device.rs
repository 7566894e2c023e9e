use crate::{DeviceError, DeviceResult};

/// Bytes per sector. Every device call is expressed in whole sectors of this size.
pub const SECTOR_SIZE: usize = 512;

/// Smallest chunk size (in sectors) accepted by allocated-block queries.
pub const MIN_CHUNK_SIZE: u64 = 128;
/// Largest chunk size (in sectors) accepted by allocated-block queries.
pub const MAX_CHUNK_SIZE: u64 = 262_144;
/// Maximum number of chunks a single allocated-block query may cover.
pub const MAX_CHUNK_NUMBER: u64 = 512 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
}

impl Geometry {
    /// Conventional CHS translation for a disk of `capacity_sectors`.
    pub fn for_capacity(capacity_sectors: u64) -> Self {
        const GIB_SECTORS: u64 = (1 << 30) / SECTOR_SIZE as u64;
        let (heads, sectors) = if capacity_sectors < GIB_SECTORS {
            (64u32, 32u32)
        } else if capacity_sectors < 2 * GIB_SECTORS {
            (128, 32)
        } else {
            (255, 63)
        };
        let per_cylinder = u64::from(heads) * u64::from(sectors);
        let cylinders = u32::try_from(capacity_sectors / per_cylinder).unwrap_or(u32::MAX);
        Self {
            cylinders,
            heads,
            sectors,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdapterType {
    Ide,
    ScsiBusLogic,
    #[default]
    ScsiLsiLogic,
    Unknown,
}

/// Snapshot of device properties taken once when the device is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub bios_geometry: Geometry,
    pub phys_geometry: Geometry,
    pub capacity_sectors: u64,
    pub adapter_type: AdapterType,
    pub num_links: u32,
    pub parent_file_name_hint: Option<String>,
    pub uuid: Option<String>,
}

impl DeviceInfo {
    /// Info for a standalone (non-chained) device of the given size.
    pub fn flat(capacity_sectors: u64) -> Self {
        let geometry = Geometry::for_capacity(capacity_sectors);
        Self {
            bios_geometry: geometry,
            phys_geometry: geometry,
            capacity_sectors,
            adapter_type: AdapterType::default(),
            num_links: 1,
            parent_file_name_hint: None,
            uuid: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Capacity in bytes, saturating at `u64::MAX`.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_sectors.saturating_mul(SECTOR_SIZE as u64)
    }
}

/// One contiguous allocated extent, in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedBlock {
    pub offset: u64,
    pub length: u64,
}

impl AllocatedBlock {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Sector-addressed block storage collaborator.
///
/// All I/O is in whole sectors: `buf.len()` must equal `sector_count * SECTOR_SIZE`. Methods take
/// `&self` so one handle can serve concurrent callers; an implementation must keep each call
/// atomic with respect to other calls touching the same sectors.
pub trait SectorDevice {
    fn info(&self) -> DeviceResult<DeviceInfo>;

    fn read_sectors(&self, start_sector: u64, sector_count: u64, buf: &mut [u8])
        -> DeviceResult<()>;

    fn write_sectors(&self, start_sector: u64, sector_count: u64, buf: &[u8]) -> DeviceResult<()>;

    /// Allocated extents within `[start_sector, start_sector + sector_count)`, at `chunk_size`
    /// granularity, in ascending order.
    fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> DeviceResult<Vec<AllocatedBlock>>;

    /// Release the handle. Calling this again reports the device's own failure.
    fn close(&mut self) -> DeviceResult<()>;
}

impl<D: SectorDevice + ?Sized> SectorDevice for Box<D> {
    fn info(&self) -> DeviceResult<DeviceInfo> {
        (**self).info()
    }

    fn read_sectors(
        &self,
        start_sector: u64,
        sector_count: u64,
        buf: &mut [u8],
    ) -> DeviceResult<()> {
        (**self).read_sectors(start_sector, sector_count, buf)
    }

    fn write_sectors(&self, start_sector: u64, sector_count: u64, buf: &[u8]) -> DeviceResult<()> {
        (**self).write_sectors(start_sector, sector_count, buf)
    }

    fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> DeviceResult<Vec<AllocatedBlock>> {
        (**self).query_allocated_blocks(start_sector, sector_count, chunk_size)
    }

    fn close(&mut self) -> DeviceResult<()> {
        (**self).close()
    }
}

/// Validate a sector request against the device size and the buffer length, returning the byte
/// range it covers.
pub fn check_sector_request(
    start_sector: u64,
    sector_count: u64,
    buf_len: usize,
    capacity_sectors: u64,
) -> DeviceResult<std::ops::Range<u64>> {
    let expected = sector_count
        .checked_mul(SECTOR_SIZE as u64)
        .ok_or_else(|| DeviceError::invalid_argument("sector count overflows"))?;
    if u64::try_from(buf_len).ok() != Some(expected) {
        return Err(DeviceError::invalid_argument(format!(
            "buffer length {buf_len} does not match {sector_count} sectors"
        )));
    }
    let end_sector = start_sector
        .checked_add(sector_count)
        .filter(|end| *end <= capacity_sectors)
        .ok_or_else(|| {
            DeviceError::out_of_range(format!(
                "sectors {start_sector}+{sector_count} exceed capacity {capacity_sectors}"
            ))
        })?;
    let sector = SECTOR_SIZE as u64;
    Ok(start_sector * sector..end_sector * sector)
}

/// Validate the arguments of an allocated-block query.
pub fn check_chunked_query(
    start_sector: u64,
    sector_count: u64,
    chunk_size: u64,
    capacity_sectors: u64,
) -> DeviceResult<()> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(DeviceError::invalid_argument(format!(
            "chunk size {chunk_size} outside [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]"
        )));
    }
    if start_sector % chunk_size != 0 || sector_count % chunk_size != 0 {
        return Err(DeviceError::invalid_argument(format!(
            "range {start_sector}+{sector_count} is not a multiple of chunk size {chunk_size}"
        )));
    }
    if sector_count / chunk_size > MAX_CHUNK_NUMBER {
        return Err(DeviceError::invalid_argument(format!(
            "query covers more than {MAX_CHUNK_NUMBER} chunks"
        )));
    }
    match start_sector.checked_add(sector_count) {
        Some(end) if end <= capacity_sectors => Ok(()),
        _ => Err(DeviceError::out_of_range(format!(
            "sectors {start_sector}+{sector_count} exceed capacity {capacity_sectors}"
        ))),
    }
}

/// Walk a validated query chunk by chunk, merging consecutive allocated chunks into one block.
pub fn coalesce_chunks(
    start_sector: u64,
    sector_count: u64,
    chunk_size: u64,
    mut chunk_allocated: impl FnMut(u64, u64) -> bool,
) -> Vec<AllocatedBlock> {
    let mut blocks: Vec<AllocatedBlock> = Vec::new();
    let end = start_sector + sector_count;
    let mut chunk = start_sector;
    while chunk < end {
        if chunk_allocated(chunk, chunk_size) {
            match blocks.last_mut() {
                Some(last) if last.end() == chunk => last.length += chunk_size,
                _ => blocks.push(AllocatedBlock {
                    offset: chunk,
                    length: chunk_size,
                }),
            }
        }
        chunk += chunk_size;
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_scales_with_capacity() {
        let small = Geometry::for_capacity(64 * 32 * 10);
        assert_eq!(
            small,
            Geometry {
                cylinders: 10,
                heads: 64,
                sectors: 32
            }
        );

        let large = Geometry::for_capacity(255 * 63 * 5000);
        assert_eq!(large.heads, 255);
        assert_eq!(large.sectors, 63);
        assert_eq!(large.cylinders, 5000);
    }

    #[test]
    fn check_sector_request_rejects_mismatched_buffers() {
        let err = check_sector_request(0, 2, 512, 8).unwrap_err();
        assert_eq!(err.code, DeviceError::INVALID_ARGUMENT);
    }

    #[test]
    fn check_sector_request_reports_out_of_range() {
        let err = check_sector_request(7, 2, 1024, 8).unwrap_err();
        assert!(err.is_out_of_range());

        let err = check_sector_request(u64::MAX, 1, 512, 8).unwrap_err();
        assert!(err.is_out_of_range());

        assert_eq!(check_sector_request(6, 2, 1024, 8).unwrap(), 3072..4096);
    }

    #[test]
    fn check_chunked_query_validates_chunk_size_and_alignment() {
        let cap = 4096;
        assert!(check_chunked_query(0, 1024, 128, cap).is_ok());

        let err = check_chunked_query(0, 1024, 64, cap).unwrap_err();
        assert_eq!(err.code, DeviceError::INVALID_ARGUMENT);

        let err = check_chunked_query(64, 1024, 128, cap).unwrap_err();
        assert_eq!(err.code, DeviceError::INVALID_ARGUMENT);

        let err = check_chunked_query(0, 100, 128, cap).unwrap_err();
        assert_eq!(err.code, DeviceError::INVALID_ARGUMENT);

        let err = check_chunked_query(3968, 256, 128, cap).unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[test]
    fn coalesce_chunks_merges_runs() {
        let allocated = [true, true, false, true, false, false, true, true];
        let blocks = coalesce_chunks(0, 8 * 128, 128, |start, _| allocated[(start / 128) as usize]);
        assert_eq!(
            blocks,
            vec![
                AllocatedBlock {
                    offset: 0,
                    length: 256
                },
                AllocatedBlock {
                    offset: 384,
                    length: 128
                },
                AllocatedBlock {
                    offset: 768,
                    length: 256
                },
            ]
        );
    }
}
