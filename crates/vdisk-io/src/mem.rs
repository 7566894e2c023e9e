use std::sync::{Mutex, MutexGuard};

use crate::device::{check_chunked_query, check_sector_request, coalesce_chunks};
use crate::range_set::SectorRangeSet;
use crate::{AllocatedBlock, DeviceError, DeviceInfo, DeviceResult, SectorDevice, SECTOR_SIZE};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemDeviceStats {
    pub read_calls: u64,
    pub write_calls: u64,
    pub sectors_read: u64,
    pub sectors_written: u64,
}

struct MemState {
    data: Vec<u8>,
    allocated: SectorRangeSet,
    stats: MemDeviceStats,
    closed: bool,
}

/// In-memory sector device.
///
/// Sectors that have been written are reported as allocated. Each call holds the device lock for
/// its whole duration, so a multi-sector read or write is atomic with respect to other calls.
pub struct MemDevice {
    info: DeviceInfo,
    state: Mutex<MemState>,
}

impl MemDevice {
    pub fn new(capacity_sectors: u64) -> DeviceResult<Self> {
        Self::with_info(DeviceInfo::flat(capacity_sectors))
    }

    pub fn with_info(info: DeviceInfo) -> DeviceResult<Self> {
        let len = info
            .capacity_sectors
            .checked_mul(SECTOR_SIZE as u64)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| DeviceError::invalid_argument("capacity does not fit in memory"))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DeviceError::new(DeviceError::IO, "out of memory"))?;
        data.resize(len, 0);
        Ok(Self::from_parts(info, data))
    }

    /// Wrap existing contents; every sector counts as allocated.
    pub fn from_bytes(data: Vec<u8>) -> DeviceResult<Self> {
        if data.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::invalid_argument(format!(
                "image length {} is not a multiple of {SECTOR_SIZE}",
                data.len()
            )));
        }
        let sectors = (data.len() / SECTOR_SIZE) as u64;
        let mut dev = Self::from_parts(DeviceInfo::flat(sectors), data);
        dev.state_mut().allocated.insert(0, sectors);
        Ok(dev)
    }

    fn from_parts(info: DeviceInfo, data: Vec<u8>) -> Self {
        Self {
            info,
            state: Mutex::new(MemState {
                data,
                allocated: SectorRangeSet::new(),
                stats: MemDeviceStats::default(),
                closed: false,
            }),
        }
    }

    pub fn stats(&self) -> MemDeviceStats {
        self.lock().stats
    }

    pub fn reset_stats(&self) {
        self.lock().stats = MemDeviceStats::default();
    }

    /// Copy of the full device contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&mut self) -> &mut MemState {
        self.state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_state(&self) -> DeviceResult<MutexGuard<'_, MemState>> {
        let state = self.lock();
        if state.closed {
            return Err(DeviceError::handle_closed());
        }
        Ok(state)
    }
}

impl SectorDevice for MemDevice {
    fn info(&self) -> DeviceResult<DeviceInfo> {
        self.open_state()?;
        Ok(self.info.clone())
    }

    fn read_sectors(
        &self,
        start_sector: u64,
        sector_count: u64,
        buf: &mut [u8],
    ) -> DeviceResult<()> {
        let mut state = self.open_state()?;
        let range =
            check_sector_request(start_sector, sector_count, buf.len(), self.info.capacity_sectors)?;
        buf.copy_from_slice(&state.data[range.start as usize..range.end as usize]);
        state.stats.read_calls += 1;
        state.stats.sectors_read += sector_count;
        Ok(())
    }

    fn write_sectors(&self, start_sector: u64, sector_count: u64, buf: &[u8]) -> DeviceResult<()> {
        let mut state = self.open_state()?;
        let range =
            check_sector_request(start_sector, sector_count, buf.len(), self.info.capacity_sectors)?;
        state.data[range.start as usize..range.end as usize].copy_from_slice(buf);
        state
            .allocated
            .insert(start_sector, start_sector + sector_count);
        state.stats.write_calls += 1;
        state.stats.sectors_written += sector_count;
        Ok(())
    }

    fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> DeviceResult<Vec<AllocatedBlock>> {
        let state = self.open_state()?;
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
            |start, len| state.allocated.intersects(start, start + len),
        ))
    }

    fn close(&mut self) -> DeviceResult<()> {
        let state = self.state_mut();
        if state.closed {
            return Err(DeviceError::handle_closed());
        }
        state.closed = true;
        Ok(())
    }
}
