#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Barrier;

use vdisk_io::{
    AllocatedBlock, DeviceError, DeviceInfo, DeviceResult, MemDevice, SectorDevice, SECTOR_SIZE,
};

/// Which kind of device call a [`FaultyDevice`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOn {
    Read,
    Write,
}

/// Wraps a [`MemDevice`] and fails the `nth` matching call (0-based) with `error`.
pub struct FaultyDevice {
    pub inner: MemDevice,
    fault_on: FaultOn,
    remaining: AtomicUsize,
    error: DeviceError,
}

impl FaultyDevice {
    pub fn new(inner: MemDevice, fault_on: FaultOn, nth: usize, error: DeviceError) -> Self {
        Self {
            inner,
            fault_on,
            remaining: AtomicUsize::new(nth),
            error,
        }
    }

    fn check(&self, kind: FaultOn) -> DeviceResult<()> {
        if kind != self.fault_on {
            return Ok(());
        }
        let prev = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.checked_sub(1).unwrap_or(usize::MAX))
            })
            .unwrap();
        if prev == 0 {
            return Err(self.error.clone());
        }
        Ok(())
    }
}

impl SectorDevice for FaultyDevice {
    fn info(&self) -> DeviceResult<DeviceInfo> {
        self.inner.info()
    }

    fn read_sectors(
        &self,
        start_sector: u64,
        sector_count: u64,
        buf: &mut [u8],
    ) -> DeviceResult<()> {
        self.check(FaultOn::Read)?;
        self.inner.read_sectors(start_sector, sector_count, buf)
    }

    fn write_sectors(&self, start_sector: u64, sector_count: u64, buf: &[u8]) -> DeviceResult<()> {
        self.check(FaultOn::Write)?;
        self.inner.write_sectors(start_sector, sector_count, buf)
    }

    fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> DeviceResult<Vec<AllocatedBlock>> {
        self.inner
            .query_allocated_blocks(start_sector, sector_count, chunk_size)
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }
}

/// Wraps a [`MemDevice`] and parks the first `read_sectors` call right after it has read, until the
/// test calls [`GatedDevice::resume`].
pub struct GatedDevice {
    pub inner: MemDevice,
    armed: AtomicBool,
    paused: Barrier,
    released: Barrier,
}

impl GatedDevice {
    pub fn new(inner: MemDevice) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            paused: Barrier::new(2),
            released: Barrier::new(2),
        }
    }

    /// Block until the gated read has loaded its sectors and is parked.
    pub fn wait_until_paused(&self) {
        self.paused.wait();
    }

    pub fn resume(&self) {
        self.released.wait();
    }
}

impl SectorDevice for GatedDevice {
    fn info(&self) -> DeviceResult<DeviceInfo> {
        self.inner.info()
    }

    fn read_sectors(
        &self,
        start_sector: u64,
        sector_count: u64,
        buf: &mut [u8],
    ) -> DeviceResult<()> {
        self.inner.read_sectors(start_sector, sector_count, buf)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.wait();
            self.released.wait();
        }
        Ok(())
    }

    fn write_sectors(&self, start_sector: u64, sector_count: u64, buf: &[u8]) -> DeviceResult<()> {
        self.inner.write_sectors(start_sector, sector_count, buf)
    }

    fn query_allocated_blocks(
        &self,
        start_sector: u64,
        sector_count: u64,
        chunk_size: u64,
    ) -> DeviceResult<Vec<AllocatedBlock>> {
        self.inner
            .query_allocated_blocks(start_sector, sector_count, chunk_size)
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }
}

/// Device contents with byte `i` set to `i % 251`.
pub fn patterned(sectors: usize) -> Vec<u8> {
    (0..sectors * SECTOR_SIZE).map(|i| (i % 251) as u8).collect()
}
