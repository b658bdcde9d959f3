//! A contiguous sector range of a [`Disk`](crate::disk::Disk), re-based so
//! that LBA 0 of the `Volume` is the first sector of the range. FAT parsing
//! and everything above it only ever sees a `Volume`, never a whole disk
//! directly -- mirroring how the teacher's `Storage` implementors are handed
//! to the FAT layer already sliced to a partition.

use crate::error::{DiskError, Result};
use crate::sector::{DeviceProperties, SectorSize, SectorStore};

/// A sub-range of sectors on a backing [`SectorStore`], addressed relative
/// to its own start. Used both for actual partitions and for "the whole
/// disk" (a `Volume` spanning every sector).
pub struct Volume<'a> {
    store: &'a mut dyn SectorStore,
    start_byte: u64,
    len_bytes: u64,
}

impl<'a> Volume<'a> {
    /// `start_lba`/`length_lba` are in units of the store's logical sector
    /// size. Bounds are checked against the store's total size.
    pub fn new(store: &'a mut dyn SectorStore, start_lba: u64, length_lba: u64) -> Result<Self> {
        let lss = store.sector_size().logical as u64;
        let start_byte = start_lba
            .checked_mul(lss)
            .ok_or_else(|| DiskError::OutOfBounds("start LBA overflows byte offset".into()))?;
        let len_bytes = length_lba
            .checked_mul(lss)
            .ok_or_else(|| DiskError::OutOfBounds("length overflows byte offset".into()))?;
        let end_byte = start_byte
            .checked_add(len_bytes)
            .ok_or_else(|| DiskError::OutOfBounds("volume range overflows byte offset".into()))?;
        if end_byte > store.size_bytes() {
            return Err(DiskError::OutOfBounds(format!(
                "volume range {start_byte}..{end_byte} exceeds device size {}",
                store.size_bytes()
            )));
        }
        Ok(Self {
            store,
            start_byte,
            len_bytes,
        })
    }

    pub fn whole(store: &'a mut dyn SectorStore) -> Self {
        let len_bytes = store.size_bytes();
        Self {
            store,
            start_byte: 0,
            len_bytes,
        }
    }

    fn check(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| DiskError::OutOfBounds("range overflows byte offset".into()))?;
        if end > self.len_bytes {
            return Err(DiskError::OutOfBounds(format!(
                "range {offset}..{end} exceeds volume size {}",
                self.len_bytes
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Volume<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("start_byte", &self.start_byte)
            .field("len_bytes", &self.len_bytes)
            .finish()
    }
}

impl SectorStore for Volume<'_> {
    fn size_bytes(&self) -> u64 {
        self.len_bytes
    }

    fn sector_size(&self) -> SectorSize {
        self.store.sector_size()
    }

    fn writable(&self) -> bool {
        self.store.writable()
    }

    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len() as u64)?;
        self.store.read_bytes(self.start_byte + offset, buf)
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.check(offset, buf.len() as u64)?;
        self.store.write_bytes(self.start_byte + offset, buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn is_block_device(&self) -> bool {
        self.store.is_block_device()
    }

    fn reread_partition_table(&mut self) -> Result<()> {
        self.store.reread_partition_table()
    }

    fn device_properties(&self) -> DeviceProperties {
        self.store.device_properties()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::MemStorage;

    #[test]
    fn volume_rebases_addressing() {
        let mut backing = MemStorage::new(4096, SectorSize::uniform(512).unwrap());
        backing.write_bytes(1024, &[9, 9, 9, 9]).unwrap();

        let mut vol = Volume::new(&mut backing, 2, 2).unwrap();
        let mut buf = [0u8; 4];
        vol.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9, 9]);
    }

    #[test]
    fn volume_rejects_out_of_range() {
        let mut backing = MemStorage::new(4096, SectorSize::uniform(512).unwrap());
        let mut vol = Volume::new(&mut backing, 2, 2).unwrap();
        let mut buf = [0u8; 4];
        assert!(vol.read_bytes(1020, &mut buf).is_err());
    }

    #[test]
    fn volume_construction_rejects_overflowing_range() {
        let mut backing = MemStorage::new(4096, SectorSize::uniform(512).unwrap());
        assert!(Volume::new(&mut backing, 0, 100).is_err());
    }
}
