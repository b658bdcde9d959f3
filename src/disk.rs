//! `Disk`: the top-level handle for a disk image or block device (spec
//! §4.1). Owns a [`SectorStore`] and layers partition-table
//! parsing/writing and [`Volume`] slicing on top of it.

use crate::error::{Diagnostics, DiskError, Result};
use crate::sector::{FileStorage, MemStorage, SectorSize, SectorStore};
use crate::table::{mbr::Mbr, PartitionTable};
use crate::volume::Volume;
use std::path::Path;

#[derive(Debug)]
pub struct Disk<S: SectorStore> {
    store: S,
}

impl Disk<FileStorage> {
    pub fn open<P: AsRef<Path>>(path: P, sector_size: Option<SectorSize>, readonly: bool) -> Result<Self> {
        Ok(Self {
            store: FileStorage::open(path, sector_size, readonly)?,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, size_bytes: u64, sector_size: SectorSize) -> Result<Self> {
        Ok(Self {
            store: FileStorage::create(path, size_bytes, sector_size)?,
        })
    }
}

impl Disk<MemStorage> {
    pub fn create_in_memory(size_bytes: u64, sector_size: SectorSize) -> Self {
        Self {
            store: MemStorage::new(size_bytes, sector_size),
        }
    }
}

impl<S: SectorStore> Disk<S> {
    pub fn from_store(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn size_bytes(&self) -> u64 {
        self.store.size_bytes()
    }

    pub fn sector_size(&self) -> SectorSize {
        self.store.sector_size()
    }

    pub fn size_lba(&self) -> u64 {
        self.size_bytes() / self.sector_size().logical as u64
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.store.read_bytes(offset, buf)
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.store.write_bytes(offset, buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn read_sectors(&mut self, lba: u64, count: u64) -> Result<Vec<u8>> {
        let lss = self.sector_size().logical as u64;
        let mut buf = vec![0u8; (count * lss) as usize];
        self.store.read_bytes(lba * lss, &mut buf)?;
        Ok(buf)
    }

    /// Probes for a GPT, then an MBR, per spec §4.1.
    pub fn read_table(&mut self) -> Result<(PartitionTable, Diagnostics)> {
        let size_lba = self.size_lba();
        let lss = self.sector_size().logical;
        PartitionTable::detect(size_lba, lss, |lba, count| self.read_sectors(lba, count))
    }

    /// Writes a protective MBR followed by a freshly-serialized GPT.
    pub fn write_gpt(&mut self, gpt: &crate::table::gpt::Gpt) -> Result<()> {
        let size_lba = self.size_lba();
        let lss = self.sector_size().logical;
        let (primary, backup, array) = gpt.serialize(size_lba, lss)?;

        let protective = gpt.custom_mbr.clone().unwrap_or_else(|| Mbr::protective(size_lba));
        let mbr_bytes = protective.serialize()?;
        self.write_at(0, &mbr_bytes)?;

        let lss64 = lss as u64;
        self.write_at(lss64, &primary)?;
        self.write_at(2 * lss64, &array)?;

        let array_sectors = array.len() as u64 / lss64;
        let backup_array_lba = size_lba - 1 - array_sectors;
        self.write_at(backup_array_lba * lss64, &array)?;
        self.write_at((size_lba - 1) * lss64, &backup)?;

        self.store.flush()?;
        self.store.reread_partition_table()
    }

    pub fn write_mbr(&mut self, mbr: &Mbr) -> Result<()> {
        let bytes = mbr.serialize()?;
        self.write_at(0, &bytes)?;
        self.store.flush()?;
        self.store.reread_partition_table()
    }

    /// A `Volume` spanning the whole disk (used for superfloppy-style FAT
    /// images with no partition table at all).
    pub fn whole_volume(&mut self) -> Volume<'_> {
        Volume::whole(&mut self.store)
    }

    pub fn volume_at(&mut self, start_lba: u64, length_lba: u64) -> Result<Volume<'_>> {
        Volume::new(&mut self.store, start_lba, length_lba)
    }

    /// The `index`-th partition (0-based, in on-disk table order) as a
    /// `Volume`.
    pub fn partition_volume(&mut self, table: &PartitionTable, index: usize) -> Result<Volume<'_>> {
        let (start, length) = table.nth_partition_range(index)?;
        self.volume_at(start, length)
    }
}

impl Disk<FileStorage> {
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_disk_round_trip_with_no_table() {
        let mut disk = Disk::create_in_memory(8192, SectorSize::uniform(512).unwrap());
        {
            let mut vol = disk.whole_volume();
            vol.write_bytes(0, b"hello").unwrap();
        }
        let mut buf = [0u8; 5];
        disk.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn partition_table_round_trip_mbr() {
        let mut disk = Disk::create_in_memory(5 * 1024 * 1024, SectorSize::uniform(512).unwrap());
        let mbr = Mbr {
            partitions: vec![crate::table::mbr::MbrPartitionEntry {
                start_lba: 1,
                length_lba: 10_239,
                partition_type: 0x06,
                bootable: false,
            }],
            boot_code: vec![0u8; 446],
        };
        disk.write_mbr(&mbr).unwrap();

        let (table, _diag) = disk.read_table().unwrap();
        assert_eq!(table.partition_count(), 1);
        assert_eq!(table.nth_partition_range(0).unwrap(), (1, 10_239));

        let result = table.nth_partition_range(1);
        assert!(matches!(result, Err(DiskError::NotFound(_))));
    }
}
