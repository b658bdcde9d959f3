//! The File Allocation Table: a typed array of cluster links backed by a
//! one-sector (two for FAT12) write-back buffer replicated to every FAT
//! copy on flush.
//!
//! Ported from `examples/original_source/diskfs/fat/fat.py`; the buffer
//! protocol (`_ensure_buffer`/`flush`) is kept close to the original shape
//! since it doesn't generalize cleanly from the teacher's fixed-width
//! `FatEntryTracer`.

use crate::error::{DiskError, Result};
use crate::fat::reserved::{BootSector, FatType};
use crate::sector::SectorStore;

fn bad_cluster(ty: FatType) -> u32 {
    match ty {
        FatType::Fat12 => 0xFF7,
        FatType::Fat16 => 0xFFF7,
        FatType::Fat32 => 0x0FFF_FFF7,
    }
}

fn eoc_cluster(ty: FatType) -> u32 {
    match ty {
        FatType::Fat12 => 0xFFF,
        FatType::Fat16 => 0xFFFF,
        FatType::Fat32 => 0x0FFF_FFFF,
    }
}

fn avoid_data_cluster(ty: FatType) -> u32 {
    match ty {
        FatType::Fat12 => 0xFF0,
        FatType::Fat16 => 0xFFF0,
        FatType::Fat32 => 0x0FFF_FFF0,
    }
}

const CLUSTER_EMPTY: u32 = 0;
const CLUSTER_RESERVED: u32 = 1;

struct Buffer {
    data: Vec<u8>,
    /// Sector offset (from the start of a FAT copy) this buffer currently
    /// holds, or `None` before the first load.
    sector_offset: Option<u32>,
    dirty: bool,
}

/// FAT region management: the cluster-link array plus its write-back cache.
pub struct Fat {
    fat_type: FatType,
    /// Entries per FAT, including the two reserved entries at index 0/1.
    entries: u32,
    main_fat: usize,
    fat_size: u32,
    /// Start sector (relative to the volume) of each FAT copy.
    fat_starts: Vec<u64>,
    lss: u32,
    buffer: Buffer,
}

impl Fat {
    /// Builds a `Fat` over `store` (expected to be the volume the
    /// `boot_sector` was parsed from) and validates the media-descriptor
    /// byte against the BPB.
    pub fn new(store: &mut dyn SectorStore, boot_sector: &BootSector, main_fat: usize) -> Result<Self> {
        let fat_size = boot_sector.fat_size();
        let fat_count = (boot_sector.fat_region_size() / fat_size as u64) as u32;
        let fat_type = boot_sector.fat_type();

        let fat_starts: Vec<u64> = (0..fat_count as u64)
            .map(|i| boot_sector.fat_region_start() + i * fat_size as u64)
            .collect();

        let expected_entries = boot_sector.total_clusters() + 2;
        let read_max = bad_cluster(fat_type);
        if expected_entries as u64 > read_max as u64 + 1 {
            return Err(DiskError::Validation(format!(
                "total cluster count {} is greater than possible for {fat_type:?}",
                boot_sector.total_clusters()
            )));
        }

        let expected_fat_size_bytes =
            (expected_entries as u64 * fat_type.bits() as u64 - 1) / 8 + 1;
        let actual_fat_size_bytes = fat_size as u64 * boot_sector.lss() as u64;
        if actual_fat_size_bytes < expected_fat_size_bytes {
            return Err(DiskError::Validation(format!(
                "FAT is too small for total cluster count (expected at least {expected_fat_size_bytes} \
                 bytes, got {actual_fat_size_bytes} bytes)"
            )));
        }

        if main_fat >= fat_count as usize {
            return Err(DiskError::Validation(format!(
                "main FAT number must be in range (0, {})",
                fat_count.saturating_sub(1)
            )));
        }

        let mut fat = Fat {
            fat_type,
            entries: expected_entries,
            main_fat,
            fat_size,
            fat_starts,
            lss: boot_sector.lss(),
            buffer: Buffer {
                data: Vec::new(),
                sector_offset: None,
                dirty: false,
            },
        };
        fat.ensure_buffer(store, 0)?;

        let expected_media_type = boot_sector.bpb.media_type();
        let actual_media_type = (fat.get_raw(0) & 0xFF) as u8;
        if actual_media_type != expected_media_type {
            return Err(DiskError::Validation(
                "media descriptor in FAT does not match media descriptor in BPB".into(),
            ));
        }

        Ok(fat)
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn main_fat(&self) -> usize {
        self.main_fat
    }

    /// Number of entries (including the two reserved ones).
    pub fn len(&self) -> u32 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn check_cluster_key(&self, cluster: u32) -> Result<()> {
        if cluster >= self.entries {
            return Err(DiskError::OutOfBounds(format!(
                "cluster index must not exceed FAT bounds (0, {})",
                self.entries - 1
            )));
        }
        Ok(())
    }

    fn check_cluster_value(&self, value: u32) -> Result<()> {
        if value > eoc_cluster(self.fat_type) {
            return Err(DiskError::OutOfBounds(format!(
                "cluster value must be in range (0, {})",
                eoc_cluster(self.fat_type)
            )));
        }
        Ok(())
    }

    fn check_cluster_data_read(&self, cluster: u32) -> Result<()> {
        let read_max = self.entries - 1;
        if !(2..=read_max).contains(&cluster) {
            return Err(DiskError::OutOfBounds(format!(
                "cluster number for read must be in range (2, {read_max})"
            )));
        }
        Ok(())
    }

    /// Validates that `cluster` is writable with respect to this FAT's
    /// avoid-data boundary. Used by cluster-stream allocation before a
    /// newly-linked cluster is handed to a caller for data writes.
    pub(crate) fn check_cluster_data_write(&self, cluster: u32) -> Result<()> {
        let write_max = self.entries.min(avoid_data_cluster(self.fat_type)) - 1;
        if !(2..=write_max).contains(&cluster) {
            return Err(DiskError::OutOfBounds(format!(
                "cluster number for write must be in range (2, {write_max})"
            )));
        }
        Ok(())
    }

    fn sectors_per_buffer(&self) -> u32 {
        if self.fat_type == FatType::Fat12 {
            2
        } else {
            1
        }
    }

    fn ensure_buffer(&mut self, store: &mut dyn SectorStore, sector_offset: u32) -> Result<()> {
        if sector_offset >= self.fat_size {
            return Err(DiskError::OutOfBounds(format!(
                "offset {sector_offset} exceeds FAT size"
            )));
        }
        if self.buffer.sector_offset == Some(sector_offset) {
            return Ok(());
        }
        self.flush(store)?;

        let start_sector = self.fat_starts[self.main_fat];
        let sectors = self.sectors_per_buffer();
        let mut data = vec![0u8; (sectors * self.lss) as usize];
        store.read_bytes((start_sector + sector_offset as u64) * self.lss as u64, &mut data)?;
        self.buffer = Buffer {
            data,
            sector_offset: Some(sector_offset),
            dirty: false,
        };
        Ok(())
    }

    /// Writes the dirty buffer to every FAT copy, in order, then clears the
    /// dirty flag. A no-op if the buffer was never modified.
    pub fn flush(&mut self, store: &mut dyn SectorStore) -> Result<()> {
        if !self.buffer.dirty {
            return Ok(());
        }
        let sector_offset = self.buffer.sector_offset.expect("dirty buffer must be loaded");
        for &fat_start in &self.fat_starts {
            store.write_bytes(
                (fat_start + sector_offset as u64) * self.lss as u64,
                &self.buffer.data,
            )?;
        }
        self.buffer.dirty = false;
        Ok(())
    }

    fn io_info(&self, key: u32) -> (u32, usize, usize) {
        let (bytes_offset, byte_count): (u32, usize) = match self.fat_type {
            FatType::Fat12 => (key + key / 2, 2),
            FatType::Fat16 => (key * 2, 2),
            FatType::Fat32 => (key * 4, 4),
        };
        let sector_offset = bytes_offset / self.lss;
        let bytes_offset_sector = (bytes_offset % self.lss) as usize;
        (sector_offset, bytes_offset_sector, byte_count)
    }

    fn get_raw(&self, key: u32) -> u32 {
        let (_, off, count) = self.io_info(key);
        let mut bytes = [0u8; 4];
        bytes[..count].copy_from_slice(&self.buffer.data[off..off + count]);
        let value = u32::from_le_bytes(bytes);
        match self.fat_type {
            FatType::Fat12 => {
                if key & 1 != 0 {
                    value >> 4
                } else {
                    value & 0x0FFF
                }
            }
            FatType::Fat32 => value & 0x0FFF_FFFF,
            FatType::Fat16 => value,
        }
    }

    /// Reads the FAT entry with index `key`.
    pub fn get(&mut self, store: &mut dyn SectorStore, key: u32) -> Result<u32> {
        self.check_cluster_key(key)?;
        let (sector_offset, _, _) = self.io_info(key);
        self.ensure_buffer(store, sector_offset)?;
        Ok(self.get_raw(key))
    }

    /// Sets the value of the FAT entry with index `key`.
    pub fn set(&mut self, store: &mut dyn SectorStore, key: u32, value: u32) -> Result<()> {
        if !store.writable() {
            return Err(DiskError::PermissionDenied("volume is read-only".into()));
        }
        self.check_cluster_key(key)?;
        self.check_cluster_value(value)?;
        let (sector_offset, off, count) = self.io_info(key);
        self.ensure_buffer(store, sector_offset)?;

        let value = match self.fat_type {
            FatType::Fat12 => {
                let mut old_bytes = [0u8; 2];
                old_bytes.copy_from_slice(&self.buffer.data[off..off + 2]);
                let old = u16::from_le_bytes(old_bytes) as u32;
                if key & 1 != 0 {
                    (old & 0x000F) | (value << 4)
                } else {
                    (old & 0xF000) | (value & 0x0FFF)
                }
            }
            FatType::Fat32 => {
                let mut old_bytes = [0u8; 4];
                old_bytes.copy_from_slice(&self.buffer.data[off..off + 4]);
                let old = u32::from_le_bytes(old_bytes);
                (old & 0xF000_0000) | value
            }
            FatType::Fat16 => value,
        };

        let bytes = value.to_le_bytes();
        self.buffer.data[off..off + count].copy_from_slice(&bytes[..count]);
        self.buffer.dirty = true;
        Ok(())
    }

    pub fn set_eoc(&mut self, store: &mut dyn SectorStore, key: u32) -> Result<()> {
        let eoc = eoc_cluster(self.fat_type);
        self.set(store, key, eoc)
    }

    pub fn set_empty(&mut self, store: &mut dyn SectorStore, key: u32) -> Result<()> {
        self.set(store, key, CLUSTER_EMPTY)
    }

    /// Walks the cluster chain starting at `start_cluster`, returning the
    /// full (non-cyclic) sequence of clusters visited. The chain terminates
    /// when a value outside `(RESERVED, bad_cluster]` is reached.
    pub fn get_chain(&mut self, store: &mut dyn SectorStore, start_cluster: u32) -> Result<Vec<u32>> {
        let bad = bad_cluster(self.fat_type);
        let mut chain = Vec::new();
        let mut cluster = start_cluster;
        while CLUSTER_RESERVED < cluster && cluster <= bad {
            self.check_cluster_data_read(cluster)?;
            chain.push(cluster);
            cluster = self.get(store, cluster)?;
        }
        Ok(chain)
    }

    /// Scans from cluster 0 upward, returning the numbers of the next
    /// `count` free clusters, or `FilesystemLimit` if the scan runs past
    /// the avoid-data sentinel before finding enough.
    pub fn next_free_clusters(&mut self, store: &mut dyn SectorStore, count: u32) -> Result<Vec<u32>> {
        let avoid_data = avoid_data_cluster(self.fat_type);
        let mut found = Vec::new();
        for key in 0..self.entries {
            if found.len() as u32 == count {
                return Ok(found);
            }
            if key >= avoid_data {
                break;
            }
            if self.get(store, key)? == CLUSTER_EMPTY {
                found.push(key);
            }
        }
        if found.len() as u32 == count {
            Ok(found)
        } else {
            Err(DiskError::FilesystemLimit(
                "not enough free clusters available".into(),
            ))
        }
    }

    pub fn free_clusters(&mut self, store: &mut dyn SectorStore) -> Result<u32> {
        let mut count = 0;
        for key in 0..self.entries {
            if self.get(store, key)? == CLUSTER_EMPTY {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::reserved::BOOT_SECTOR_SIZE;
    use crate::sector::MemStorage;
    use crate::util::codec::put_le;

    fn fat16_image() -> (MemStorage, BootSector) {
        let lss = 512u32;
        let total_size: u16 = 8192;
        let mut boot = [0u8; BOOT_SECTOR_SIZE];
        boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        boot[3..11].copy_from_slice(b"MSDOS5.0");
        put_le!(boot, 11, lss as u16);
        boot[13] = 4; // cluster_size
        put_le!(boot, 14, 4u16); // reserved_size
        boot[16] = 2; // fat_count
        put_le!(boot, 17, 512u16); // rootdir_entries
        put_le!(boot, 19, total_size);
        boot[21] = 0xF8;
        put_le!(boot, 22, 8u16); // fat_size_200
        put_le!(boot, 24, 63u16);
        put_le!(boot, 26, 255u16);
        put_le!(boot, 28, 0u32);
        put_le!(boot, 32, 0u32);
        boot[36] = 0x80;
        boot[37] = 0;
        boot[38] = 0x29;
        put_le!(boot, 39, 0xDEADBEEFu32);
        boot[43..54].copy_from_slice(b"NO NAME    ");
        boot[54..62].copy_from_slice(b"FAT16   ");
        put_le!(boot, 510, 0xAA55u16);

        let (bs, _) = BootSector::parse(&boot).unwrap();

        let mut store = MemStorage::new(total_size as u64 * lss as u64, crate::sector::SectorSize::uniform(lss).unwrap());
        store.write_bytes(0, &boot).unwrap();
        // first FAT entry's low byte must match media_type
        let fat_region_start = bs.fat_region_start() * lss as u64;
        store.write_bytes(fat_region_start, &[0xF8, 0xFF, 0xFF, 0xFF]).unwrap();
        (store, bs)
    }

    #[test]
    fn reads_media_descriptor_and_validates() {
        let (mut store, bs) = fat16_image();
        let fat = Fat::new(&mut store, &bs, 0).unwrap();
        assert_eq!(fat.fat_type(), FatType::Fat16);
    }

    #[test]
    fn set_and_get_round_trip_across_fat_copies() {
        let (mut store, bs) = fat16_image();
        let mut fat = Fat::new(&mut store, &bs, 0).unwrap();
        fat.set(&mut store, 2, 0x1234).unwrap();
        fat.flush(&mut store).unwrap();
        assert_eq!(fat.get(&mut store, 2).unwrap(), 0x1234);

        // second FAT copy should carry the same write
        let second_fat_start = bs.fat_region_start() + bs.fat_size() as u64;
        let mut buf = [0u8; 2];
        store
            .read_bytes((second_fat_start * bs.lss() as u64) + 2 * 2, &mut buf)
            .unwrap();
        assert_eq!(u16::from_le_bytes(buf), 0x1234);
    }

    #[test]
    fn chain_terminates_at_eoc() {
        let (mut store, bs) = fat16_image();
        let mut fat = Fat::new(&mut store, &bs, 0).unwrap();
        fat.set(&mut store, 2, 3).unwrap();
        fat.set(&mut store, 3, 4).unwrap();
        fat.set_eoc(&mut store, 4).unwrap();
        fat.flush(&mut store).unwrap();
        let chain = fat.get_chain(&mut store, 2).unwrap();
        assert_eq!(chain, vec![2, 3, 4]);
    }

    #[test]
    fn next_free_clusters_skips_allocated() {
        let (mut store, bs) = fat16_image();
        let mut fat = Fat::new(&mut store, &bs, 0).unwrap();
        fat.set(&mut store, 2, 0xFFFF).unwrap();
        let free = fat.next_free_clusters(&mut store, 2).unwrap();
        assert_eq!(free, vec![3, 4]);
    }

    #[test]
    fn next_free_clusters_raises_filesystem_limit() {
        let (mut store, bs) = fat16_image();
        let mut fat = Fat::new(&mut store, &bs, 0).unwrap();
        let too_many = fat.len() + 10;
        assert!(matches!(
            fat.next_free_clusters(&mut store, too_many),
            Err(DiskError::FilesystemLimit(_))
        ));
    }
}
