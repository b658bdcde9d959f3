//! Cluster-chain and root-directory-region byte streams (spec §4.6).
//!
//! Grounded in `examples/original_source/diskfs/fat/io.py`'s `_InternalIO`
//! base plus its `DataIO`/`RootdirIO` subclasses. The shared seek/read/write/
//! truncate logic lives in the free functions below; `allocate`/`free`/
//! `read_units`/`write_units` are the two concrete units (cluster vs.
//! logical sector), implemented as the [`Unit`] trait -- playing the role
//! the Python base class's abstract methods play, without inheritance.
//!
//! Every method here takes the backing [`SectorStore`] (and, for
//! [`DataIo`], the [`Fat`]) as an explicit parameter rather than storing a
//! reference, so [`FileSystem`](super::filesystem::FileSystem) can remain
//! the sole long-term owner of both.

use chrono::NaiveDateTime;

use crate::error::{DiskError, Result};
use crate::fat::fat::Fat;
use crate::fat::reserved::BootSector;
use crate::sector::SectorStore;

/// Reads `count` logical sectors starting at sector `start` from `store`.
fn read_sectors(store: &mut dyn SectorStore, start: u64, buf: &mut [u8]) -> Result<()> {
    let lss = store.sector_size().logical as u64;
    store.read_bytes(start * lss, buf)
}

/// Writes `buf` (a whole number of logical sectors) starting at sector
/// `start` on `store`.
fn write_sectors(store: &mut dyn SectorStore, start: u64, buf: &[u8]) -> Result<()> {
    let lss = store.sector_size().logical as u64;
    store.write_bytes(start * lss, buf)
}

/// A concrete backing unit (cluster or logical sector) for the shared
/// seek/read/write/truncate logic below.
trait Unit {
    fn unit_size(&self) -> u64;
    fn size(&self) -> u64;

    fn allocate(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, min_size: u64) -> Result<u64>;
    fn free(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, max_size: u64) -> Result<u64>;
    fn read_units(&mut self, store: &mut dyn SectorStore, pos: u64, count: u64) -> Result<Vec<u8>>;
    fn write_units(&mut self, store: &mut dyn SectorStore, pos: u64, buf: &[u8]) -> Result<()>;
}

/// Shared position/size bookkeeping and byte-range-to-unit-range translation
/// for a unit-addressed region, independent of whether the unit is a cluster
/// or a logical sector.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    pos: u64,
}

impl Cursor {
    fn seek(&mut self, offset: i64, whence: Whence, size: u64) -> Result<u64> {
        self.pos = match whence {
            Whence::Start => {
                if offset < 0 {
                    return Err(DiskError::Validation(format!("negative seek position {offset}")));
                }
                offset as u64
            }
            Whence::Current => (self.pos as i64 + offset).max(0) as u64,
            Whence::End => (size as i64 + offset).max(0) as u64,
        };
        Ok(self.pos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

fn read_impl(
    unit: &mut dyn Unit,
    store: &mut dyn SectorStore,
    cursor: &mut Cursor,
    buf: &mut [u8],
) -> Result<usize> {
    let size = unit.size();
    if buf.is_empty() || cursor.pos >= size {
        return Ok(0);
    }
    let want = (buf.len() as u64).min(size - cursor.pos);
    let stop = cursor.pos + want;
    let unit_size = unit.unit_size();

    let start_unit = cursor.pos / unit_size;
    let stop_unit = (stop - 1) / unit_size + 1;
    let units = stop_unit - start_unit;

    let b_start = (cursor.pos % unit_size) as usize;
    let data = unit.read_units(store, start_unit, units)?;

    let n = want as usize;
    buf[..n].copy_from_slice(&data[b_start..b_start + n]);
    cursor.pos += want;
    Ok(n)
}

fn write_impl(
    unit: &mut dyn Unit,
    store: &mut dyn SectorStore,
    fat: &mut Fat,
    cursor: &mut Cursor,
    buf: &[u8],
) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let size = buf.len() as u64;
    let stop = cursor.pos + size;
    unit.allocate(store, fat, stop)?;

    let unit_size = unit.unit_size();
    let start_unit = cursor.pos / unit_size;
    let stop_unit = (stop - 1) / unit_size + 1;
    let units = stop_unit - start_unit;
    let b_start = (cursor.pos % unit_size) as usize;

    let to_write: Vec<u8> = if b_start == 0 && size % unit_size == 0 {
        buf.to_vec()
    } else if units == 1 {
        let mut unit_bytes = unit.read_units(store, start_unit, 1)?;
        unit_bytes.splice(b_start..b_start + buf.len(), buf.iter().copied());
        unit_bytes
    } else {
        let first_unit = unit.read_units(store, start_unit, 1)?;
        let last_unit = unit.read_units(store, stop_unit - 1, 1)?;
        let keep_last_unit = ((b_start as u64 + size) % unit_size) as usize;
        let mut out = Vec::with_capacity(first_unit[..b_start].len() + buf.len() + last_unit[keep_last_unit..].len());
        out.extend_from_slice(&first_unit[..b_start]);
        out.extend_from_slice(buf);
        out.extend_from_slice(&last_unit[keep_last_unit..]);
        out
    };

    unit.write_units(store, start_unit, &to_write)?;
    cursor.pos += size;
    Ok(buf.len())
}

fn truncate_impl(
    unit: &mut dyn Unit,
    store: &mut dyn SectorStore,
    fat: &mut Fat,
    cursor: &Cursor,
    size: Option<u64>,
) -> Result<u64> {
    let size = size.unwrap_or(cursor.pos);
    let current = unit.size();
    if size > current {
        unit.allocate(store, fat, size)?;
    } else if size < current {
        unit.free(store, fat, size)?;
    }
    Ok(size)
}

/// Cluster-chain byte stream: a file's data, a subdirectory's entries, or
/// (on FAT32) the root directory's entries.
#[derive(Debug)]
pub struct DataIo {
    chain: Vec<u32>,
    cluster_size_bytes: u64,
    cluster_size_sectors: u64,
    total_clusters: u32,
    region_start: u64,
    cursor: Cursor,
    size: u64,
    fd_count: u32,
    last_read: Option<NaiveDateTime>,
    last_write: Option<NaiveDateTime>,
}

impl DataIo {
    fn build(
        fat: &mut Fat,
        store: &mut dyn SectorStore,
        boot_sector: &BootSector,
        start_cluster: u32,
        size_override: Option<u64>,
    ) -> Result<Self> {
        let cluster_size_sectors = boot_sector.cluster_size();
        let cluster_size_bytes = cluster_size_sectors * boot_sector.lss() as u64;
        let chain = fat.get_chain(store, start_cluster)?;
        let size = size_override.unwrap_or(chain.len() as u64 * cluster_size_bytes);

        Ok(DataIo {
            chain,
            cluster_size_bytes,
            cluster_size_sectors,
            total_clusters: boot_sector.total_clusters(),
            region_start: boot_sector.data_region_start(),
            cursor: Cursor::default(),
            size,
            fd_count: 0,
            last_read: None,
            last_write: None,
        })
    }

    /// Opens the cluster chain backing a file or subdirectory's `entry`.
    pub fn for_entry(
        fat: &mut Fat,
        store: &mut dyn SectorStore,
        boot_sector: &BootSector,
        entry: &super::directory::Entry,
        fat_32: bool,
    ) -> Result<Self> {
        let start_cluster = entry.cluster();
        let is_dir = entry.attributes().contains(super::directory::Attributes::SUBDIRECTORY);
        let size_override = if is_dir { None } else { Some(entry.size() as u64) };
        let mut io = Self::build(fat, store, boot_sector, start_cluster, size_override)?;
        if is_dir {
            io.size = io.chain.len() as u64 * io.cluster_size_bytes;
        }
        let _ = fat_32;
        Ok(io)
    }

    /// Opens the FAT32 root directory's cluster chain, starting at cluster 2.
    pub fn for_root(fat: &mut Fat, store: &mut dyn SectorStore, boot_sector: &BootSector) -> Result<Self> {
        Self::build(fat, store, boot_sector, 2, None)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn unit_size(&self) -> u64 {
        self.cluster_size_bytes
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.cursor.seek(offset, whence, self.size)
    }

    pub fn position(&self) -> u64 {
        self.cursor.pos
    }

    pub fn read(&mut self, store: &mut dyn SectorStore, buf: &mut [u8], now: NaiveDateTime) -> Result<usize> {
        let mut cursor = self.cursor;
        let n = read_impl(self, store, &mut cursor, buf)?;
        self.cursor = cursor;
        if n > 0 {
            self.last_read = Some(now);
        }
        Ok(n)
    }

    pub fn write(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, buf: &[u8], now: NaiveDateTime) -> Result<usize> {
        if !store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        let mut cursor = self.cursor;
        let n = write_impl(self, store, fat, &mut cursor, buf)?;
        self.cursor = cursor;
        if n > 0 {
            self.last_write = Some(now);
        }
        Ok(n)
    }

    pub fn truncate(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, size: Option<u64>) -> Result<u64> {
        if !store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        let cursor = self.cursor;
        truncate_impl(self, store, fat, &cursor, size)
    }

    pub fn increment_fd_count(&mut self) {
        self.fd_count += 1;
    }

    pub fn decrement_fd_count(&mut self) -> Result<()> {
        if self.fd_count == 0 {
            return Err(DiskError::Validation("count of file descriptors cannot be less than 0".into()));
        }
        self.fd_count -= 1;
        Ok(())
    }

    pub fn fd_count(&self) -> u32 {
        self.fd_count
    }

    pub fn last_read(&self) -> Option<NaiveDateTime> {
        self.last_read
    }

    pub fn last_write(&self) -> Option<NaiveDateTime> {
        self.last_write
    }

    pub fn start_cluster(&self) -> u32 {
        self.chain.first().copied().unwrap_or(0)
    }

    fn check_cluster(&self, cluster: u32) -> Result<()> {
        if (cluster as i64 - 2) < 0 || (cluster as i64 - 2) >= self.total_clusters as i64 {
            return Err(DiskError::Validation(format!("invalid cluster number {cluster} in chain")));
        }
        Ok(())
    }
}

impl Unit for DataIo {
    fn unit_size(&self) -> u64 {
        self.cluster_size_bytes
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn allocate(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, min_size: u64) -> Result<u64> {
        if min_size <= self.size {
            return Ok(0);
        }

        let clusters_required = (min_size - 1) / self.cluster_size_bytes + 1;
        let to_allocate = clusters_required as i64 - self.chain.len() as i64;
        if to_allocate <= 0 {
            self.size = min_size;
            return Ok(0);
        }

        let new_clusters = fat.next_free_clusters(store, to_allocate as u32)?;

        if let Some(&last_cluster) = self.chain.last() {
            fat.set(store, last_cluster, new_clusters[0])?;
        }

        let mut last = new_clusters[0];
        for &cluster in &new_clusters[1..] {
            fat.set(store, last, cluster)?;
            last = cluster;
        }
        fat.set_eoc(store, *new_clusters.last().unwrap())?;
        fat.flush(store)?;

        let old_chain_len = self.chain.len() as u64;
        self.chain.extend(&new_clusters);
        let zero_cluster = vec![0u8; self.cluster_size_bytes as usize];

        for cluster_index in old_chain_len..clusters_required {
            self.write_units(store, cluster_index, &zero_cluster)?;
        }

        self.size = min_size;
        Ok(to_allocate as u64)
    }

    fn free(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, max_size: u64) -> Result<u64> {
        if max_size >= self.size {
            return Ok(0);
        }

        let clusters_required = if max_size == 0 { 0 } else { (max_size - 1) / self.cluster_size_bytes + 1 };
        let to_free = self.chain.len() as i64 - clusters_required as i64;
        if to_free <= 0 {
            self.size = max_size;
            return Ok(0);
        }
        let to_free = to_free as usize;

        let split_at = self.chain.len() - to_free;
        let old_clusters: Vec<u32> = self.chain.split_off(split_at);

        if let Some(&last_cluster) = self.chain.last() {
            fat.set_eoc(store, last_cluster)?;
        }
        for cluster in old_clusters {
            fat.set_empty(store, cluster)?;
        }
        fat.flush(store)?;

        self.size = max_size;
        Ok(to_free as u64)
    }

    fn read_units(&mut self, store: &mut dyn SectorStore, pos: u64, count: u64) -> Result<Vec<u8>> {
        if count == 0 {
            return Err(DiskError::Validation("cluster count must be greater than 0".into()));
        }
        if pos + count > self.chain.len() as u64 {
            return Err(DiskError::Validation("not enough clusters in chain to read from".into()));
        }

        let mut out = Vec::with_capacity((count * self.cluster_size_bytes) as usize);
        for &cluster in &self.chain[pos as usize..(pos + count) as usize] {
            self.check_cluster(cluster)?;
            let start_sector = self.region_start + (cluster as u64 - 2) * self.cluster_size_sectors;
            let mut buf = vec![0u8; self.cluster_size_bytes as usize];
            read_sectors(store, start_sector, &mut buf)?;
            out.extend_from_slice(&buf);
        }
        Ok(out)
    }

    fn write_units(&mut self, store: &mut dyn SectorStore, pos: u64, buf: &[u8]) -> Result<()> {
        if buf.len() as u64 % self.cluster_size_bytes != 0 {
            return Err(DiskError::Validation(format!(
                "bytes to write must be a multiple of {} long, got {} bytes",
                self.cluster_size_bytes,
                buf.len()
            )));
        }
        let count = buf.len() as u64 / self.cluster_size_bytes;
        if count == 0 {
            return Ok(());
        }
        if pos + count > self.chain.len() as u64 {
            return Err(DiskError::Validation("not enough clusters in chain to write to".into()));
        }

        for (i, &cluster) in self.chain[pos as usize..(pos + count) as usize].iter().enumerate() {
            self.check_cluster(cluster)?;
            let start_sector = self.region_start + (cluster as u64 - 2) * self.cluster_size_sectors;
            let part = &buf[i * self.cluster_size_bytes as usize..(i + 1) * self.cluster_size_bytes as usize];
            write_sectors(store, start_sector, part)?;
        }
        Ok(())
    }
}

/// Fixed-size logical-sector-granular root directory region IO, used for
/// FAT12/16 volumes where the root directory isn't a cluster chain.
#[derive(Debug)]
pub struct RootdirIo {
    start: u64,
    lss: u64,
    cursor: Cursor,
    size: u64,
}

impl RootdirIo {
    pub fn new(boot_sector: &BootSector) -> Self {
        let lss = boot_sector.lss() as u64;
        RootdirIo {
            start: boot_sector.rootdir_region_start(),
            lss,
            cursor: Cursor::default(),
            size: boot_sector.rootdir_region_size() * lss,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.cursor.seek(offset, whence, self.size)
    }

    pub fn position(&self) -> u64 {
        self.cursor.pos
    }

    pub fn read(&mut self, store: &mut dyn SectorStore, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = self.cursor;
        let n = read_impl(self, store, &mut cursor, buf)?;
        self.cursor = cursor;
        Ok(n)
    }

    pub fn write(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, buf: &[u8]) -> Result<usize> {
        if !store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        let mut cursor = self.cursor;
        let n = write_impl(self, store, fat, &mut cursor, buf)?;
        self.cursor = cursor;
        Ok(n)
    }
}

impl Unit for RootdirIo {
    fn unit_size(&self) -> u64 {
        self.lss
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn allocate(&mut self, _store: &mut dyn SectorStore, _fat: &mut Fat, min_size: u64) -> Result<u64> {
        if min_size > self.size {
            return Err(DiskError::FilesystemLimit("maximum capacity of root directory reached".into()));
        }
        Ok(0)
    }

    fn free(&mut self, _store: &mut dyn SectorStore, _fat: &mut Fat, _max_size: u64) -> Result<u64> {
        Err(DiskError::UnsupportedOperation("root directory region cannot be truncated".into()))
    }

    fn read_units(&mut self, store: &mut dyn SectorStore, pos: u64, count: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (count * self.lss) as usize];
        read_sectors(store, self.start + pos, &mut buf)?;
        Ok(buf)
    }

    fn write_units(&mut self, store: &mut dyn SectorStore, pos: u64, buf: &[u8]) -> Result<()> {
        write_sectors(store, self.start + pos, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::reserved::BootSector;
    use crate::sector::{MemStorage, SectorSize};

    fn fat16_image() -> (MemStorage, BootSector) {
        let lss = 512u32;
        let sector_size = SectorSize::uniform(lss).unwrap();
        let total_sectors: u32 = 8192;
        let mut store = MemStorage::new(total_sectors as u64 * lss as u64, sector_size);

        let mut buf = [0u8; 512];
        buf[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        buf[3..11].copy_from_slice(b"MSDOS5.0");
        crate::util::codec::put_le!(buf, 11u16, lss as u16);
        buf[13] = 4; // sectors per cluster
        crate::util::codec::put_le!(buf, 14u16, 4u16); // reserved sectors
        buf[16] = 2; // num fats
        crate::util::codec::put_le!(buf, 17u16, 512u16); // rootdir entries
        crate::util::codec::put_le!(buf, 19u16, total_sectors as u16);
        buf[21] = 0xF8;
        crate::util::codec::put_le!(buf, 22u16, 32u16); // fat size 16
        crate::util::codec::put_le!(buf, 24u16, 63u16);
        crate::util::codec::put_le!(buf, 26u16, 255u16);
        crate::util::codec::put_le!(buf, 28u32, 0u32);
        crate::util::codec::put_le!(buf, 32u32, 0u32);
        buf[36] = 0x80;
        buf[37] = 0;
        buf[38] = 0x29;
        crate::util::codec::put_le!(buf, 39u32, 0x1234_5678u32);
        buf[43..54].copy_from_slice(b"NO NAME    ");
        buf[54..62].copy_from_slice(b"FAT16   ");
        buf[510] = 0x55;
        buf[511] = 0xAA;

        store.write_bytes(0, &buf).unwrap();
        let (boot_sector, _) = BootSector::parse(&buf).unwrap();
        store.write_bytes(boot_sector.fat_region_start() * lss as u64, &[0xF8, 0xFF, 0xFF]).unwrap();
        (store, boot_sector)
    }

    #[test]
    fn rootdir_io_rejects_overflow() {
        let (mut store, boot_sector) = fat16_image();
        let mut fat = Fat::new(&mut store, &boot_sector, 0).unwrap();
        let mut io = RootdirIo::new(&boot_sector);
        let result = Unit::allocate(&mut io, &mut store, &mut fat, io.size() + 1);
        assert!(matches!(result, Err(DiskError::FilesystemLimit(_))));
    }

    #[test]
    fn data_io_allocates_and_zero_fills_new_clusters() {
        let (mut store, boot_sector) = fat16_image();
        let mut fat = Fat::new(&mut store, &boot_sector, 0).unwrap();
        let mut io = DataIo::build(&mut fat, &mut store, &boot_sector, 0, Some(0)).unwrap();
        let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let payload = vec![0xAB; io.unit_size() as usize];
        io.write(&mut store, &mut fat, &payload, now).unwrap();
        assert_eq!(io.size(), payload.len() as u64);
        assert_eq!(io.last_write(), Some(now));

        io.seek(0, Whence::Start).unwrap();
        let mut readback = vec![0u8; payload.len()];
        io.read(&mut store, &mut readback, now).unwrap();
        assert_eq!(readback, payload);
        assert_eq!(io.last_read(), Some(now));
    }

    #[test]
    fn data_io_truncate_frees_clusters() {
        let (mut store, boot_sector) = fat16_image();
        let mut fat = Fat::new(&mut store, &boot_sector, 0).unwrap();
        let mut io = DataIo::build(&mut fat, &mut store, &boot_sector, 0, Some(0)).unwrap();
        let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let payload = vec![0u8; io.unit_size() as usize * 2];
        io.write(&mut store, &mut fat, &payload, now).unwrap();
        assert_eq!(io.chain.len(), 2);

        io.truncate(&mut store, &mut fat, Some(io.unit_size())).unwrap();
        assert_eq!(io.chain.len(), 1);
    }
}
