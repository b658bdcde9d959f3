//! `SectorStore`: positional, sector-granular byte I/O over a backing file or
//! block device.
//!
//! Generalizes the teacher's `Storage` trait (`examples/rrbutani-fatfs/src/storage.rs`)
//! away from a `typenum`-const-generic, fixed-512-byte-sector design to a
//! runtime-valued [`SectorSize`], since this crate must support FAT volumes
//! (and disks) with logical sector sizes other than 512.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{DiskError, Result};

/// Logical and physical sector size of a disk. Logical is the addressing
/// unit for every `SectorStore` method; physical is advisory only, used to
/// emit alignment warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorSize {
    pub logical: u32,
    pub physical: u32,
}

impl SectorSize {
    pub fn new(logical: u32, physical: u32) -> Result<Self> {
        if !crate::util::is_power_of_two(logical as u64) {
            return Err(DiskError::Validation(format!(
                "logical sector size {logical} is not a power of two"
            )));
        }
        if !crate::util::is_power_of_two(physical as u64) {
            return Err(DiskError::Validation(format!(
                "physical sector size {physical} is not a power of two"
            )));
        }
        Ok(Self { logical, physical })
    }

    /// A `SectorSize` where physical equals logical (the common case for
    /// disk images and most USB/SSD media).
    pub fn uniform(size: u32) -> Result<Self> {
        Self::new(size, size)
    }
}

/// Device properties reported by the OS collaborator surface (spec §6).
/// Entirely best-effort: every field may be `None` when the platform can't
/// answer, or when the backing store isn't a real device at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties {
    pub removable: Option<bool>,
    pub vendor: Option<String>,
    pub model: Option<String>,
}

/// Platform-specific collaborator, deliberately out of the core per spec §1.
/// `FileStorage` delegates device-geometry queries and partition-table
/// re-reads here; tests and non-Unix hosts can supply a stub.
pub trait PlatformOps: std::fmt::Debug {
    /// Size of the backing device in bytes, if it can be queried without
    /// just calling `File::metadata`.
    fn device_size(&self, _file: &File) -> Option<u64> {
        None
    }

    /// `(logical, physical)` sector size as reported by the device, if any.
    fn device_sector_size(&self, _file: &File) -> Option<(u32, u32)> {
        None
    }

    /// Ask the kernel to re-read the partition table after we've written a
    /// new one. A no-op for regular files.
    fn reread_partition_table(&self, _file: &File) -> Result<()> {
        Ok(())
    }

    fn device_properties(&self, _file: &File, _path: &Path) -> DeviceProperties {
        DeviceProperties::default()
    }
}

/// Default `PlatformOps`: answers every geometry query with `None` and lets
/// callers fall back to `File::metadata` / an explicit sector size. The
/// `unix` submodule below provides a best-effort real implementation for
/// block devices; non-Unix hosts (and plain disk-image files everywhere)
/// are well served by this default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatformOps;

impl PlatformOps for NullPlatformOps {}

#[cfg(unix)]
pub mod unix {
    //! Best-effort Linux/BSD block-device probing via `ioctl`s. This is the
    //! one part of the crate that is inherently platform-specific; spec §1
    //! calls it out explicitly as an external collaborator, not core.

    use super::*;
    use std::os::unix::io::AsRawFd;

    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnixPlatformOps;

    // Mirrors the ioctls that `blockdev`/`fdisk` use; numbers are from
    // `linux/fs.h` and `linux/hdreg.h`.
    const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;
    const BLKSSZGET: libc::c_ulong = 0x1268;
    const BLKPBSZGET: libc::c_ulong = 0x127b;
    const BLKRRPART: libc::c_ulong = 0x125f;

    unsafe fn ioctl_u64(fd: i32, req: libc::c_ulong) -> Option<u64> {
        let mut val: u64 = 0;
        let ret = libc::ioctl(fd, req as _, &mut val as *mut u64);
        if ret == 0 {
            Some(val)
        } else {
            None
        }
    }

    unsafe fn ioctl_u32(fd: i32, req: libc::c_ulong) -> Option<u32> {
        let mut val: libc::c_int = 0;
        let ret = libc::ioctl(fd, req as _, &mut val as *mut libc::c_int);
        if ret == 0 {
            Some(val as u32)
        } else {
            None
        }
    }

    impl PlatformOps for UnixPlatformOps {
        fn device_size(&self, file: &File) -> Option<u64> {
            unsafe { ioctl_u64(file.as_raw_fd(), BLKGETSIZE64) }
        }

        fn device_sector_size(&self, file: &File) -> Option<(u32, u32)> {
            let fd = file.as_raw_fd();
            unsafe {
                let logical = ioctl_u32(fd, BLKSSZGET)?;
                let physical = ioctl_u32(fd, BLKPBSZGET).unwrap_or(logical);
                Some((logical, physical))
            }
        }

        fn reread_partition_table(&self, file: &File) -> Result<()> {
            let fd = file.as_raw_fd();
            let ret = unsafe { libc::ioctl(fd, BLKRRPART as _, 0) };
            if ret == 0 {
                Ok(())
            } else {
                // Not fatal: plenty of hosts (loopback devices, containers)
                // refuse this ioctl on otherwise-healthy block devices.
                log::warn!("BLKRRPART failed: {}", std::io::Error::last_os_error());
                Ok(())
            }
        }

        fn device_properties(&self, _file: &File, path: &Path) -> DeviceProperties {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let sys = Path::new("/sys/class/block").join(name);
            let read_trim = |p: &Path| -> Option<String> {
                std::fs::read_to_string(p).ok().map(|s| s.trim().to_string())
            };
            DeviceProperties {
                removable: read_trim(&sys.join("removable")).map(|s| s == "1"),
                vendor: read_trim(&sys.join("device/vendor")),
                model: read_trim(&sys.join("device/model")),
            }
        }
    }
}

/// A positional, sector-granular byte store. Implementors need not track a
/// cursor: every call is addressed explicitly.
pub trait SectorStore: std::fmt::Debug {
    /// Total size of the store in bytes.
    fn size_bytes(&self) -> u64;

    /// Logical/physical sector size.
    fn sector_size(&self) -> SectorSize;

    /// Whether this store accepts writes.
    fn writable(&self) -> bool;

    /// Reads exactly `buf.len()` bytes starting at byte offset `offset`.
    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` at byte offset `offset`.
    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Forces any buffered writes out to the backing medium.
    fn flush(&mut self) -> Result<()>;

    /// True if this store is backed by a real block device (as opposed to
    /// a plain regular file / disk image).
    fn is_block_device(&self) -> bool {
        false
    }

    /// Ask the OS to re-read the partition table. A no-op unless
    /// `is_block_device()`.
    fn reread_partition_table(&mut self) -> Result<()> {
        Ok(())
    }

    fn device_properties(&self) -> DeviceProperties {
        DeviceProperties::default()
    }
}

/// A `SectorStore` backed by a `std::fs::File` -- a regular disk-image file
/// or (on Unix) a raw block-device special file.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    size_bytes: u64,
    sector_size: SectorSize,
    writable: bool,
    is_block_device: bool,
    platform: Box<dyn PlatformOps>,
    path: std::path::PathBuf,
}

fn default_platform_ops() -> Box<dyn PlatformOps> {
    #[cfg(unix)]
    {
        Box::new(unix::UnixPlatformOps)
    }
    #[cfg(not(unix))]
    {
        Box::new(NullPlatformOps)
    }
}

impl FileStorage {
    /// Opens an existing file or block device.
    ///
    /// If `sector_size` is `None`, it is queried from the device (falling
    /// back to 512 bytes for regular files, where there is no intrinsic
    /// sector size).
    pub fn open<P: AsRef<Path>>(
        path: P,
        sector_size: Option<SectorSize>,
        readonly: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(!readonly)
            .open(&path)?;

        let platform = default_platform_ops();
        let metadata = file.metadata()?;
        let is_block_device = is_block_device(&metadata);

        let size_bytes = if is_block_device {
            platform
                .device_size(&file)
                .unwrap_or_else(|| metadata.len())
        } else {
            metadata.len()
        };

        let sector_size = match sector_size {
            Some(s) => s,
            None => {
                if is_block_device {
                    if let Some((l, p)) = platform.device_sector_size(&file) {
                        SectorSize::new(l, p)?
                    } else {
                        SectorSize::uniform(512)?
                    }
                } else {
                    SectorSize::uniform(512)?
                }
            }
        };

        Ok(Self {
            file,
            size_bytes,
            sector_size,
            writable: !readonly,
            is_block_device,
            platform,
            path,
        })
    }

    /// Creates a new disk-image file of `size_bytes`, zero-filled.
    pub fn create<P: AsRef<Path>>(
        path: P,
        size_bytes: u64,
        sector_size: SectorSize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size_bytes)?;

        Ok(Self {
            file,
            size_bytes,
            sector_size,
            writable: true,
            is_block_device: false,
            platform: default_platform_ops(),
            path,
        })
    }

    fn check_bounds(&self, offset: u64, len: u64) -> Result<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.size_bytes) {
            return Err(DiskError::OutOfBounds(format!(
                "range {offset}..{} exceeds device size {}",
                offset + len,
                self.size_bytes
            )));
        }
        Ok(())
    }
}

fn is_block_device(metadata: &std::fs::Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        metadata.file_type().is_block_device()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        false
    }
}

impl SectorStore for FileStorage {
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, buf.len() as u64)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(DiskError::PermissionDenied(
                "store was opened read-only".into(),
            ));
        }
        self.check_bounds(offset, buf.len() as u64)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn is_block_device(&self) -> bool {
        self.is_block_device
    }

    fn reread_partition_table(&mut self) -> Result<()> {
        if self.is_block_device {
            self.platform.reread_partition_table(&self.file)?;
        }
        Ok(())
    }

    fn device_properties(&self) -> DeviceProperties {
        self.platform.device_properties(&self.file, &self.path)
    }
}

/// An in-memory `SectorStore`, used by tests and by callers assembling a
/// disk image from scratch before writing it out.
#[derive(Debug, Clone)]
pub struct MemStorage {
    data: Vec<u8>,
    sector_size: SectorSize,
    writable: bool,
}

impl MemStorage {
    pub fn new(size_bytes: u64, sector_size: SectorSize) -> Self {
        Self {
            data: vec![0u8; size_bytes as usize],
            sector_size,
            writable: true,
        }
    }

    pub fn from_vec(data: Vec<u8>, sector_size: SectorSize) -> Self {
        Self {
            data,
            sector_size,
            writable: true,
        }
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.writable = !readonly;
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl SectorStore for MemStorage {
    fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(DiskError::OutOfBounds(format!(
                "range {start}..{end} exceeds device size {}",
                self.data.len()
            )));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(DiskError::PermissionDenied(
                "store was opened read-only".into(),
            ));
        }
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(DiskError::OutOfBounds(format!(
                "range {start}..{end} exceeds device size {}",
                self.data.len()
            )));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_storage_round_trip() {
        let mut s = MemStorage::new(4096, SectorSize::uniform(512).unwrap());
        s.write_bytes(0, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        s.read_bytes(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn mem_storage_out_of_bounds() {
        let mut s = MemStorage::new(512, SectorSize::uniform(512).unwrap());
        let mut buf = [0u8; 16];
        assert!(matches!(
            s.read_bytes(500, &mut buf),
            Err(DiskError::OutOfBounds(_))
        ));
    }

    #[test]
    fn mem_storage_readonly_rejects_write() {
        let mut s = MemStorage::new(512, SectorSize::uniform(512).unwrap());
        s.set_readonly(true);
        assert!(matches!(
            s.write_bytes(0, &[1]),
            Err(DiskError::PermissionDenied(_))
        ));
    }

    #[test]
    fn sector_size_rejects_non_power_of_two() {
        assert!(SectorSize::new(500, 500).is_err());
    }
}
