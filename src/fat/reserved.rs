//! The FAT reserved region: `BootSectorStart`, the six BPB variants, the
//! composed `BootSector`, and the FAT32 `FsInfoSector`.
//!
//! Field layout and validation rules follow
//! `examples/original_source/diskfs/fat/reserved.py`; codec style (explicit
//! byte-offset little-endian extraction) follows `crate::util::codec` /
//! `crate::table::mbr`.

use crate::error::{Diagnostics, DiskError, Result, Warning};
use crate::util::codec::{le, put_le};

pub const BOOT_SECTOR_SIZE: usize = 512;
const SIGNATURE_OFFSET: usize = 510;
const SIGNATURE: u16 = 0xAA55;
const DIRECTORY_ENTRY_SIZE: u64 = 32;

const MIN_LSS_FAT: u32 = 128;
const MIN_LSS_FAT32: u32 = 512;
const SECTORS_PER_TRACK_MAX: u16 = 63;
const HEADS_MAX: u16 = 255;
const PHYSICAL_DRIVE_NUMBERS_RESERVED: [u8; 2] = [0x7F, 0xFF];
const EXTENDED_BOOT_SIGNATURE_EXISTS: u8 = 0x29;
const EXTENDED_BOOT_SIGNATURES: [u8; 2] = [0x28, 0x29];
const FILE_SYSTEM_TYPES_FAT: [&[u8; 8]; 3] = [b"FAT12   ", b"FAT16   ", b"FAT     "];
const FILE_SYSTEM_TYPE_FAT32: &[u8; 8] = b"FAT32   ";
const FAT32_VERSION: u16 = 0;
const SECTOR_NUMBERS_UNUSED: [u16; 2] = [0, 0xFFFF];
const FS_INFO_SECTOR: u16 = 1;

const JUMP_INSTRUCTIONS_START: [&[u8]; 3] = [&[0xEB], &[0xE9], &[0x90, 0xEB]];
const OEM_NAMES_COMMON: [&[u8; 8]; 6] = [
    b"MSDOS5.0", b"MSWIN4.1", b"IBM  3.3", b"IBM  7.1", b"mkdosfs ", b"FreeDOS ",
];

pub const FS_INFO_SIGNATURE_1: [u8; 4] = *b"RRaA";
pub const FS_INFO_SIGNATURE_2: [u8; 4] = *b"rrAa";
pub const FS_INFO_SIGNATURE_3: [u8; 4] = [0x00, 0x00, 0x55, 0xAA];
pub const FS_INFO_UNKNOWN: u32 = 0xFFFF_FFFF;

/// FAT width, determined solely by `total_clusters` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn from_total_clusters(total_clusters: u32) -> Self {
        if total_clusters < 4085 {
            FatType::Fat12
        } else if total_clusters < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 32,
        }
    }
}

fn is_power_of_two(v: u64) -> bool {
    crate::util::is_power_of_two(v)
}

/// First 11 bytes of a FAT boot sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSectorStart {
    pub jump_instruction: [u8; 3],
    pub oem_name: [u8; 8],
}

impl BootSectorStart {
    pub const SIZE: usize = 11;

    fn parse(buf: &[u8]) -> (Self, Diagnostics) {
        let mut diag = Diagnostics::new();
        let mut jump = [0u8; 3];
        jump.copy_from_slice(&buf[0..3]);
        let mut oem = [0u8; 8];
        oem.copy_from_slice(&buf[3..11]);

        if !JUMP_INSTRUCTIONS_START
            .iter()
            .any(|start| jump.starts_with(start))
        {
            diag.push(Warning::Validation(
                "unknown jump instruction pattern; some systems may refuse to \
                 recognize this file system"
                    .into(),
            ));
        }
        if !OEM_NAMES_COMMON.iter().any(|name| name.as_slice() == oem) {
            diag.push(Warning::Validation(
                "unknown OEM name in boot sector; some systems may refuse to \
                 recognize this file system"
                    .into(),
            ));
        }

        (
            BootSectorStart {
                jump_instruction: jump,
                oem_name: oem,
            },
            diag,
        )
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0..3].copy_from_slice(&self.jump_instruction);
        buf[3..11].copy_from_slice(&self.oem_name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpbDos200 {
    pub lss: u16,
    pub cluster_size: u8,
    pub reserved_size: u16,
    pub fat_count: u8,
    pub rootdir_entries: u16,
    pub total_size_200: u16,
    pub media_type: u8,
    pub fat_size_200: u16,
}

impl BpbDos200 {
    pub const SIZE: usize = 13;

    fn parse(buf: &[u8]) -> Result<Self> {
        let this = BpbDos200 {
            lss: le!(u16, buf, 0),
            cluster_size: buf[2],
            reserved_size: le!(u16, buf, 3),
            fat_count: buf[5],
            rootdir_entries: le!(u16, buf, 6),
            total_size_200: le!(u16, buf, 8),
            media_type: buf[10],
            fat_size_200: le!(u16, buf, 11),
        };
        this.validate()?;
        Ok(this)
    }

    fn write(&self, buf: &mut [u8]) {
        put_le!(buf, 0, self.lss);
        buf[2] = self.cluster_size;
        put_le!(buf, 3, self.reserved_size);
        buf[5] = self.fat_count;
        put_le!(buf, 6, self.rootdir_entries);
        put_le!(buf, 8, self.total_size_200);
        buf[10] = self.media_type;
        put_le!(buf, 11, self.fat_size_200);
    }

    fn validate(&self) -> Result<()> {
        if (self.lss as u64) < DIRECTORY_ENTRY_SIZE {
            return Err(DiskError::Validation(format!(
                "logical sector size must be >= {DIRECTORY_ENTRY_SIZE}"
            )));
        }
        if !is_power_of_two(self.lss as u64) {
            return Err(DiskError::Validation(
                "logical sector size must be a power of 2".into(),
            ));
        }
        if self.cluster_size == 0 || !is_power_of_two(self.cluster_size as u64) {
            return Err(DiskError::Validation(
                "cluster size must be a power of 2 greater than 0".into(),
            ));
        }
        if self.reserved_size < 1 {
            return Err(DiskError::Validation(
                "reserved sector count must be greater than 0".into(),
            ));
        }
        if self.fat_count < 1 {
            return Err(DiskError::Validation(
                "FAT count must be greater than 0".into(),
            ));
        }
        if (self.rootdir_entries as u64 * DIRECTORY_ENTRY_SIZE) % self.lss as u64 != 0 {
            return Err(DiskError::Validation(
                "root directory entries must align with logical sector size".into(),
            ));
        }
        if self.media_type <= 0xEF || (0xF1..=0xF7).contains(&self.media_type) {
            return Err(DiskError::Validation(format!(
                "unsupported media type 0x{:x}",
                self.media_type
            )));
        }
        Ok(())
    }

    fn validate_for_volume(&self, volume_lss: u32, volume_size_lba: u64) -> Result<()> {
        if self.lss as u32 != volume_lss {
            return Err(DiskError::Validation(
                "logical sector size in DOS 2.0 BPB does not match volume".into(),
            ));
        }
        if self.total_size_200 as u64 > volume_size_lba {
            return Err(DiskError::Validation(
                "total size must not be greater than volume size".into(),
            ));
        }
        Ok(())
    }

    fn total_size(&self) -> Option<u64> {
        (self.total_size_200 != 0).then_some(self.total_size_200 as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpbDos331 {
    pub dos200: BpbDos200,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_before_partition: u32,
    pub total_size_331: u32,
}

impl BpbDos331 {
    pub const SIZE: usize = BpbDos200::SIZE + 12;

    fn parse(buf: &[u8]) -> Result<Self> {
        let dos200 = BpbDos200::parse(&buf[..BpbDos200::SIZE])?;
        let rest = &buf[BpbDos200::SIZE..];
        let this = BpbDos331 {
            dos200,
            sectors_per_track: le!(u16, rest, 0),
            heads: le!(u16, rest, 2),
            hidden_before_partition: le!(u32, rest, 4),
            total_size_331: le!(u32, rest, 8),
        };
        this.validate()?;
        Ok(this)
    }

    fn write(&self, buf: &mut [u8]) {
        self.dos200.write(&mut buf[..BpbDos200::SIZE]);
        let rest = &mut buf[BpbDos200::SIZE..];
        put_le!(rest, 0, self.sectors_per_track);
        put_le!(rest, 2, self.heads);
        put_le!(rest, 4, self.hidden_before_partition);
        put_le!(rest, 8, self.total_size_331);
    }

    fn validate(&self) -> Result<()> {
        if self.sectors_per_track > SECTORS_PER_TRACK_MAX {
            return Err(DiskError::Validation(format!(
                "sectors per track must be <= {SECTORS_PER_TRACK_MAX}"
            )));
        }
        if self.heads > HEADS_MAX {
            return Err(DiskError::Validation(format!(
                "head count must be <= {HEADS_MAX}"
            )));
        }
        if let (Some(a), true) = (self.dos200.total_size(), self.total_size_331 != 0) {
            if a != self.total_size_331 as u64 {
                return Err(DiskError::Validation(
                    "total size does not match total size in DOS 2.0 BPB".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        self.dos200.validate_for_volume(lss, size_lba)?;
        if self.hidden_before_partition as u64 != start_lba {
            return Err(DiskError::Validation(
                "hidden sector count does not match volume start sector".into(),
            ));
        }
        if self.total_size_331 as u64 > size_lba {
            return Err(DiskError::Validation(
                "total size must not be greater than volume size".into(),
            ));
        }
        Ok(())
    }

    fn total_size(&self) -> Option<u64> {
        self.dos200
            .total_size()
            .or((self.total_size_331 != 0).then_some(self.total_size_331 as u64))
    }
}

fn check_physical_drive_number(n: u8, diag: &mut Diagnostics) {
    if PHYSICAL_DRIVE_NUMBERS_RESERVED.contains(&n) {
        diag.push(Warning::Validation(format!(
            "reserved physical drive number {n}"
        )));
    }
}

fn check_extended_boot_signature(sig: u8) -> Result<()> {
    if !EXTENDED_BOOT_SIGNATURES.contains(&sig) {
        return Err(DiskError::Validation(format!(
            "invalid extended boot signature 0x{sig:02x}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEbpbFat {
    pub dos331: BpbDos331,
    pub phys_drive_no: u8,
    pub reserved: u8,
    pub ext_boot_sig: u8,
}

impl ShortEbpbFat {
    pub const SIZE: usize = BpbDos331::SIZE + 3;

    fn parse(buf: &[u8]) -> Result<(Self, Diagnostics)> {
        let dos331 = BpbDos331::parse(&buf[..BpbDos331::SIZE])?;
        let rest = &buf[BpbDos331::SIZE..];
        let this = ShortEbpbFat {
            dos331,
            phys_drive_no: rest[0],
            reserved: rest[1],
            ext_boot_sig: rest[2],
        };
        let diag = this.validate()?;
        Ok((this, diag))
    }

    fn write(&self, buf: &mut [u8]) {
        self.dos331.write(&mut buf[..BpbDos331::SIZE]);
        let rest = &mut buf[BpbDos331::SIZE..];
        rest[0] = self.phys_drive_no;
        rest[1] = self.reserved;
        rest[2] = self.ext_boot_sig;
    }

    fn validate(&self) -> Result<Diagnostics> {
        if (self.dos331.dos200.lss as u32) < MIN_LSS_FAT {
            return Err(DiskError::Validation(format!(
                "FAT requires a logical sector size of at least {MIN_LSS_FAT} bytes"
            )));
        }
        if self.dos331.dos200.rootdir_entries == 0 {
            return Err(DiskError::Validation(
                "root directory entry count must be greater than 0".into(),
            ));
        }
        if self.dos331.dos200.fat_size_200 == 0 {
            return Err(DiskError::Validation(
                "FAT size in DOS 2.0 BPB must be greater than 0".into(),
            ));
        }
        let mut diag = Diagnostics::new();
        check_physical_drive_number(self.phys_drive_no, &mut diag);
        check_extended_boot_signature(self.ext_boot_sig)?;
        Ok(diag)
    }

    fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        self.dos331.validate_for_volume(start_lba, lss, size_lba)
    }

    fn total_size(&self) -> Option<u64> {
        self.dos331.total_size()
    }

    fn fat_size(&self) -> u32 {
        self.dos331.dos200.fat_size_200 as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEbpbFat32 {
    pub dos331: BpbDos331,
    pub fat_size_32: u32,
    pub mirroring_flags: u16,
    pub version: u16,
    pub rootdir_start_cluster: u32,
    pub fsinfo_sector: u16,
    pub backup_sector: u16,
    pub reserved_1: [u8; 12],
    pub phys_drive_no: u8,
    pub reserved_2: u8,
    pub ext_boot_sig: u8,
}

impl ShortEbpbFat32 {
    pub const SIZE: usize = BpbDos331::SIZE + 31;

    fn parse(buf: &[u8]) -> Result<(Self, Diagnostics)> {
        let dos331 = BpbDos331::parse(&buf[..BpbDos331::SIZE])?;
        let rest = &buf[BpbDos331::SIZE..];
        let mut reserved_1 = [0u8; 12];
        reserved_1.copy_from_slice(&rest[18..30]);
        let this = ShortEbpbFat32 {
            dos331,
            fat_size_32: le!(u32, rest, 0),
            mirroring_flags: le!(u16, rest, 4),
            version: le!(u16, rest, 6),
            rootdir_start_cluster: le!(u32, rest, 8),
            fsinfo_sector: le!(u16, rest, 12),
            backup_sector: le!(u16, rest, 14),
            reserved_1,
            phys_drive_no: rest[30],
            reserved_2: rest[31],
            ext_boot_sig: rest[32],
        };
        let diag = this.validate()?;
        Ok((this, diag))
    }

    fn write(&self, buf: &mut [u8]) {
        self.dos331.write(&mut buf[..BpbDos331::SIZE]);
        let rest = &mut buf[BpbDos331::SIZE..];
        put_le!(rest, 0, self.fat_size_32);
        put_le!(rest, 4, self.mirroring_flags);
        put_le!(rest, 6, self.version);
        put_le!(rest, 8, self.rootdir_start_cluster);
        put_le!(rest, 12, self.fsinfo_sector);
        put_le!(rest, 14, self.backup_sector);
        rest[18..30].copy_from_slice(&self.reserved_1);
        rest[30] = self.phys_drive_no;
        rest[31] = self.reserved_2;
        rest[32] = self.ext_boot_sig;
    }

    pub fn fsinfo_available(&self) -> bool {
        !SECTOR_NUMBERS_UNUSED.contains(&self.fsinfo_sector)
    }

    pub fn backup_available(&self) -> bool {
        !SECTOR_NUMBERS_UNUSED.contains(&self.backup_sector)
    }

    fn validate(&self) -> Result<Diagnostics> {
        if (self.dos331.dos200.lss as u32) < MIN_LSS_FAT32 {
            return Err(DiskError::Validation(format!(
                "FAT32 requires a logical sector size of at least {MIN_LSS_FAT32} bytes"
            )));
        }
        if self.dos331.dos200.rootdir_entries != 0 {
            return Err(DiskError::Validation(
                "root directory entry count must be 0 for FAT32".into(),
            ));
        }
        if self.dos331.dos200.total_size_200 != 0 {
            return Err(DiskError::Validation(
                "total size in DOS 2.0 BPB must be 0 for FAT32".into(),
            ));
        }
        if self.dos331.dos200.fat_size_200 != 0 {
            return Err(DiskError::Validation(
                "FAT size in DOS 2.0 BPB must be 0 for FAT32".into(),
            ));
        }
        if self.fat_size_32 == 0 {
            return Err(DiskError::Validation(
                "FAT size must be greater than 0".into(),
            ));
        }
        if self.version != FAT32_VERSION {
            return Err(DiskError::Validation(format!(
                "invalid FAT32 version {}",
                self.version
            )));
        }
        if self.rootdir_start_cluster < 2 {
            return Err(DiskError::Validation(
                "root directory start cluster must be >= 2".into(),
            ));
        }
        if self.fsinfo_available() && self.fsinfo_sector != FS_INFO_SECTOR {
            return Err(DiskError::Validation(format!(
                "FS information sector number must be {FS_INFO_SECTOR}"
            )));
        }

        let min_boot_sectors: u16 = if self.fsinfo_available() { 2 } else { 1 };
        let min_reserved = if self.backup_available() {
            if self.backup_sector < min_boot_sectors {
                return Err(DiskError::Validation(format!(
                    "boot sector backup start must be >= {min_boot_sectors}"
                )));
            }
            2 * self.backup_sector
        } else {
            min_boot_sectors
        };
        if self.dos331.dos200.reserved_size < min_reserved {
            return Err(DiskError::Validation(format!(
                "reserved sector count must be at least {min_reserved}"
            )));
        }

        let mut diag = Diagnostics::new();
        check_physical_drive_number(self.phys_drive_no, &mut diag);
        check_extended_boot_signature(self.ext_boot_sig)?;
        Ok(diag)
    }

    fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        self.dos331.validate_for_volume(start_lba, lss, size_lba)
    }

    fn total_size(&self) -> Option<u64> {
        self.dos331.total_size()
    }

    fn fat_size(&self) -> u32 {
        self.fat_size_32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EbpbFat {
    pub short: ShortEbpbFat,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub file_system_type: [u8; 8],
}

impl EbpbFat {
    pub const SIZE: usize = ShortEbpbFat::SIZE + 23;

    fn parse(buf: &[u8]) -> Result<(Self, Diagnostics)> {
        let (short, mut diag) = ShortEbpbFat::parse(&buf[..ShortEbpbFat::SIZE])?;
        let rest = &buf[ShortEbpbFat::SIZE..];
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&rest[4..15]);
        let mut file_system_type = [0u8; 8];
        file_system_type.copy_from_slice(&rest[15..23]);
        let this = EbpbFat {
            short,
            volume_id: le!(u32, rest, 0),
            volume_label,
            file_system_type,
        };
        this.validate(&mut diag)?;
        Ok((this, diag))
    }

    fn write(&self, buf: &mut [u8]) {
        self.short.write(&mut buf[..ShortEbpbFat::SIZE]);
        let rest = &mut buf[ShortEbpbFat::SIZE..];
        put_le!(rest, 0, self.volume_id);
        rest[4..15].copy_from_slice(&self.volume_label);
        rest[15..23].copy_from_slice(&self.file_system_type);
    }

    fn validate(&self, diag: &mut Diagnostics) -> Result<()> {
        if self.short.ext_boot_sig != EXTENDED_BOOT_SIGNATURE_EXISTS {
            return Err(DiskError::Validation(
                "extended boot signature must be 0x29 to parse an extended FAT EBPB"
                    .into(),
            ));
        }
        if !FILE_SYSTEM_TYPES_FAT
            .iter()
            .any(|ty| ty.as_slice() == self.file_system_type)
        {
            diag.push(Warning::Validation(format!(
                "unknown file system type {:?}; some systems may refuse to \
                 recognize this file system",
                self.file_system_type
            )));
        }
        Ok(())
    }

    fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        self.short.validate_for_volume(start_lba, lss, size_lba)
    }

    fn total_size(&self) -> Option<u64> {
        self.short.total_size()
    }

    fn fat_size(&self) -> u32 {
        self.short.fat_size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EbpbFat32 {
    pub short: ShortEbpbFat32,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub file_system_type: [u8; 8],
}

impl EbpbFat32 {
    pub const SIZE: usize = ShortEbpbFat32::SIZE + 23;

    fn parse(buf: &[u8]) -> Result<(Self, Diagnostics)> {
        let (short, mut diag) = ShortEbpbFat32::parse(&buf[..ShortEbpbFat32::SIZE])?;
        let rest = &buf[ShortEbpbFat32::SIZE..];
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&rest[4..15]);
        let mut file_system_type = [0u8; 8];
        file_system_type.copy_from_slice(&rest[15..23]);
        let this = EbpbFat32 {
            short,
            volume_id: le!(u32, rest, 0),
            volume_label,
            file_system_type,
        };
        this.validate(&mut diag)?;
        Ok((this, diag))
    }

    fn write(&self, buf: &mut [u8]) {
        self.short.write(&mut buf[..ShortEbpbFat32::SIZE]);
        let rest = &mut buf[ShortEbpbFat32::SIZE..];
        put_le!(rest, 0, self.volume_id);
        rest[4..15].copy_from_slice(&self.volume_label);
        rest[15..23].copy_from_slice(&self.file_system_type);
    }

    fn validate(&self, diag: &mut Diagnostics) -> Result<()> {
        if self.short.ext_boot_sig != EXTENDED_BOOT_SIGNATURE_EXISTS {
            return Err(DiskError::Validation(
                "extended boot signature must be 0x29 to parse an extended FAT32 EBPB"
                    .into(),
            ));
        }
        if self.file_system_type.as_slice() != FILE_SYSTEM_TYPE_FAT32.as_slice() {
            diag.push(Warning::Validation(format!(
                "unknown file system type {:?}; some systems may refuse to \
                 recognize this file system",
                self.file_system_type
            )));
        }
        Ok(())
    }

    fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        self.short.validate_for_volume(start_lba, lss, size_lba)?;
        if let Some(total) = self.total_size() {
            if total > size_lba {
                return Err(DiskError::Validation(
                    "total size must not be greater than volume size".into(),
                ));
            }
        }
        Ok(())
    }

    fn total_size(&self) -> Option<u64> {
        match self.short.total_size() {
            Some(size) => Some(size),
            // If the 16- and 32-bit total-size fields are both zero, a volume may
            // encode a 64-bit total logical sector count in `file_system_type`.
            None => {
                let size = u64::from_le_bytes(self.file_system_type);
                (size != 0).then_some(size)
            }
        }
    }

    fn fat_size(&self) -> u32 {
        self.short.fat_size()
    }
}

/// BIOS parameter block, polymorphic over the six shapes FAT boot sectors
/// use (spec §4.4, design note "Polymorphic BPB -> sum type").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bpb {
    Dos200(BpbDos200),
    Dos331(BpbDos331),
    ShortFat(ShortEbpbFat),
    ShortFat32(ShortEbpbFat32),
    Fat(EbpbFat),
    Fat32(EbpbFat32),
}

/// Order in which BPB shapes are tried when parsing a boot sector: each
/// subsequent attempt is a strict superset of fields, so trying the most
/// specific shapes first avoids mistaking a DOS 2.0 BPB for a truncated
/// FAT32 one.
pub const BPB_PARSE_ORDER: [fn(&[u8]) -> Result<(Bpb, Diagnostics)>; 6] = [
    |b| EbpbFat32::parse(b).map(|(v, d)| (Bpb::Fat32(v), d)),
    |b| EbpbFat::parse(b).map(|(v, d)| (Bpb::Fat(v), d)),
    |b| ShortEbpbFat32::parse(b).map(|(v, d)| (Bpb::ShortFat32(v), d)),
    |b| ShortEbpbFat::parse(b).map(|(v, d)| (Bpb::ShortFat(v), d)),
    |b| BpbDos331::parse(b).map(|v| (Bpb::Dos331(v), Diagnostics::new())),
    |b| BpbDos200::parse(b).map(|v| (Bpb::Dos200(v), Diagnostics::new())),
];

fn bpb_size(kind: usize) -> usize {
    match kind {
        0 => EbpbFat32::SIZE,
        1 => EbpbFat::SIZE,
        2 => ShortEbpbFat32::SIZE,
        3 => ShortEbpbFat::SIZE,
        4 => BpbDos331::SIZE,
        _ => BpbDos200::SIZE,
    }
}

impl Bpb {
    pub fn bpb_dos_200(&self) -> &BpbDos200 {
        match self {
            Bpb::Dos200(v) => v,
            Bpb::Dos331(v) => &v.dos200,
            Bpb::ShortFat(v) => &v.dos331.dos200,
            Bpb::ShortFat32(v) => &v.dos331.dos200,
            Bpb::Fat(v) => &v.short.dos331.dos200,
            Bpb::Fat32(v) => &v.short.dos331.dos200,
        }
    }

    pub fn total_size(&self) -> Option<u64> {
        match self {
            Bpb::Dos200(v) => v.total_size(),
            Bpb::Dos331(v) => v.total_size(),
            Bpb::ShortFat(v) => v.total_size(),
            Bpb::ShortFat32(v) => v.total_size(),
            Bpb::Fat(v) => v.total_size(),
            Bpb::Fat32(v) => v.total_size(),
        }
    }

    pub fn fat_size(&self) -> u32 {
        match self {
            Bpb::Dos200(v) => v.fat_size_200 as u32,
            Bpb::Dos331(v) => v.dos200.fat_size_200 as u32,
            Bpb::ShortFat(v) => v.fat_size(),
            Bpb::ShortFat32(v) => v.fat_size(),
            Bpb::Fat(v) => v.fat_size(),
            Bpb::Fat32(v) => v.fat_size(),
        }
    }

    pub fn is_fat32(&self) -> bool {
        matches!(self, Bpb::ShortFat32(_) | Bpb::Fat32(_))
    }

    pub fn rootdir_start_cluster(&self) -> Option<u32> {
        match self {
            Bpb::ShortFat32(v) => Some(v.rootdir_start_cluster),
            Bpb::Fat32(v) => Some(v.short.rootdir_start_cluster),
            _ => None,
        }
    }

    pub fn fsinfo_sector(&self) -> Option<u16> {
        match self {
            Bpb::ShortFat32(v) if v.fsinfo_available() => Some(v.fsinfo_sector),
            Bpb::Fat32(v) if v.short.fsinfo_available() => Some(v.short.fsinfo_sector),
            _ => None,
        }
    }

    pub fn media_type(&self) -> u8 {
        self.bpb_dos_200().media_type
    }

    pub fn volume_id(&self) -> Option<u32> {
        match self {
            Bpb::Fat(v) => Some(v.volume_id),
            Bpb::Fat32(v) => Some(v.volume_id),
            _ => None,
        }
    }

    fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        match self {
            Bpb::Dos200(v) => v.validate_for_volume(lss, size_lba),
            Bpb::Dos331(v) => v.validate_for_volume(start_lba, lss, size_lba),
            Bpb::ShortFat(v) => v.validate_for_volume(start_lba, lss, size_lba),
            Bpb::ShortFat32(v) => v.validate_for_volume(start_lba, lss, size_lba),
            Bpb::Fat(v) => v.validate_for_volume(start_lba, lss, size_lba),
            Bpb::Fat32(v) => v.validate_for_volume(start_lba, lss, size_lba),
        }
    }

    fn write(&self, buf: &mut [u8]) {
        match self {
            Bpb::Dos200(v) => v.write(buf),
            Bpb::Dos331(v) => v.write(buf),
            Bpb::ShortFat(v) => v.write(buf),
            Bpb::ShortFat32(v) => v.write(buf),
            Bpb::Fat(v) => v.write(buf),
            Bpb::Fat32(v) => v.write(buf),
        }
    }

    fn size(&self) -> usize {
        match self {
            Bpb::Dos200(_) => BpbDos200::SIZE,
            Bpb::Dos331(_) => BpbDos331::SIZE,
            Bpb::ShortFat(_) => ShortEbpbFat::SIZE,
            Bpb::ShortFat32(_) => ShortEbpbFat32::SIZE,
            Bpb::Fat(_) => EbpbFat::SIZE,
            Bpb::Fat32(_) => EbpbFat32::SIZE,
        }
    }
}

/// FAT boot sector: `BootSectorStart` + `Bpb` + boot code, 512 bytes total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    pub start: BootSectorStart,
    pub bpb: Bpb,
    pub boot_code: Vec<u8>,
}

impl BootSector {
    pub fn parse(buf: &[u8; BOOT_SECTOR_SIZE]) -> Result<(Self, Diagnostics)> {
        let signature = le!(u16, buf, SIGNATURE_OFFSET);
        if signature != SIGNATURE {
            return Err(DiskError::Validation(format!(
                "invalid VBR signature 0x{signature:04x}"
            )));
        }

        let (start, mut diag) = BootSectorStart::parse(&buf[..BootSectorStart::SIZE]);

        // try each shape in order; `bpb_size` gives each candidate's byte span
        let mut bpb = None;
        for (kind, parser) in BPB_PARSE_ORDER.iter().enumerate() {
            let size = bpb_size(kind);
            let slice_end = BootSectorStart::SIZE + size;
            if slice_end > SIGNATURE_OFFSET {
                continue;
            }
            if let Ok((parsed, parsed_diag)) = parser(&buf[BootSectorStart::SIZE..slice_end]) {
                bpb = Some((parsed, parsed_diag));
                break;
            }
        }
        let (bpb, bpb_diag) = bpb
            .ok_or_else(|| DiskError::Validation("no known FAT BPB could be parsed".into()))?;
        diag.0.extend(bpb_diag.0);

        let boot_code_start = BootSectorStart::SIZE + bpb.size();
        let boot_code = buf[boot_code_start..SIGNATURE_OFFSET].to_vec();
        if boot_code.iter().all(|&b| b == 0) {
            diag.push(Warning::Validation(
                "boot code should not be empty; use at least a dummy boot loader"
                    .into(),
            ));
        }

        let this = BootSector {
            start,
            bpb,
            boot_code,
        };
        this.validate()?;
        Ok((this, diag))
    }

    pub fn serialize(&self) -> [u8; BOOT_SECTOR_SIZE] {
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        self.start.write(&mut buf[..BootSectorStart::SIZE]);
        let bpb_start = BootSectorStart::SIZE;
        let bpb_end = bpb_start + self.bpb.size();
        self.bpb.write(&mut buf[bpb_start..bpb_end]);
        let boot_code_end = (bpb_end + self.boot_code.len()).min(SIGNATURE_OFFSET);
        buf[bpb_end..boot_code_end].copy_from_slice(&self.boot_code[..boot_code_end - bpb_end]);
        put_le!(buf, SIGNATURE_OFFSET, SIGNATURE);
        buf
    }

    fn validate(&self) -> Result<()> {
        if self.total_clusters() < 1 {
            return Err(DiskError::Validation(
                "total cluster count must be greater than 0".into(),
            ));
        }
        if self.bpb.is_fat32() != (self.fat_type() == FatType::Fat32) {
            return Err(DiskError::Validation(
                "detected FAT type does not match BPB".into(),
            ));
        }
        Ok(())
    }

    /// Validates the BPB's derived geometry against an already-opened
    /// volume's start LBA, logical sector size, and length in sectors.
    pub fn validate_for_volume(&self, start_lba: u64, lss: u32, size_lba: u64) -> Result<()> {
        self.bpb.validate_for_volume(start_lba, lss, size_lba)
    }

    pub fn total_size(&self) -> Result<u64> {
        self.bpb
            .total_size()
            .ok_or_else(|| DiskError::Validation("no total size was defined".into()))
    }

    pub fn fat_size(&self) -> u32 {
        self.bpb.fat_size()
    }

    pub fn fat_region_start(&self) -> u64 {
        self.bpb.bpb_dos_200().reserved_size as u64
    }

    pub fn fat_region_size(&self) -> u64 {
        self.bpb.bpb_dos_200().fat_count as u64 * self.fat_size() as u64
    }

    pub fn rootdir_region_start(&self) -> u64 {
        self.fat_region_start() + self.fat_region_size()
    }

    pub fn rootdir_region_size(&self) -> u64 {
        let dos200 = self.bpb.bpb_dos_200();
        (dos200.rootdir_entries as u64 * DIRECTORY_ENTRY_SIZE) / dos200.lss as u64
    }

    pub fn data_region_start(&self) -> u64 {
        self.rootdir_region_start() + self.rootdir_region_size()
    }

    pub fn data_region_size(&self) -> u64 {
        self.total_size().unwrap_or(0) - self.data_region_start()
    }

    pub fn cluster_size(&self) -> u64 {
        self.bpb.bpb_dos_200().cluster_size as u64
    }

    pub fn total_clusters(&self) -> u32 {
        (self.data_region_size() / self.cluster_size()) as u32
    }

    pub fn fat_type(&self) -> FatType {
        FatType::from_total_clusters(self.total_clusters())
    }

    pub fn lss(&self) -> u32 {
        self.bpb.bpb_dos_200().lss as u32
    }
}

/// FAT32 FS information sector: free-cluster and last-allocated hints only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfoSector {
    pub free_clusters: u32,
    pub last_allocated_cluster: u32,
}

impl FsInfoSector {
    pub const SIZE: usize = 512;

    pub fn parse(buf: &[u8; Self::SIZE]) -> Result<Self> {
        let sig1 = &buf[0..4];
        if sig1 != FS_INFO_SIGNATURE_1 {
            return Err(DiskError::Validation(format!(
                "invalid first FS information sector signature {sig1:?}"
            )));
        }
        let sig2 = &buf[484..488];
        if sig2 != FS_INFO_SIGNATURE_2 {
            return Err(DiskError::Validation(format!(
                "invalid second FS information sector signature {sig2:?}"
            )));
        }
        let free_clusters = le!(u32, buf, 488);
        let last_allocated_cluster = le!(u32, buf, 492);
        let sig3 = &buf[508..512];
        if sig3 != FS_INFO_SIGNATURE_3 {
            return Err(DiskError::Validation(format!(
                "invalid third FS information sector signature {sig3:?}"
            )));
        }
        Ok(FsInfoSector {
            free_clusters,
            last_allocated_cluster,
        })
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&FS_INFO_SIGNATURE_1);
        buf[484..488].copy_from_slice(&FS_INFO_SIGNATURE_2);
        put_le!(buf, 488, self.free_clusters);
        put_le!(buf, 492, self.last_allocated_cluster);
        buf[508..512].copy_from_slice(&FS_INFO_SIGNATURE_3);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_fat16_boot_sector() -> [u8; BOOT_SECTOR_SIZE] {
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        buf[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        buf[3..11].copy_from_slice(b"MSDOS5.0");
        put_le!(buf, 11, 512u16); // lss
        buf[13] = 4; // cluster_size
        put_le!(buf, 14, 4u16); // reserved_size
        buf[16] = 2; // fat_count
        put_le!(buf, 17, 512u16); // rootdir_entries (512*32/512=32 sectors)
        put_le!(buf, 19, 8192u16); // total_size_200
        buf[21] = 0xF8; // media_type
        put_le!(buf, 22, 8u16); // fat_size_200
        put_le!(buf, 24, 63u16); // sectors_per_track
        put_le!(buf, 26, 255u16); // heads
        put_le!(buf, 28, 0u32); // hidden_before_partition
        put_le!(buf, 32, 0u32); // total_size_331 (unused, 200 is set)
        buf[36] = 0x80; // phys_drive_no
        buf[37] = 0; // reserved
        buf[38] = 0x29; // ext_boot_sig
        put_le!(buf, 39, 0xDEADBEEFu32); // volume_id
        buf[43..54].copy_from_slice(b"NO NAME    ");
        buf[54..62].copy_from_slice(b"FAT16   ");
        put_le!(buf, SIGNATURE_OFFSET, SIGNATURE);
        buf
    }

    #[test]
    fn parses_minimal_fat16_boot_sector() {
        let buf = minimal_fat16_boot_sector();
        let (bs, diag) = BootSector::parse(&buf).unwrap();
        assert!(diag.is_empty(), "unexpected diagnostics: {:?}", diag);
        assert_eq!(bs.fat_region_start(), 4);
        assert_eq!(bs.fat_region_size(), 16);
        assert_eq!(bs.rootdir_region_start(), 20);
        assert_eq!(bs.rootdir_region_size(), 32);
        assert_eq!(bs.data_region_start(), 52);
        assert_eq!(bs.total_clusters(), (8192 - 52) / 4);
        assert_eq!(bs.fat_type(), FatType::Fat16);
        assert!(matches!(bs.bpb, Bpb::Fat(_)));
    }

    #[test]
    fn round_trips_through_serialize() {
        let buf = minimal_fat16_boot_sector();
        let (bs, _) = BootSector::parse(&buf).unwrap();
        let out = bs.serialize();
        let (bs2, _) = BootSector::parse(&out).unwrap();
        assert_eq!(bs, bs2);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut buf = minimal_fat16_boot_sector();
        buf[SIGNATURE_OFFSET] = 0;
        assert!(BootSector::parse(&buf).is_err());
    }

    #[test]
    fn fat_type_from_total_clusters() {
        assert_eq!(FatType::from_total_clusters(100), FatType::Fat12);
        assert_eq!(FatType::from_total_clusters(5000), FatType::Fat16);
        assert_eq!(FatType::from_total_clusters(70000), FatType::Fat32);
    }

    #[test]
    fn fsinfo_sector_round_trip() {
        let info = FsInfoSector {
            free_clusters: 1234,
            last_allocated_cluster: 5,
        };
        let buf = info.serialize();
        let parsed = FsInfoSector::parse(&buf).unwrap();
        assert_eq!(info, parsed);
    }
}
