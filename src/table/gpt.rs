//! GPT codec (spec §4.3).
//!
//! Dual-header layout, CRC32 verification/fallback, and usable-LBA
//! accounting follow `examples/original_source/diskfs/table/gpt.py`
//! closely (field order, offsets, and the primary/backup ordering
//! invariants it checks before accepting a header). The mixed-endian
//! [`Guid`] representation is ported from the teacher's
//! `examples/rrbutani-fatfs/src/gpt.rs`, which already implements GPT's
//! "middle-endian" 128-bit GUID correctly; CRC32 here uses the `crc` crate
//! (a teacher dependency) instead of hand-rolled CRC tables.

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Diagnostics, DiskError, Result, Warning};
use crate::table::mbr::Mbr;
use crate::util::codec::{le, put_le};
use crate::util::is_power_of_two;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;
pub const MIN_LSS_GPT: u32 = 512;
pub const HEADER_SIZE: usize = 92;
pub const MIN_PARTITION_ENTRIES: u32 = 128;
pub const PARTITION_ENTRY_SIZE: u32 = 128;
const PRIMARY_HEADER_LBA: u64 = 1;
const PARTITION_NAME_MAX_LEN: usize = 36;
const PARTITION_NAME_BYTES: usize = PARTITION_NAME_MAX_LEN * 2;

/// A "middle-endian" 128-bit GUID, as used throughout GPT.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid {
    first: u32,
    second: u16,
    third: u16,
    fourth: u16,
    fifth_p1: u16,
    fifth_p2: u32,
}

impl Guid {
    pub const NIL: Guid = Guid {
        first: 0,
        second: 0,
        third: 0,
        fourth: 0,
        fifth_p1: 0,
        fifth_p2: 0,
    };

    pub fn from_mixed_u128(u: u128) -> Self {
        Self::from_mixed(u.to_be_bytes())
    }

    /// Builds a `Guid` from a standard `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
    /// big-endian-ordered byte layout (as a `u128` written in that order).
    pub fn from_mixed(bytes: [u8; 16]) -> Self {
        Self {
            first: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            second: u16::from_be_bytes(bytes[4..6].try_into().unwrap()),
            third: u16::from_be_bytes(bytes[6..8].try_into().unwrap()),
            fourth: u16::from_be_bytes(bytes[8..10].try_into().unwrap()),
            fifth_p1: u16::from_be_bytes(bytes[10..12].try_into().unwrap()),
            fifth_p2: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
        }
    }

    /// Reads a GUID from its on-disk, little-endian-mixed representation
    /// (`bytes_le` in Python's `uuid` module terms).
    pub fn from_bytes_le(b: &[u8; 16]) -> Self {
        Self {
            first: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            second: u16::from_le_bytes(b[4..6].try_into().unwrap()),
            third: u16::from_le_bytes(b[6..8].try_into().unwrap()),
            fourth: u16::from_be_bytes(b[8..10].try_into().unwrap()),
            fifth_p1: u16::from_be_bytes(b[10..12].try_into().unwrap()),
            fifth_p2: u32::from_be_bytes(b[12..16].try_into().unwrap()),
        }
    }

    pub fn to_bytes_le(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.first.to_le_bytes());
        out[4..6].copy_from_slice(&self.second.to_le_bytes());
        out[6..8].copy_from_slice(&self.third.to_le_bytes());
        out[8..10].copy_from_slice(&self.fourth.to_be_bytes());
        out[10..12].copy_from_slice(&self.fifth_p1.to_be_bytes());
        out[12..16].copy_from_slice(&self.fifth_p2.to_be_bytes());
        out
    }

    pub fn microsoft_basic_data() -> Self {
        Guid::from_mixed_u128(0xEBD0_A0A2_B9E5_4433_87C0_68B6_B726_99C7u128)
    }

    pub fn efi_system_partition() -> Self {
        Guid::from_mixed_u128(0xC12A_7328_F81F_11D2_BA4B_00A0_C93E_C93Bu128)
    }

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn random() -> Self {
        // A minimal RFC 4122 version-4 GUID generator: no external `rand`
        // dependency is in the teacher's stack, so entropy is drawn from
        // the process/thread/time triple the way short-lived disk-image
        // tooling typically does when a real CSPRNG isn't already wired
        // up. Callers that need cryptographic uniqueness should supply
        // their own `Guid`.
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let tid = format!("{:?}", std::thread::current().id());
        let mut hash: u128 = nanos;
        for b in tid.bytes() {
            hash = hash.wrapping_mul(1_099_511_628_211).wrapping_add(b as u128);
        }
        let bytes = hash.to_be_bytes();
        let mut guid = Self::from_mixed(bytes);
        // Set version (4) and variant (RFC 4122) bits for a plausible-looking GUID.
        guid.third = (guid.third & 0x0FFF) | 0x4000;
        guid.fourth = (guid.fourth & 0x3FFF) | 0x8000;
        guid
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:04X}{:08X}",
            self.first, self.second, self.third, self.fourth, self.fifth_p1, self.fifth_p2,
        )
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// GPT partition attribute flags (bits 0-2 standard, 48-63 type-specific).
pub mod attrs {
    pub const REQUIRED: u64 = 1 << 0;
    pub const EFI_IGNORE: u64 = 1 << 1;
    pub const BIOS_BOOTABLE: u64 = 1 << 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptPartitionEntry {
    pub start_lba: u64,
    pub end_lba: u64,
    pub type_guid: Guid,
    pub attributes: u64,
    pub guid: Guid,
    pub name: String,
}

impl GptPartitionEntry {
    pub fn length_lba(&self) -> u64 {
        self.end_lba - self.start_lba + 1
    }

    fn is_empty(&self) -> bool {
        self.type_guid.is_nil()
    }

    fn to_bytes(&self, entry_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; entry_size as usize];
        if self.is_empty() {
            return buf;
        }
        buf[0..16].copy_from_slice(&self.type_guid.to_bytes_le());
        buf[16..32].copy_from_slice(&self.guid.to_bytes_le());
        put_le!(buf, 32, self.start_lba);
        put_le!(buf, 40, self.end_lba);
        put_le!(buf, 48, self.attributes);
        let name_utf16: Vec<u16> = self.name.encode_utf16().collect();
        for (i, unit) in name_utf16.iter().take(PARTITION_NAME_MAX_LEN).enumerate() {
            let off = 56 + i * 2;
            buf[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Option<Self>> {
        let type_guid = Guid::from_bytes_le(buf[0..16].try_into().unwrap());
        if type_guid.is_nil() {
            return Ok(None);
        }
        let guid = Guid::from_bytes_le(buf[16..32].try_into().unwrap());
        let start_lba = le!(u64, buf, 32);
        let end_lba = le!(u64, buf, 40);
        let attributes = le!(u64, buf, 48);

        if start_lba <= 2 {
            return Err(DiskError::Validation(
                "GPT partition start_lba must be greater than 2".into(),
            ));
        }
        if start_lba > end_lba {
            return Err(DiskError::Validation(format!(
                "GPT partition start_lba ({start_lba}) greater than end_lba ({end_lba})"
            )));
        }

        let name_bytes = &buf[56..56 + PARTITION_NAME_BYTES];
        let units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        let name = String::from_utf16(&units)
            .map_err(|_| DiskError::Validation("GPT partition name is not valid UTF-16".into()))?;

        Ok(Some(Self {
            start_lba,
            end_lba,
            type_guid,
            attributes,
            guid,
            name,
        }))
    }
}

fn partition_array_sectors(entries_count: u32, entry_size: u32, lss: u32) -> Result<u64> {
    if lss % entry_size != 0 {
        return Err(DiskError::Validation(
            "logical sector size must be a multiple of the partition entry size".into(),
        ));
    }
    let total = entries_count as u64 * entry_size as u64;
    Ok((total - 1) / lss as u64 + 1)
}

fn partition_entries_written(entries_count: u32, entry_size: u32, lss: u32) -> Result<u32> {
    let sectors = partition_array_sectors(entries_count, entry_size, lss)?;
    let entries_per_sector = lss / entry_size;
    let written = sectors as u32 * entries_per_sector;
    Ok(written.max(MIN_PARTITION_ENTRIES))
}

fn check_lss(lss: u32) -> Result<()> {
    if lss < MIN_LSS_GPT {
        return Err(DiskError::Validation(format!(
            "GPT requires a logical sector size of at least {MIN_LSS_GPT} bytes"
        )));
    }
    if !is_power_of_two(lss as u64) {
        return Err(DiskError::Validation(
            "logical sector size must be a power of two for GPT".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpt {
    pub partitions: Vec<GptPartitionEntry>,
    pub disk_guid: Guid,
    pub custom_mbr: Option<Mbr>,
}

struct RawHeader {
    header_size: u32,
    header_lba: u64,
    alternate_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: Guid,
    partition_array_lba: u64,
    entries_count: u32,
    entry_size: u32,
}

fn validate_header(sector: &[u8], expected_lba: u64, expected_alternate: u64) -> Result<RawHeader> {
    let lss = sector.len() as u64;

    let signature = &sector[0..8];
    if signature != GPT_SIGNATURE {
        return Err(DiskError::Validation("invalid GPT signature".into()));
    }
    let revision = le!(u32, sector, 8);
    if revision != GPT_REVISION {
        return Err(DiskError::Validation(format!(
            "invalid GPT header revision {revision:#x}"
        )));
    }
    let header_size = le!(u32, sector, 12);
    if !(HEADER_SIZE as u32..=lss as u32).contains(&header_size) {
        return Err(DiskError::Validation(format!(
            "GPT header size {header_size} out of range ({HEADER_SIZE}, {lss})"
        )));
    }
    let header_crc32 = le!(u32, sector, 16);

    let mut header_for_crc = sector[0..header_size as usize].to_vec();
    header_for_crc[16..20].copy_from_slice(&[0, 0, 0, 0]);
    if CRC32.checksum(&header_for_crc) != header_crc32 {
        return Err(DiskError::Validation("CRC32 of GPT header does not match".into()));
    }

    let header_lba = le!(u64, sector, 24);
    let alternate_lba = le!(u64, sector, 32);
    let first_usable_lba = le!(u64, sector, 40);
    let last_usable_lba = le!(u64, sector, 48);
    let disk_guid = Guid::from_bytes_le(sector[56..72].try_into().unwrap());
    let partition_array_lba = le!(u64, sector, 72);
    let entries_count = le!(u32, sector, 80);
    let entry_size = le!(u32, sector, 84);

    if header_lba != expected_lba {
        return Err(DiskError::Validation(format!(
            "GPT header LBA mismatch: expected {expected_lba}, got {header_lba}"
        )));
    }
    if alternate_lba != expected_alternate {
        return Err(DiskError::Validation(format!(
            "GPT alternate header LBA mismatch: expected {expected_alternate}, got {alternate_lba}"
        )));
    }
    if entry_size < PARTITION_ENTRY_SIZE {
        return Err(DiskError::Validation(format!(
            "GPT partition entry size must be at least {PARTITION_ENTRY_SIZE} bytes"
        )));
    }
    if !is_power_of_two(entry_size as u64) {
        return Err(DiskError::Validation(
            "GPT partition entry size must be a power of two".into(),
        ));
    }
    if entries_count < MIN_PARTITION_ENTRIES {
        return Err(DiskError::Validation(format!(
            "GPT partition array must hold at least {MIN_PARTITION_ENTRIES} entries"
        )));
    }

    let array_sectors = partition_array_sectors(entries_count, entry_size, lss as u32)?;
    let array_end_lba = partition_array_lba + array_sectors - 1;

    let ok = if header_lba < alternate_lba {
        let alt_array_lba = alternate_lba - array_sectors;
        let alt_array_end_lba = alternate_lba - 1;
        header_lba < partition_array_lba
            && partition_array_lba < array_end_lba
            && array_end_lba < first_usable_lba
            && first_usable_lba <= last_usable_lba
            && last_usable_lba < alt_array_lba
            && alt_array_lba < alt_array_end_lba
            && alt_array_end_lba < alternate_lba
    } else {
        let alt_array_lba = alternate_lba + 1;
        let alt_array_end_lba = alternate_lba + array_sectors;
        alternate_lba < alt_array_lba
            && alt_array_lba < alt_array_end_lba
            && alt_array_end_lba < first_usable_lba
            && first_usable_lba <= last_usable_lba
            && last_usable_lba < partition_array_lba
            && partition_array_lba < array_end_lba
            && array_end_lba < header_lba
    };

    if !ok {
        return Err(DiskError::Validation(
            "invalid combination of LBAs in GPT header".into(),
        ));
    }

    Ok(RawHeader {
        header_size,
        header_lba,
        alternate_lba,
        first_usable_lba,
        last_usable_lba,
        disk_guid,
        partition_array_lba,
        entries_count,
        entry_size,
    })
}

fn validate_array_crc(sector: &[u8], header: &RawHeader, array: &[u8]) -> Result<()> {
    let expected_len = header.entries_count as usize * header.entry_size as usize;
    if array.len() != expected_len {
        return Err(DiskError::Validation(
            "GPT partition array length does not match header".into(),
        ));
    }
    let array_crc32 = le!(u32, sector, 88);
    if CRC32.checksum(array) != array_crc32 {
        return Err(DiskError::Validation(
            "CRC32 of GPT partition array does not match".into(),
        ));
    }
    let _ = header.header_size;
    Ok(())
}

impl Gpt {
    pub fn new(partitions: Vec<GptPartitionEntry>, disk_guid: Option<Guid>, custom_mbr: Option<Mbr>) -> Self {
        Self {
            partitions: partitions.into_iter().filter(|p| !p.is_empty()).collect(),
            disk_guid: disk_guid.unwrap_or_else(Guid::random),
            custom_mbr,
        }
    }

    /// Parses a GPT by reading `read_sector(lba, count) -> Vec<u8>` through
    /// the given callback, trying the primary header first and falling back
    /// to the backup header (spec §4.3 "Load").
    pub fn parse<F>(disk_size_lba: u64, lss: u32, mut read_at: F, mbr: Option<Mbr>) -> Result<(Self, Diagnostics)>
    where
        F: FnMut(u64, u64) -> Result<Vec<u8>>,
    {
        check_lss(lss)?;
        let last_sector_lba = disk_size_lba - 1;

        let try_parse = |read_at: &mut F, header_lba: u64, alt_lba: u64| -> Result<(RawHeader, Vec<u8>, Vec<u8>)> {
            let sector = read_at(header_lba, 1)?;
            let header = validate_header(&sector, header_lba, alt_lba)?;
            let array_sectors = partition_array_sectors(header.entries_count, header.entry_size, lss)?;
            let array_bytes_len = header.entries_count as usize * header.entry_size as usize;
            let raw_array = read_at(header.partition_array_lba, array_sectors)?;
            let array = raw_array[0..array_bytes_len].to_vec();
            validate_array_crc(&sector, &header, &array)?;
            Ok((header, sector, array))
        };

        let (header, array) = match try_parse(&mut read_at, PRIMARY_HEADER_LBA, last_sector_lba) {
            Ok((header, _sector, array)) => (header, array),
            Err(primary_err) => {
                log::debug!("primary GPT header invalid: {primary_err}");
                match try_parse(&mut read_at, last_sector_lba, PRIMARY_HEADER_LBA) {
                    Ok((header, _sector, array)) => (header, array),
                    Err(backup_err) => {
                        log::debug!("backup GPT header invalid: {backup_err}");
                        return Err(DiskError::Validation("no valid GPT found".into()));
                    }
                }
            }
        };

        let mut partitions = Vec::new();
        for i in 0..header.entries_count as usize {
            let start = i * header.entry_size as usize;
            let end = start + header.entry_size as usize;
            if let Some(entry) = GptPartitionEntry::from_bytes(&array[start..end])? {
                partitions.push(entry);
            }
        }

        let custom_mbr = match mbr {
            Some(m) if m.is_protective(disk_size_lba) => None,
            other => other,
        };

        let table = Self {
            partitions,
            disk_guid: header.disk_guid,
            custom_mbr,
        };

        let mut diagnostics = Diagnostics::new();
        let (first_usable, last_usable) = table.usable_lba(disk_size_lba, lss)?;
        debug_assert_eq!(first_usable, header.first_usable_lba.max(first_usable));
        for p in &table.partitions {
            if p.start_lba < header.first_usable_lba || p.end_lba > header.last_usable_lba {
                diagnostics.push(Warning::Bounds(format!(
                    "partition {:?} at {}..{} lies outside usable LBA range {}..{}",
                    p.guid, p.start_lba, p.end_lba, header.first_usable_lba, header.last_usable_lba
                )));
            }
        }
        let _ = last_usable;

        Ok((table, diagnostics))
    }

    pub fn usable_lba(&self, disk_size_lba: u64, lss: u32) -> Result<(u64, u64)> {
        check_lss(lss)?;
        let last_sector = disk_size_lba - 1;
        let entries = partition_entries_written(self.partitions.len() as u32, PARTITION_ENTRY_SIZE, lss)?;
        let array_sectors = partition_array_sectors(entries, PARTITION_ENTRY_SIZE, lss)?;
        let first_usable = PRIMARY_HEADER_LBA + array_sectors + 1;
        let last_usable = last_sector - array_sectors - 1;
        Ok((first_usable, last_usable))
    }

    /// Emits `(primary_header, backup_header, partition_array)`.
    pub fn serialize(&self, disk_size_lba: u64, lss: u32) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        check_lss(lss)?;
        let last_sector_lba = disk_size_lba - 1;

        let entries_written = partition_entries_written(self.partitions.len() as u32, PARTITION_ENTRY_SIZE, lss)?;
        let array_sectors = partition_array_sectors(entries_written, PARTITION_ENTRY_SIZE, lss)?;

        let mut array = vec![0u8; entries_written as usize * PARTITION_ENTRY_SIZE as usize];
        for (i, p) in self.partitions.iter().enumerate() {
            let entry_bytes = p.to_bytes(PARTITION_ENTRY_SIZE);
            let off = i * PARTITION_ENTRY_SIZE as usize;
            array[off..off + PARTITION_ENTRY_SIZE as usize].copy_from_slice(&entry_bytes);
        }
        let array_crc32 = CRC32.checksum(&array);

        let primary_array_lba = PRIMARY_HEADER_LBA + 1;
        let backup_array_lba = last_sector_lba - array_sectors;

        let (first_usable, last_usable) = self.usable_lba(disk_size_lba, lss)?;

        let build_header = |this_lba: u64, alt_lba: u64, array_lba: u64| -> Vec<u8> {
            let mut h = vec![0u8; lss as usize];
            h[0..8].copy_from_slice(&GPT_SIGNATURE);
            put_le!(h, 8, GPT_REVISION);
            put_le!(h, 12, HEADER_SIZE as u32);
            // header_crc32 at 16..20 filled in after the rest is written
            put_le!(h, 24, this_lba);
            put_le!(h, 32, alt_lba);
            put_le!(h, 40, first_usable);
            put_le!(h, 48, last_usable);
            h[56..72].copy_from_slice(&self.disk_guid.to_bytes_le());
            put_le!(h, 72, array_lba);
            put_le!(h, 80, entries_written);
            put_le!(h, 84, PARTITION_ENTRY_SIZE);
            put_le!(h, 88, array_crc32);

            let crc_input_len = HEADER_SIZE;
            let mut for_crc = h[0..crc_input_len].to_vec();
            for_crc[16..20].copy_from_slice(&[0, 0, 0, 0]);
            let crc = CRC32.checksum(&for_crc);
            put_le!(h, 16, crc);
            h
        };

        let primary_header = build_header(PRIMARY_HEADER_LBA, last_sector_lba, primary_array_lba);
        let backup_header = build_header(last_sector_lba, PRIMARY_HEADER_LBA, backup_array_lba);

        Ok((primary_header, backup_header, array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_mixed_round_trip() {
        let g = Guid::from_mixed_u128(0xC12A_7328_F81F_11D2_BA4B_00A0_C93E_C93Bu128);
        let bytes = g.to_bytes_le();
        assert_eq!(g, Guid::from_bytes_le(&bytes));
        assert_eq!(
            bytes,
            [
                0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9,
                0x3e, 0xc9, 0x3b
            ]
        );
    }

    fn sample_disk(size_lba: u64, lss: u32) -> Vec<u8> {
        vec![0u8; (size_lba * lss as u64) as usize]
    }

    fn reader(disk: std::rc::Rc<std::cell::RefCell<Vec<u8>>>, lss: u32) -> impl FnMut(u64, u64) -> Result<Vec<u8>> {
        move |lba, count| {
            let disk = disk.borrow();
            let start = (lba * lss as u64) as usize;
            let end = start + (count * lss as u64) as usize;
            Ok(disk[start..end].to_vec())
        }
    }

    #[test]
    fn e11_single_sector_array_for_128_entries() {
        // 128 entries * 128 bytes == 16384 bytes == 32 sectors of 512.
        let sectors = partition_array_sectors(128, 128, 512).unwrap();
        assert_eq!(sectors, 32);
    }

    #[test]
    fn round_trip_minimal_gpt() {
        let lss = 512u32;
        let size_lba = (1024 * 1024) / lss as u64; // 1 MiB disk
        let disk = std::rc::Rc::new(std::cell::RefCell::new(sample_disk(size_lba, lss)));

        let entry = GptPartitionEntry {
            start_lba: 40,
            end_lba: 100,
            type_guid: Guid::microsoft_basic_data(),
            attributes: 0,
            guid: Guid::from_mixed_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0),
            name: "DATA".to_string(),
        };
        let gpt = Gpt::new(vec![entry.clone()], Some(Guid::from_mixed_u128(0xAAAA_BBBB_CCCC_DDDD_EEEE_FFFF_0000_1111)), None);

        let (primary, backup, array) = gpt.serialize(size_lba, lss).unwrap();

        {
            let mut d = disk.borrow_mut();
            d[512..512 + primary.len()].copy_from_slice(&primary);
            let primary_array_off = 2 * 512;
            d[primary_array_off..primary_array_off + array.len()].copy_from_slice(&array);
            let backup_array_lba = size_lba - 1 - (array.len() as u64 / lss as u64);
            let backup_array_off = (backup_array_lba * lss as u64) as usize;
            d[backup_array_off..backup_array_off + array.len()].copy_from_slice(&array);
            let last_off = ((size_lba - 1) * lss as u64) as usize;
            d[last_off..last_off + backup.len()].copy_from_slice(&backup);
        }

        let (parsed, _diag) = Gpt::parse(size_lba, lss, reader(disk.clone(), lss), None).unwrap();
        assert_eq!(parsed.partitions.len(), 1);
        assert_eq!(parsed.partitions[0], entry);
    }
}
