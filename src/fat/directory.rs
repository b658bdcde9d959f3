//! Directory entries: 8.3 (DOS) entries, VFAT long-filename entries, and the
//! generalized [`Entry`] that glues zero or more of the latter to one of the
//! former (spec §4.7).
//!
//! Grounded in `examples/original_source/diskfs/fat/directory.py`; codec
//! style (explicit byte-offset extraction) follows [`crate::util::codec`] and
//! the teacher's `fat/dir.rs`.

use std::fmt;
use std::num::Wrapping;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{DiskError, Result};
use crate::util::codec::{le, put_le};

pub const ENTRY_SIZE: usize = 32;
pub const MAX_VFAT_ENTRIES: usize = 20;

const DOS_FILENAME_FORBIDDEN: &str = "+,.;=[]";
const VFAT_FILENAME_MAX_LENGTH: usize = 255;
const VFAT_FIRST_LFN_ENTRY: u8 = 0b0100_0000;
const VFAT_ENTRY_NUMBER_MASK: u8 = 0b0001_1111;

const ACTUALLY_E5: u8 = 0x05;
const CASE_INFO_NAME_LOWER: u8 = 0b1000;
const CASE_INFO_EXT_LOWER: u8 = 0b10000;
const DOS_YEAR_MIN: i32 = 1980;
const DOS_YEAR_MAX: i32 = 2107;
const DOS_TIME_TEN_MS_MAX: u32 = 199;

/// Unicode codepoints for CP850 bytes 0x80-0xFF; bytes 0x00-0x7F are ASCII
/// identity. DOS filenames are stored in this OEM encoding -- see the note
/// in `directory.py` on why 850 was chosen as the (unknowable) default.
const CP850_HIGH: [char; 128] = [
    '\u{00c7}', '\u{00fc}', '\u{00e9}', '\u{00e2}', '\u{00e4}', '\u{00e0}', '\u{00e5}', '\u{00e7}',
    '\u{00ea}', '\u{00eb}', '\u{00e8}', '\u{00ef}', '\u{00ee}', '\u{00ec}', '\u{00c4}', '\u{00c5}',
    '\u{00c9}', '\u{00e6}', '\u{00c6}', '\u{00f4}', '\u{00f6}', '\u{00f2}', '\u{00fb}', '\u{00f9}',
    '\u{00ff}', '\u{00d6}', '\u{00dc}', '\u{00f8}', '\u{00a3}', '\u{00d8}', '\u{00d7}', '\u{0192}',
    '\u{00e1}', '\u{00ed}', '\u{00f3}', '\u{00fa}', '\u{00f1}', '\u{00d1}', '\u{00aa}', '\u{00ba}',
    '\u{00bf}', '\u{00ae}', '\u{00ac}', '\u{00bd}', '\u{00bc}', '\u{00a1}', '\u{00ab}', '\u{00bb}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{00c1}', '\u{00c2}', '\u{00c0}',
    '\u{00a9}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255d}', '\u{00a2}', '\u{00a5}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252c}', '\u{251c}', '\u{2500}', '\u{253c}', '\u{00e3}', '\u{00c3}',
    '\u{255a}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256c}', '\u{00a4}',
    '\u{00f0}', '\u{00d0}', '\u{00ca}', '\u{00cb}', '\u{00c8}', '\u{0131}', '\u{00cd}', '\u{00ce}',
    '\u{00cf}', '\u{2518}', '\u{250c}', '\u{2588}', '\u{2584}', '\u{00a6}', '\u{00cc}', '\u{2580}',
    '\u{00d3}', '\u{00df}', '\u{00d4}', '\u{00d2}', '\u{00f5}', '\u{00d5}', '\u{00b5}', '\u{00fe}',
    '\u{00de}', '\u{00da}', '\u{00db}', '\u{00d9}', '\u{00fd}', '\u{00dd}', '\u{00af}', '\u{00b4}',
    '\u{00ad}', '\u{00b1}', '\u{2017}', '\u{00be}', '\u{00b6}', '\u{00a7}', '\u{00f7}', '\u{00b8}',
    '\u{00b0}', '\u{00a8}', '\u{00b7}', '\u{00b9}', '\u{00b3}', '\u{00b2}', '\u{25a0}', '\u{00a0}',
];

/// Encodes `ch` to its CP850 byte, or `None` if `ch` is not representable.
fn cp850_encode(ch: char) -> Option<u8> {
    if (ch as u32) < 0x80 {
        return Some(ch as u8);
    }
    CP850_HIGH.iter().position(|&c| c == ch).map(|i| (i + 0x80) as u8)
}

/// Decodes a CP850 byte to a `char`. Every byte value is representable.
fn cp850_decode(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        CP850_HIGH[(byte - 0x80) as usize]
    }
}

fn cp850_encode_str(s: &str) -> std::result::Result<Vec<u8>, ()> {
    s.chars().map(|c| cp850_encode(c).ok_or(())).collect()
}

fn cp850_decode_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| cp850_decode(b)).collect()
}

/// Special meaning of the first byte of a short filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    EndOfEntries,
    DotEntry,
    Deleted,
}

impl Hint {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Hint::EndOfEntries),
            0x2E => Some(Hint::DotEntry),
            0xE5 => Some(Hint::Deleted),
            _ => None,
        }
    }
}

/// Directory entry attribute flags, packed into a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes(u8);

impl Attributes {
    pub const READ_ONLY: Attributes = Attributes(1 << 0);
    pub const HIDDEN: Attributes = Attributes(1 << 1);
    pub const SYSTEM: Attributes = Attributes(1 << 2);
    pub const VOLUME_LABEL: Attributes = Attributes(1 << 3);
    pub const SUBDIRECTORY: Attributes = Attributes(1 << 4);
    pub const ARCHIVE: Attributes = Attributes(1 << 5);
    pub const DEVICE: Attributes = Attributes(1 << 6);
    pub const RESERVED: Attributes = Attributes(1 << 7);

    /// `READ_ONLY | HIDDEN | SYSTEM | VOLUME_LABEL`: the fixed attribute byte
    /// that marks a directory entry as a VFAT long-filename fragment.
    pub const VFAT: Attributes = Attributes(
        Self::READ_ONLY.0 | Self::HIDDEN.0 | Self::SYSTEM.0 | Self::VOLUME_LABEL.0,
    );

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Attributes(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Attributes {
    type Output = Attributes;
    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

fn split_filename(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) => (&filename[..idx], &filename[idx + 1..]),
        None => (filename, ""),
    }
}

fn pack_dos_filename(filename: &str) -> Result<([u8; 8], [u8; 3])> {
    let (name_str, ext_str) = split_filename(filename);
    let name_bytes = cp850_encode_str(name_str)
        .map_err(|_| DiskError::Validation(format!("filename {filename:?} not representable in CP850")))?;
    let ext_bytes = cp850_encode_str(ext_str)
        .map_err(|_| DiskError::Validation(format!("filename {filename:?} not representable in CP850")))?;

    let mut name = [b' '; 8];
    name[..name_bytes.len()].copy_from_slice(&name_bytes);
    let mut ext = [b' '; 3];
    ext[..ext_bytes.len()].copy_from_slice(&ext_bytes);

    if name[0] == Hint::Deleted as u8 {
        name[0] = ACTUALLY_E5;
    }
    Ok((name, ext))
}

fn unpack_dos_filename(name_bytes: &[u8], ext_bytes: &[u8]) -> String {
    let mut name = name_bytes.to_vec();
    while name.last() == Some(&b' ') {
        name.pop();
    }
    let mut ext = ext_bytes.to_vec();
    while ext.last() == Some(&b' ') {
        ext.pop();
    }
    if name.first() == Some(&ACTUALLY_E5) {
        name[0] = Hint::Deleted as u8;
    }

    let name_str = cp850_decode_bytes(&name);
    let ext_str = cp850_decode_bytes(&ext);
    if ext_str.is_empty() {
        name_str
    } else {
        format!("{name_str}.{ext_str}")
    }
}

fn is_invalid_dos_character(ch: char) -> bool {
    if cp850_encode(ch).is_none() {
        return true;
    }
    DOS_FILENAME_FORBIDDEN.contains(ch) || ch.is_lowercase()
}

fn has_invalid_dos_character(filename: &str) -> bool {
    let (name, ext) = split_filename(filename);
    name.chars().any(is_invalid_dos_character) || ext.chars().any(is_invalid_dos_character)
}

fn is_valid_vfat_filename(filename: &str) -> bool {
    if filename.encode_utf16().count() == 0 {
        return false;
    }
    !filename.is_empty()
        && filename.chars().count() <= VFAT_FILENAME_MAX_LENGTH
        && !filename.ends_with(' ')
        && !filename.ends_with('.')
        && !filename.chars().any(|c| (c as u32) < 32 || "\"*/:<>?\\|\u{7F}".contains(c))
}

fn is_valid_dos_filename(filename: &str) -> bool {
    let (name, ext) = split_filename(filename);
    is_valid_vfat_filename(filename)
        && name.chars().count() <= 8
        && ext.chars().count() <= 3
        && !filename.starts_with('.')
        && !has_invalid_dos_character(filename)
}

fn check_vfat_filename(filename: &str) -> Result<()> {
    if !is_valid_vfat_filename(filename) {
        return Err(DiskError::Validation(format!("invalid filename {filename:?}")));
    }
    Ok(())
}

fn requires_vfat(filename: &str) -> bool {
    !is_valid_dos_filename(filename)
}

fn is_all_upper(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| !c.is_lowercase())
}

fn is_all_lower(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| !c.is_uppercase())
}

fn to_be_saved_as_vfat(filename: &str) -> bool {
    let (name, ext) = split_filename(filename);
    !(name.is_empty() || is_all_upper(name) || is_all_lower(name))
        || !(ext.is_empty() || is_all_upper(ext) || is_all_lower(ext))
        || !is_valid_dos_filename(&filename.to_uppercase())
}

fn get_case_info(filename: &str) -> u8 {
    let (name, ext) = split_filename(filename);
    let mut case_info = 0;
    if is_all_lower(name) {
        case_info |= CASE_INFO_NAME_LOWER;
    }
    if is_all_lower(ext) {
        case_info |= CASE_INFO_EXT_LOWER;
    }
    case_info
}

/// Windows-NT-compatible checksum of a VFAT filename, used to generate a
/// short-name tail when a DOS filename collision occurs. Reproduces the
/// exact 16/32/64-bit wrap-around arithmetic of the original; simplifying
/// this to big-integer math would produce different results.
fn vfat_filename_checksum(filename: &str) -> u16 {
    let mut checksum = Wrapping(0u16);
    for ch in filename.chars() {
        let char_int = cp850_encode(ch).unwrap_or(0xFE);
        checksum = Wrapping((((checksum.0 as u32).wrapping_mul(0x25)) & 0xFFFF) as u16)
            + Wrapping(char_int as u16);
    }

    let pi_thing = (checksum.0 as i32).wrapping_mul(314159269);
    let pi_thing = pi_thing.wrapping_abs();

    let shifted = (((pi_thing as i64).wrapping_mul(1152921497)) >> 60) as u64;
    let seven_thing = pi_thing.wrapping_sub((shifted as i32).wrapping_mul(1000000007));
    let checksum = seven_thing as u16;

    ((checksum & 0xF000) >> 12)
        | ((checksum & 0x0F00) >> 4)
        | ((checksum & 0x00F0) << 4)
        | ((checksum & 0x000F) << 12)
}

fn sanitize_dos_part(part: &str) -> String {
    let mut sanitized: Vec<char> = part.chars().filter(|&c| c != '.' && c != ' ').collect();
    for c in sanitized.iter_mut() {
        if is_invalid_dos_character(*c) {
            *c = '_';
        }
    }
    sanitized.into_iter().collect()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Generates a DOS short filename for `filename`, avoiding collisions with
/// any name already present among `existing_filenames`.
fn vfat_to_dos_filename<'a>(
    filename: &str,
    existing_filenames: impl Iterator<Item = &'a str> + Clone,
) -> Result<String> {
    let filename_upper = filename.to_uppercase();
    let (name, ext) = split_filename(&filename_upper);

    let name_sanitized = sanitize_dos_part(name);
    let ext_sanitized = sanitize_dos_part(ext);

    let sanitized = format!("{}.{}", take_chars(&name_sanitized, 8), take_chars(&ext_sanitized, 3));
    let sanitized = sanitized.trim_end_matches('.').to_string();
    let sanitizing_did_something = sanitized != filename_upper;

    if is_valid_dos_filename(&filename_upper) && !sanitizing_did_something {
        return Ok(filename_upper);
    }

    let (name_6, ext_3) = if filename.starts_with('.')
        && name.trim_start_matches('.').trim_start_matches(' ').is_empty()
    {
        (take_chars(&ext_sanitized, 6), String::new())
    } else {
        (take_chars(&name_sanitized, 6), take_chars(&ext_sanitized, 3))
    };

    let existing_names_ext_match: Vec<String> = existing_filenames
        .map(|fn_| {
            let (n, e) = split_filename(fn_);
            (n.to_string(), e.to_string())
        })
        .filter(|(_, e)| *e == ext_3)
        .map(|(n, _)| n)
        .collect();

    if name_6.chars().count() > 2 {
        for i in 1..5 {
            let proposed_name = format!("{name_6}~{i}");
            if !existing_names_ext_match.contains(&proposed_name) {
                let found = format!("{proposed_name}.{ext_3}");
                return Ok(found.trim_end_matches('.').to_string());
            }
        }
    }

    let checksum = vfat_filename_checksum(filename);
    let new_name_6 = format!("{}{checksum:04X}", take_chars(&name_6, 2));

    let len = new_name_6.chars().count();
    for char_count in (0..=len).rev() {
        let new_name_part = take_chars(&new_name_6, char_count);
        let exp = len - char_count;
        let lo = 10u32.pow(exp as u32);
        let hi = 10u32.pow((exp + 1) as u32);
        for i in lo..hi {
            let proposed_name = format!("{new_name_part}~{i}");
            if !existing_names_ext_match.contains(&proposed_name) {
                let found = format!("{proposed_name}.{ext_3}");
                return Ok(found.trim_end_matches('.').to_string());
            }
        }
    }

    Err(DiskError::FilesystemLimit(format!(
        "could not find a DOS filename for VFAT filename {filename:?}"
    )))
}

/// Checksum of a packed DOS filename, stored at VFAT entry offset 0x0D so a
/// reader can detect when the short name was changed by a non-VFAT-aware
/// system without updating the matching long-name entries.
fn dos_filename_checksum(name_bytes: &[u8], ext_bytes: &[u8]) -> u8 {
    let mut checksum = Wrapping(0u8);
    for &byte in name_bytes.iter().chain(ext_bytes) {
        checksum = Wrapping(((checksum.0 & 1) << 7).wrapping_add(checksum.0 >> 1).wrapping_add(byte));
    }
    checksum.0
}

/// Packs `dt` into `(date, time, time_ten_ms)` DOS datetime fields.
pub fn pack_dos_datetime(dt: NaiveDateTime) -> Result<(u16, u16, u8)> {
    let year = dt.year();
    if year < DOS_YEAR_MIN || year > DOS_YEAR_MAX {
        return Err(DiskError::Validation(format!("invalid DOS date {dt}")));
    }
    let date = (((year - DOS_YEAR_MIN) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() / 2) as u16;
    let time_ten_ms = ((dt.second() % 2) * 100 + dt.nanosecond() / 10_000_000) as u8;
    Ok((date, time, time_ten_ms))
}

/// Unpacks a DOS datetime, returning `None` if the fields don't represent a
/// valid calendar datetime (including the 199 sentinel for the 2-second
/// seconds-field resolution).
pub fn unpack_dos_datetime(date: u16, time: u16, time_ten_ms: u8) -> Option<NaiveDateTime> {
    if time_ten_ms as u32 >= DOS_TIME_TEN_MS_MAX {
        return None;
    }

    let y = ((date & 0b1111111000000000) >> 9) as i32 + DOS_YEAR_MIN;
    let m = ((date & 0b0000000111100000) >> 5) as u32;
    let d = (date & 0b0000000000011111) as u32;
    let hh = ((time & 0b1111100000000000) >> 11) as u32;
    let mm = ((time & 0b0000011111100000) >> 5) as u32;
    let ss = (time & 0b0000000000011111) as u32 * 2 + time_ten_ms as u32 / 100;
    let us = (time_ten_ms as u32 % 100) * 10_000;

    let date = NaiveDate::from_ymd_opt(y, m, d)?;
    let time = NaiveTime::from_hms_micro_opt(hh, mm, ss, us)?;
    Some(NaiveDateTime::new(date, time))
}

/// 32-byte 8.3 directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EightDotThreeEntry {
    pub name: [u8; 8],
    pub extension: [u8; 3],
    attributes_raw: u8,
    pub case_info_vfat: u8,
    pub created_time_ten_ms: u8,
    pub created_time: u16,
    pub created_date: u16,
    pub last_accessed_date: u16,
    cluster_high_fat32: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    cluster_low: u16,
    pub size: u32,
}

impl EightDotThreeEntry {
    pub fn parse(buf: &[u8; ENTRY_SIZE]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&buf[0..8]);
        let mut extension = [0u8; 3];
        extension.copy_from_slice(&buf[8..11]);
        EightDotThreeEntry {
            name,
            extension,
            attributes_raw: buf[11],
            case_info_vfat: buf[12],
            created_time_ten_ms: buf[13],
            created_time: le!(u16, buf, 14),
            created_date: le!(u16, buf, 16),
            last_accessed_date: le!(u16, buf, 18),
            cluster_high_fat32: le!(u16, buf, 20),
            last_modified_time: le!(u16, buf, 22),
            last_modified_date: le!(u16, buf, 24),
            cluster_low: le!(u16, buf, 26),
            size: le!(u32, buf, 28),
        }
    }

    pub fn serialize(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.name);
        buf[8..11].copy_from_slice(&self.extension);
        buf[11] = self.attributes_raw;
        buf[12] = self.case_info_vfat;
        buf[13] = self.created_time_ten_ms;
        put_le!(buf, 14, self.created_time);
        put_le!(buf, 16, self.created_date);
        put_le!(buf, 18, self.last_accessed_date);
        put_le!(buf, 20, self.cluster_high_fat32);
        put_le!(buf, 22, self.last_modified_time);
        put_le!(buf, 24, self.last_modified_date);
        put_le!(buf, 26, self.cluster_low);
        put_le!(buf, 28, self.size);
        buf
    }

    pub fn filename(&self, vfat: bool) -> String {
        let unpacked = unpack_dos_filename(&self.name, &self.extension);
        if !vfat {
            return unpacked.trim_end_matches('.').to_string();
        }
        let (name, ext) = split_filename(&unpacked);
        let mut name = name.to_string();
        let mut ext = ext.to_string();
        if self.case_info_vfat & CASE_INFO_NAME_LOWER != 0 {
            name = name.to_lowercase();
        }
        if self.case_info_vfat & CASE_INFO_EXT_LOWER != 0 {
            ext = ext.to_lowercase();
        }
        format!("{name}.{ext}").trim_end_matches('.').to_string()
    }

    pub fn dos_filename(&self) -> String {
        unpack_dos_filename(&self.name, &self.extension)
            .trim_end_matches('.')
            .to_string()
    }

    pub fn cluster(&self, fat_32: bool) -> u32 {
        if !fat_32 {
            self.cluster_low as u32
        } else {
            ((self.cluster_high_fat32 as u32) << 16) | self.cluster_low as u32
        }
    }

    pub fn hint(&self) -> Option<Hint> {
        Hint::from_byte(self.name[0])
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attributes_raw)
    }

    pub fn volume_label(&self) -> bool {
        self.attributes().contains(Attributes::VOLUME_LABEL) && self.attributes() != Attributes::VFAT
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        unpack_dos_datetime(self.created_date, self.created_time, self.created_time_ten_ms)
    }

    pub fn last_accessed(&self) -> Option<NaiveDateTime> {
        unpack_dos_datetime(self.last_accessed_date, 0, 0)
    }

    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        unpack_dos_datetime(self.last_modified_date, self.last_modified_time, 0)
    }
}

/// 32-byte VFAT long-filename fragment entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfatEntry {
    pub seq: u8,
    pub chars_1: [u8; 10],
    pub attributes: u8,
    pub kind: u8,
    pub checksum: u8,
    pub chars_2: [u8; 12],
    pub cluster: u16,
    pub chars_3: [u8; 4],
}

impl VfatEntry {
    pub fn parse(buf: &[u8; ENTRY_SIZE]) -> Result<Self> {
        let mut chars_1 = [0u8; 10];
        chars_1.copy_from_slice(&buf[1..11]);
        let mut chars_2 = [0u8; 12];
        chars_2.copy_from_slice(&buf[14..26]);
        let mut chars_3 = [0u8; 4];
        chars_3.copy_from_slice(&buf[28..32]);
        let entry = VfatEntry {
            seq: buf[0],
            chars_1,
            attributes: buf[11],
            kind: buf[12],
            checksum: buf[13],
            chars_2,
            cluster: le!(u16, buf, 26),
            chars_3,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn serialize(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.seq;
        buf[1..11].copy_from_slice(&self.chars_1);
        buf[11] = self.attributes;
        buf[12] = self.kind;
        buf[13] = self.checksum;
        buf[14..26].copy_from_slice(&self.chars_2);
        put_le!(buf, 26, self.cluster);
        buf[28..32].copy_from_slice(&self.chars_3);
        buf
    }

    fn validate(&self) -> Result<()> {
        if Attributes::from_bits_truncate(self.attributes) != Attributes::VFAT {
            return Err(DiskError::Validation(format!(
                "invalid attributes {:#x} for VFAT entry",
                self.attributes
            )));
        }
        let number = self.number();
        if !(1..=MAX_VFAT_ENTRIES as u8).contains(&number) {
            return Err(DiskError::Validation(format!(
                "sequence number {number} out of range (1, {MAX_VFAT_ENTRIES})"
            )));
        }
        if self.cluster != 0 {
            return Err(DiskError::Validation("cluster number in VFAT entry must be 0".into()));
        }
        Ok(())
    }

    pub fn first_lfn_entry(&self) -> bool {
        self.seq & VFAT_FIRST_LFN_ENTRY != 0
    }

    pub fn number(&self) -> u8 {
        self.seq & VFAT_ENTRY_NUMBER_MASK
    }
}

/// A directory entry: always one 8.3 entry, optionally preceded on disk by up
/// to 20 VFAT long-filename fragments (stored here in physical order).
#[derive(Debug, Clone)]
pub struct Entry {
    eight_dot_three: EightDotThreeEntry,
    vfat_entries: Vec<VfatEntry>,
    vfat: bool,
    fat_32: bool,
}

impl Entry {
    pub fn new(
        eight_dot_three: EightDotThreeEntry,
        vfat_entries: Vec<VfatEntry>,
        vfat: bool,
        fat_32: bool,
    ) -> Result<Self> {
        if !vfat_entries.is_empty() && !vfat {
            return Err(DiskError::Validation(
                "VFAT entries passed but VFAT support is disabled".into(),
            ));
        }
        if eight_dot_three.hint().is_some() {
            return Err(DiskError::Validation(format!(
                "8.3 entry must not be a special entry with hint {:?}",
                eight_dot_three.hint()
            )));
        }
        if eight_dot_three.volume_label() {
            return Err(DiskError::Validation("8.3 entry must not be a volume label entry".into()));
        }
        if eight_dot_three.attributes().contains(Attributes::VFAT) {
            return Err(DiskError::Validation("8.3 entry must not be a VFAT entry".into()));
        }
        if vfat_entries.len() > MAX_VFAT_ENTRIES {
            return Err(DiskError::Validation(format!(
                "VFAT entry chain must not contain more than {MAX_VFAT_ENTRIES} entries"
            )));
        }

        if !vfat_entries.is_empty() {
            if !vfat_entries[0].first_lfn_entry() {
                return Err(DiskError::Validation(
                    "first VFAT entry does not have bit 6 of sequence number set".into(),
                ));
            }
            let expected_checksum = dos_filename_checksum(&eight_dot_three.name, &eight_dot_three.extension);
            for vfat_entry in &vfat_entries {
                if vfat_entry.checksum != expected_checksum {
                    return Err(DiskError::Validation(
                        "checksum in VFAT entry does not match checksum of DOS filename".into(),
                    ));
                }
            }
        }

        Ok(Entry {
            eight_dot_three,
            vfat_entries,
            vfat,
            fat_32,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((self.vfat_entries.len() + 1) * ENTRY_SIZE);
        for v in &self.vfat_entries {
            bytes.extend_from_slice(&v.serialize());
        }
        bytes.extend_from_slice(&self.eight_dot_three.serialize());
        bytes
    }

    pub fn filename(&self) -> String {
        if !self.vfat_entries.is_empty() {
            let mut units: Vec<u16> = Vec::with_capacity(self.vfat_entries.len() * 13);
            for v in self.vfat_entries.iter().rev() {
                for chunk in v.chars_1.chunks_exact(2) {
                    units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
                }
                for chunk in v.chars_2.chunks_exact(2) {
                    units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
                }
                for chunk in v.chars_3.chunks_exact(2) {
                    units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
                }
            }
            let filename = String::from_utf16_lossy(&units);
            return filename
                .trim_end_matches(['\u{0}', '\u{ffff}'])
                .trim_end_matches(['.', ' '])
                .to_string();
        }
        self.eight_dot_three.filename(self.vfat)
    }

    pub fn dos_filename(&self) -> String {
        self.eight_dot_three.dos_filename()
    }

    pub fn cluster(&self) -> u32 {
        self.eight_dot_three.cluster(self.fat_32)
    }

    pub fn attributes(&self) -> Attributes {
        self.eight_dot_three.attributes()
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        self.eight_dot_three.created()
    }

    pub fn last_accessed(&self) -> Option<NaiveDateTime> {
        self.eight_dot_three.last_accessed()
    }

    pub fn last_modified(&self) -> Option<NaiveDateTime> {
        self.eight_dot_three.last_modified()
    }

    pub fn size(&self) -> u32 {
        self.eight_dot_three.size
    }

    pub fn total_entries(&self) -> usize {
        1 + self.vfat_entries.len()
    }

    pub fn eight_dot_three(&self) -> &EightDotThreeEntry {
        &self.eight_dot_three
    }

    pub fn vfat_entries(&self) -> &[VfatEntry] {
        &self.vfat_entries
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.eight_dot_three == other.eight_dot_three
            && self.vfat_entries == other.vfat_entries
            && self.vfat == other.vfat
            && self.fat_32 == other.fat_32
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entry({:?}, dos_filename={:?}, attributes={:?}, cluster={}, size={}, total_entries={})",
            self.filename(),
            self.dos_filename(),
            self.attributes(),
            self.cluster(),
            self.size(),
            self.total_entries()
        )
    }
}

/// Checks whether `part` matches the filename stored in `entry` (case
/// insensitively), falling back to the DOS filename when VFAT is enabled.
pub fn entry_match(part: &str, entry: &Entry, vfat: bool) -> bool {
    part.to_uppercase() == entry.filename().to_uppercase()
        || (vfat && part.to_uppercase() == entry.dos_filename())
}

/// Outcome of parsing one 32-byte slot in [`iter_entries`].
#[derive(Debug, Clone)]
pub enum ParsedEntry {
    Useful(Entry),
    Raw(EightDotThreeEntry),
}

/// Parses a directory region, chunked into 32-byte slots, into a stream of
/// entries. When `only_useful` is true, only [`ParsedEntry::Useful`] values
/// are produced (deleted/dot/volume-label/orphaned-VFAT slots are dropped
/// rather than surfaced as [`ParsedEntry::Raw`]). Stops (without yielding the
/// terminator) at the first end-of-entries marker.
pub fn iter_entries(
    slots: impl Iterator<Item = [u8; ENTRY_SIZE]>,
    only_useful: bool,
    vfat: bool,
    fat_32: bool,
) -> Result<Vec<ParsedEntry>> {
    let mut out = Vec::new();
    let mut pending_edt_entries: Vec<EightDotThreeEntry> = Vec::new();
    let mut pending_vfat_entries: Vec<VfatEntry> = Vec::new();

    macro_rules! flush_pending_raw {
        () => {
            if !only_useful {
                for e in pending_edt_entries.drain(..) {
                    out.push(ParsedEntry::Raw(e));
                }
            } else {
                pending_edt_entries.clear();
            }
        };
    }

    for entry_bytes in slots {
        let edt_entry = EightDotThreeEntry::parse(&entry_bytes);

        if edt_entry.hint() == Some(Hint::EndOfEntries) {
            flush_pending_raw!();
            pending_vfat_entries.clear();
            break;
        }

        if matches!(edt_entry.hint(), Some(Hint::Deleted) | Some(Hint::DotEntry)) || edt_entry.volume_label() {
            flush_pending_raw!();
            if !only_useful {
                out.push(ParsedEntry::Raw(edt_entry));
            }
            pending_vfat_entries.clear();
        } else if edt_entry.attributes().contains(Attributes::VFAT) {
            if vfat {
                if !only_useful {
                    pending_edt_entries.push(edt_entry);
                }
                match VfatEntry::parse(&entry_bytes) {
                    Ok(v) => pending_vfat_entries.push(v),
                    Err(_) => {
                        log::warn!("failed to parse VFAT entry {edt_entry:?}");
                        flush_pending_raw!();
                        pending_vfat_entries.clear();
                    }
                }
            } else if !only_useful {
                out.push(ParsedEntry::Raw(edt_entry));
            }
        } else {
            let taken_vfat = std::mem::take(&mut pending_vfat_entries);
            match Entry::new(edt_entry, taken_vfat, vfat, fat_32) {
                Ok(entry) => out.push(ParsedEntry::Useful(entry)),
                Err(_) => {
                    log::warn!("discarded VFAT entries for 8.3 entry {:?}", edt_entry.dos_filename());
                    flush_pending_raw!();
                    out.push(ParsedEntry::Useful(Entry::new(edt_entry, Vec::new(), vfat, fat_32)?));
                }
            }
            pending_edt_entries.clear();
        }
    }

    Ok(out)
}

/// Creates a new entry for a directory whose existing entries are
/// `existing_entries`; used by create/mkdir operations.
#[allow(clippy::too_many_arguments)]
pub fn create_entry(
    existing_entries: &[Entry],
    filename: &str,
    attributes: Attributes,
    created: NaiveDateTime,
    last_accessed: NaiveDateTime,
    last_modified: NaiveDateTime,
    cluster: u32,
    size: u32,
    vfat: bool,
    fat_32: bool,
) -> Result<Entry> {
    if attributes.contains(Attributes::VOLUME_LABEL) {
        return Err(DiskError::Validation("new entry must not have the volume label attribute".into()));
    }

    let filename = filename.trim_end_matches(['.', ' ']);
    check_vfat_filename(filename)?;
    let needs_vfat = requires_vfat(filename);
    let as_vfat = to_be_saved_as_vfat(filename);

    if needs_vfat && !vfat {
        return Err(DiskError::Validation(format!("file name {filename:?} requires VFAT")));
    }

    for entry in existing_entries {
        if entry_match(filename, entry, vfat) {
            return Err(DiskError::AlreadyExists(format!("file with name {filename:?} already exists")));
        }
    }

    let mut case_info = 0u8;
    let mut vfat_entries = Vec::new();
    let dos_filename: String;

    if needs_vfat && as_vfat {
        let existing_dos: Vec<String> = existing_entries.iter().map(|e| e.dos_filename()).collect();
        dos_filename = vfat_to_dos_filename(filename, existing_dos.iter().map(|s| s.as_str()))?;

        let units: Vec<u16> = filename.encode_utf16().collect();
        let chunk_starts: Vec<usize> = (0..units.len().max(1)).step_by(13).collect();
        let (packed_name, packed_ext) = pack_dos_filename(&dos_filename)?;
        let checksum = dos_filename_checksum(&packed_name, &packed_ext);

        for (physical_index, &start) in chunk_starts.iter().rev().enumerate() {
            let end = (start + 13).min(units.len());
            let mut chars_units: Vec<u16> = units[start..end].to_vec();
            let seq_logical = (start / 13) as u8 + 1;
            let mut seq = seq_logical;

            if physical_index == 0 {
                if chars_units.len() < 13 {
                    chars_units.push(0x0000);
                }
                while chars_units.len() < 13 {
                    chars_units.push(0xFFFF);
                }
                seq |= VFAT_FIRST_LFN_ENTRY;
            }

            let mut chars = Vec::with_capacity(26);
            for u in &chars_units {
                chars.extend_from_slice(&u.to_le_bytes());
            }

            let mut chars_1 = [0u8; 10];
            chars_1.copy_from_slice(&chars[0..10]);
            let mut chars_2 = [0u8; 12];
            chars_2.copy_from_slice(&chars[10..22]);
            let mut chars_3 = [0u8; 4];
            chars_3.copy_from_slice(&chars[22..26]);

            vfat_entries.push(VfatEntry {
                seq,
                chars_1,
                attributes: Attributes::VFAT.bits(),
                kind: 0,
                checksum,
                chars_2,
                cluster: 0,
                chars_3,
            });
        }
    } else if needs_vfat && !as_vfat {
        dos_filename = filename.to_uppercase();
        case_info = get_case_info(filename);
    } else {
        dos_filename = filename.to_string();
    }

    let (packed_name, packed_ext) = pack_dos_filename(&dos_filename)?;
    let (created_date, created_time, created_time_ten_ms) = pack_dos_datetime(created)?;
    let (last_accessed_date, _, _) = pack_dos_datetime(last_accessed)?;
    let (last_modified_date, last_modified_time, _) = pack_dos_datetime(last_modified)?;

    // Spec's start-cluster field is "low 16 bits of start cluster"; masking
    // to 8 bits here (as the Python source does) would silently corrupt any
    // cluster number above 255.
    let cluster_low = (cluster & 0xFFFF) as u16;
    let cluster_high = (cluster >> 16) as u16;

    if !fat_32 && cluster_high != 0 {
        return Err(DiskError::Validation(
            "high bits of cluster number can only be used on FAT32 file systems".into(),
        ));
    }

    let edt_entry = EightDotThreeEntry {
        name: packed_name,
        extension: packed_ext,
        attributes_raw: attributes.bits(),
        case_info_vfat: case_info,
        created_time_ten_ms,
        created_time,
        created_date,
        last_accessed_date,
        cluster_high_fat32: cluster_high,
        last_modified_time,
        last_modified_date,
        cluster_low,
        size,
    };
    Entry::new(edt_entry, vfat_entries, vfat, fat_32)
}

/// Returns a copy of `entry` with the given fields replaced; `None` means
/// "leave unchanged". Returns `entry` itself (cloned) if every field is
/// `None`.
pub fn updated_entry(
    entry: &Entry,
    new_cluster: Option<u32>,
    new_size: Option<u32>,
    last_accessed: Option<NaiveDateTime>,
    last_modified: Option<NaiveDateTime>,
    vfat: bool,
    fat_32: bool,
) -> Result<Entry> {
    if new_cluster.is_none() && new_size.is_none() && last_accessed.is_none() && last_modified.is_none() {
        return Ok(entry.clone());
    }

    let mut edt = entry.eight_dot_three;

    if let Some(cluster) = new_cluster {
        let cluster_low = (cluster & 0xFFFF) as u16;
        let cluster_high = (cluster >> 16) as u16;
        if !fat_32 && cluster_high != 0 {
            return Err(DiskError::Validation(
                "high bits of cluster number can only be used on FAT32 file systems".into(),
            ));
        }
        edt.cluster_low = cluster_low;
        edt.cluster_high_fat32 = cluster_high;
    }

    if let Some(size) = new_size {
        edt.size = size;
    }

    if let Some(last_accessed) = last_accessed {
        let (date, _, _) = pack_dos_datetime(last_accessed)?;
        edt.last_accessed_date = date;
    }

    if let Some(last_modified) = last_modified {
        let (date, time, _) = pack_dos_datetime(last_modified)?;
        edt.last_modified_date = date;
        edt.last_modified_time = time;
    }

    Entry::new(edt, entry.vfat_entries.clone(), vfat, fat_32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(hh, mm, ss).unwrap()
    }

    #[test]
    fn dos_datetime_round_trip() {
        let original = dt(2024, 3, 17, 13, 45, 30);
        let (date, time, ten_ms) = pack_dos_datetime(original).unwrap();
        let back = unpack_dos_datetime(date, time, ten_ms).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn dos_datetime_year_out_of_range_rejected() {
        let too_early = dt(1970, 1, 1, 0, 0, 0);
        assert!(pack_dos_datetime(too_early).is_err());
    }

    #[test]
    fn dos_datetime_ten_ms_sentinel_is_invalid() {
        assert!(unpack_dos_datetime(0x0021, 0, 199).is_none());
    }

    #[test]
    fn short_filename_round_trips() {
        let (name, ext) = pack_dos_filename("HELLO.TXT").unwrap();
        assert_eq!(unpack_dos_filename(&name, &ext), "HELLO.TXT");
    }

    #[test]
    fn cp850_high_byte_round_trips() {
        let ch = cp850_decode(0x80);
        assert_eq!(ch, '\u{00c7}');
        assert_eq!(cp850_encode(ch), Some(0x80));
    }

    #[test]
    fn lowercase_filename_requires_vfat() {
        assert!(requires_vfat("hello.txt"));
        assert!(!requires_vfat("HELLO.TXT"));
    }

    #[test]
    fn mixed_case_single_part_uses_case_info_not_lfn() {
        assert!(!to_be_saved_as_vfat("hello.txt"));
        assert!(to_be_saved_as_vfat("Hello.txt"));
    }

    #[test]
    fn create_entry_sets_case_info_for_lowercase_dos_name() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let entry = create_entry(&[], "hello.txt", Attributes::ARCHIVE, now, now, now, 0, 0, true, false).unwrap();
        assert_eq!(entry.filename(), "hello.txt");
        assert_eq!(entry.dos_filename(), "HELLO.TXT");
        assert!(entry.vfat_entries().is_empty());
    }

    #[test]
    fn create_entry_generates_vfat_chain_for_long_name() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let long_name = "a very long file name indeed.txt";
        let entry = create_entry(&[], long_name, Attributes::ARCHIVE, now, now, now, 0, 0, true, false).unwrap();
        assert_eq!(entry.filename(), long_name);
        assert!(!entry.vfat_entries().is_empty());
        assert!(entry.dos_filename().contains('~'));
    }

    #[test]
    fn create_entry_without_vfat_rejects_long_name() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let err = create_entry(&[], "a very long file name.txt", Attributes::ARCHIVE, now, now, now, 0, 0, false, false);
        assert!(err.is_err());
    }

    #[test]
    fn create_entry_rejects_duplicate_name() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let first = create_entry(&[], "FILE.TXT", Attributes::ARCHIVE, now, now, now, 0, 0, true, false).unwrap();
        let err = create_entry(&[first], "FILE.TXT", Attributes::ARCHIVE, now, now, now, 0, 0, true, false);
        assert!(matches!(err, Err(DiskError::AlreadyExists(_))));
    }

    #[test]
    fn create_entry_cluster_low_masks_full_16_bits() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let entry = create_entry(&[], "FILE.TXT", Attributes::ARCHIVE, now, now, now, 0x1_2345, 0, true, true).unwrap();
        assert_eq!(entry.cluster(), 0x1_2345);
    }

    #[test]
    fn updated_entry_changes_cluster_and_size() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let entry = create_entry(&[], "FILE.TXT", Attributes::ARCHIVE, now, now, now, 5, 10, true, true).unwrap();
        let updated = updated_entry(&entry, Some(99), Some(4096), None, None, true, true).unwrap();
        assert_eq!(updated.cluster(), 99);
        assert_eq!(updated.size(), 4096);
    }

    #[test]
    fn iter_entries_stops_at_end_marker() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let entry = create_entry(&[], "A.TXT", Attributes::ARCHIVE, now, now, now, 0, 0, true, false).unwrap();
        let mut bytes = entry.to_bytes();
        bytes.extend_from_slice(&[0u8; ENTRY_SIZE]);
        bytes.extend_from_slice(&[0xFFu8; ENTRY_SIZE]); // would be garbage past the terminator

        let slots: Vec<[u8; ENTRY_SIZE]> = bytes
            .chunks_exact(ENTRY_SIZE)
            .map(|c| c.try_into().unwrap())
            .collect();
        let parsed = iter_entries(slots.into_iter(), true, true, false).unwrap();
        assert_eq!(parsed.len(), 1);
        match &parsed[0] {
            ParsedEntry::Useful(e) => assert_eq!(e.filename(), "A.TXT"),
            ParsedEntry::Raw(_) => panic!("expected a useful entry"),
        }
    }

    #[test]
    fn entry_match_is_case_insensitive() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let entry = create_entry(&[], "File.txt", Attributes::ARCHIVE, now, now, now, 0, 0, true, false).unwrap();
        assert!(entry_match("FILE.TXT", &entry, true));
        assert!(entry_match("file.txt", &entry, true));
    }

    /// Property 12: inserting `caffeine_01`..`caffeine_20` one at a time
    /// exhausts the `~1`..`~4` tilde forms on the first four (they share
    /// the same 6-char truncated base "CAFFEI"), then falls back to the
    /// checksum-tail scheme for the rest; every one of the 20 resolves to
    /// a distinct short name, and `caffeine` on its own keeps its literal
    /// identity ("CAFFEINE") rather than colliding with the tilde set.
    #[test]
    fn short_name_collision_sweep_exhausts_tilde_then_falls_back_to_checksum() {
        let mut existing: Vec<String> = Vec::new();
        let mut assigned: Vec<String> = Vec::new();

        for i in 1..=20u32 {
            let long_name = format!("caffeine_{i:02}");
            let short = vfat_to_dos_filename(&long_name, existing.iter().map(|s| s.as_str())).unwrap();
            assigned.push(short.clone());
            existing.push(short);
        }

        assert_eq!(assigned[0], "CAFFEI~1");
        assert_eq!(assigned[1], "CAFFEI~2");
        assert_eq!(assigned[2], "CAFFEI~3");
        assert_eq!(assigned[3], "CAFFEI~4");

        // All 20 short names are distinct: the checksum-tail fallback
        // never collides with the tilde forms or with each other.
        let mut unique = assigned.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), assigned.len());

        // "caffeine" alone needs no disambiguation and keeps its own
        // identity, independent of the ~1..~20 sequence above.
        let plain = vfat_to_dos_filename("caffeine", existing.iter().map(|s| s.as_str())).unwrap();
        assert_eq!(plain, "CAFFEINE");
    }

    /// E4: a 31-character long name needs ceil(31/13) = 3 VFAT fragments,
    /// written on disk with descending sequence numbers and the last-LFN
    /// bit (0x40) set only on the first (highest-numbered) fragment; every
    /// fragment's checksum matches the DOS short name's checksum.
    #[test]
    fn long_filename_produces_three_vfat_fragments_with_matching_checksums() {
        let now = dt(2024, 1, 1, 0, 0, 0);
        let long_name = "Un archivo con nombre largo.dat";
        let entry =
            create_entry(&[], long_name, Attributes::ARCHIVE, now, now, now, 0, 0, true, false).unwrap();

        assert_eq!(entry.filename(), long_name);
        assert_eq!(entry.dos_filename(), "UNARCH~1.DAT");

        let vfat = entry.vfat_entries();
        assert_eq!(vfat.len(), 3);
        assert_eq!(vfat[0].seq, 0x43);
        assert_eq!(vfat[1].seq, 0x02);
        assert_eq!(vfat[2].seq, 0x01);

        let expected_checksum =
            dos_filename_checksum(&entry.eight_dot_three().name, &entry.eight_dot_three().extension);
        for fragment in vfat {
            assert_eq!(fragment.checksum, expected_checksum);
        }
    }
}
