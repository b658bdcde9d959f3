//! End-to-end `FileSystem` coverage over a synthesized FAT16 image
//! (spec §4.8, §8): directories, files, renames, and the fd table, driven
//! entirely through the public API.

use chrono::{NaiveDate, NaiveDateTime};
use diskim::fat::filesystem::open_flags::{O_CREAT, O_RDONLY, O_TRUNC, O_WRONLY};
use diskim::fat::filesystem::FileSystem;
use diskim::fat::reserved::BootSector;
use diskim::sector::{MemStorage, SectorSize, SectorStore};

fn fixed_clock() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap().and_hms_opt(9, 30, 0).unwrap()
}

/// A writable FAT16 image with 4200 data clusters (comfortably within
/// FAT16's cluster-count range), 4 sectors/cluster, 2 17-sector FATs.
fn fat16_image() -> MemStorage {
    let lss = 512u32;
    let sector_size = SectorSize::uniform(lss).unwrap();
    let total_sectors: u32 = 16870;
    let mut store = MemStorage::new(total_sectors as u64 * lss as u64, sector_size);

    let mut buf = [0u8; 512];
    buf[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    buf[3..11].copy_from_slice(b"MSDOS5.0");
    buf[11..13].copy_from_slice(&(lss as u16).to_le_bytes());
    buf[13] = 4;
    buf[14..16].copy_from_slice(&4u16.to_le_bytes());
    buf[16] = 2;
    buf[17..19].copy_from_slice(&512u16.to_le_bytes());
    buf[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
    buf[21] = 0xF8;
    buf[22..24].copy_from_slice(&17u16.to_le_bytes());
    buf[24..26].copy_from_slice(&63u16.to_le_bytes());
    buf[26..28].copy_from_slice(&255u16.to_le_bytes());
    buf[28..32].copy_from_slice(&0u32.to_le_bytes());
    buf[32..36].copy_from_slice(&0u32.to_le_bytes());
    buf[36] = 0x80;
    buf[37] = 0;
    buf[38] = 0x29;
    buf[39..43].copy_from_slice(&0x1234_5678u32.to_le_bytes());
    buf[43..54].copy_from_slice(b"NO NAME    ");
    buf[54..62].copy_from_slice(b"FAT16   ");
    buf[510] = 0x55;
    buf[511] = 0xAA;

    store.write_bytes(0, &buf).unwrap();
    let (boot_sector, _) = BootSector::parse(&buf).unwrap();
    store
        .write_bytes(boot_sector.fat_region_start() * lss as u64, &[0xF8, 0xFF, 0xFF, 0xFF])
        .unwrap();
    store
}

fn open_fs() -> FileSystem<MemStorage> {
    let _ = env_logger::builder().is_test(true).try_init();
    FileSystem::from_volume_with_clock(fat16_image(), true, fixed_clock).unwrap()
}

#[test]
fn create_write_read_and_stat_a_file() {
    let fs = open_fs();
    let fd = fs.open_fd("/greeting.txt", O_CREAT | O_WRONLY).unwrap();
    fs.write_fd(fd, b"hello, disk").unwrap();
    fs.close_fd(fd).unwrap();

    let stat = fs.stat("/greeting.txt").unwrap();
    assert_eq!(stat.size, 11);
    assert!(stat.is_file());

    let fd = fs.open_fd("/greeting.txt", O_RDONLY).unwrap();
    let mut buf = [0u8; 11];
    fs.read_fd(fd, &mut buf).unwrap();
    assert_eq!(&buf, b"hello, disk");
    fs.close_fd(fd).unwrap();
}

#[test]
fn nested_directories_are_listable() {
    let fs = open_fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    let fd = fs.open_fd("/a/b/c.bin", O_CREAT | O_WRONLY).unwrap();
    fs.close_fd(fd).unwrap();

    assert_eq!(fs.listdir("/a").unwrap(), vec!["b".to_string()]);
    assert_eq!(fs.listdir("/a/b").unwrap(), vec!["c.bin".to_string()]);
    assert!(fs.stat("/a/b").unwrap().is_dir());
}

#[test]
fn truncate_flag_empties_an_existing_file() {
    let fs = open_fs();
    let fd = fs.open_fd("/log.txt", O_CREAT | O_WRONLY).unwrap();
    fs.write_fd(fd, b"first run").unwrap();
    fs.close_fd(fd).unwrap();

    let fd = fs.open_fd("/log.txt", O_WRONLY | O_TRUNC).unwrap();
    fs.close_fd(fd).unwrap();
    assert_eq!(fs.stat("/log.txt").unwrap().size, 0);
}

#[test]
fn scandir_reflects_mutations_between_steps() {
    let fs = open_fs();
    fs.mkdir("/one").unwrap();
    let mut scan = fs.scandir("/").unwrap();
    let first = scan.next().unwrap().unwrap();
    assert_eq!(first.name, "one");

    // Mutating between scandir steps is allowed -- the iterator re-locks
    // per step rather than holding the file system for its lifetime.
    fs.mkdir("/two").unwrap();
    let names: Vec<String> = scan.map(|e| e.unwrap().name).collect();
    assert!(names.contains(&"two".to_string()));
}

#[test]
fn renaming_a_directory_preserves_its_children() {
    let fs = open_fs();
    fs.mkdir("/src").unwrap();
    let fd = fs.open_fd("/src/file.txt", O_CREAT | O_WRONLY).unwrap();
    fs.write_fd(fd, b"payload").unwrap();
    fs.close_fd(fd).unwrap();

    fs.rename("/src", "/dst").unwrap();
    assert_eq!(fs.listdir("/dst").unwrap(), vec!["file.txt".to_string()]);

    let fd = fs.open_fd("/dst/file.txt", O_RDONLY).unwrap();
    let mut buf = [0u8; 7];
    fs.read_fd(fd, &mut buf).unwrap();
    assert_eq!(&buf, b"payload");
    fs.close_fd(fd).unwrap();
}
