//! Throughput benchmarks for the hot paths spec §8 calls out as
//! performance-sensitive: FAT cluster-chain reads/writes and directory
//! lookups, mirroring `examples/rrbutani-fatfs`'s `criterion`-based
//! `benches/` layout.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use diskim::fat::filesystem::open_flags::{O_CREAT, O_RDONLY, O_WRONLY};
use diskim::fat::filesystem::FileSystem;
use diskim::fat::reserved::BootSector;
use diskim::sector::{MemStorage, SectorSize, SectorStore};

fn fixed_clock() -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// A larger FAT16 image than the unit-test fixtures: ~33000 data clusters
/// so multi-megabyte writes don't run the volume out of space.
fn fat16_image() -> MemStorage {
    let lss = 512u32;
    let sector_size = SectorSize::uniform(lss).unwrap();
    let total_sectors: u32 = 135_000;
    let mut store = MemStorage::new(total_sectors as u64 * lss as u64, sector_size);

    let mut buf = [0u8; 512];
    buf[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    buf[3..11].copy_from_slice(b"MSDOS5.0");
    buf[11..13].copy_from_slice(&(lss as u16).to_le_bytes());
    buf[13] = 4;
    buf[14..16].copy_from_slice(&4u16.to_le_bytes());
    buf[16] = 2;
    buf[17..19].copy_from_slice(&512u16.to_le_bytes());
    buf[19..21].copy_from_slice(&0u16.to_le_bytes()); // total_size_200 unused, see total_size_331 below
    buf[21] = 0xF8;
    buf[22..24].copy_from_slice(&132u16.to_le_bytes());
    buf[24..26].copy_from_slice(&63u16.to_le_bytes());
    buf[26..28].copy_from_slice(&255u16.to_le_bytes());
    buf[28..32].copy_from_slice(&0u32.to_le_bytes());
    buf[32..36].copy_from_slice(&total_sectors.to_le_bytes());
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

fn bench_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");
    for &size in &[4 * 1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let payload = vec![0xAB_u8; size];
            b.iter(|| {
                let fs = FileSystem::from_volume_with_clock(fat16_image(), true, fixed_clock).unwrap();
                let fd = fs.open_fd("/payload.bin", O_CREAT | O_WRONLY).unwrap();
                fs.write_fd(fd, &payload).unwrap();
                fs.close_fd(fd).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_sequential_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_read");
    for &size in &[4 * 1024usize, 64 * 1024, 1024 * 1024] {
        let fs = FileSystem::from_volume_with_clock(fat16_image(), true, fixed_clock).unwrap();
        let fd = fs.open_fd("/payload.bin", O_CREAT | O_WRONLY).unwrap();
        fs.write_fd(fd, &vec![0xCD_u8; size]).unwrap();
        fs.close_fd(fd).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut buf = vec![0u8; size];
            b.iter(|| {
                let fd = fs.open_fd("/payload.bin", O_RDONLY).unwrap();
                fs.read_fd(fd, &mut buf).unwrap();
                fs.close_fd(fd).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_directory_lookup(c: &mut Criterion) {
    let fs = FileSystem::from_volume_with_clock(fat16_image(), true, fixed_clock).unwrap();
    for i in 0..256 {
        let fd = fs.open_fd(&format!("/entry-{i:04}.bin"), O_CREAT | O_WRONLY).unwrap();
        fs.close_fd(fd).unwrap();
    }

    c.bench_function("stat_in_256_entry_directory", |b| {
        b.iter(|| fs.stat("/entry-0200.bin").unwrap());
    });
}

criterion_group!(benches, bench_sequential_write, bench_sequential_read, bench_directory_lookup);
criterion_main!(benches);
