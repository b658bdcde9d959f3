//! MBR round-trip and overlap-detection coverage (spec §4.2, §8).

use diskim::table::mbr::{Mbr, MbrPartitionEntry};

#[test]
fn protective_mbr_round_trips() {
    let disk_lba = 1_000_000u64;
    let mbr = Mbr::protective(disk_lba);
    assert!(mbr.is_protective(disk_lba));

    let bytes = mbr.serialize().unwrap();
    let (parsed, diagnostics) = Mbr::parse(&bytes, disk_lba).unwrap();
    assert!(diagnostics.is_empty());
    assert!(parsed.is_protective(disk_lba));
}

#[test]
fn two_partition_mbr_round_trips() {
    let disk_lba = 2_000_000u64;
    let mbr = Mbr {
        partitions: vec![
            MbrPartitionEntry { start_lba: 2048, length_lba: 500_000, partition_type: 0x83, bootable: true },
            MbrPartitionEntry { start_lba: 502_048, length_lba: 500_000, partition_type: 0x0C, bootable: false },
        ],
        boot_code: vec![0u8; 446],
    };

    let bytes = mbr.serialize().unwrap();
    let (parsed, diagnostics) = Mbr::parse(&bytes, disk_lba).unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(parsed.partitions.len(), 2);
    assert_eq!(parsed.partitions[0].start_lba, 2048);
    assert!(parsed.partitions[0].bootable);
    assert!(!parsed.partitions[1].bootable);
}

#[test]
fn overlapping_partitions_rejected_on_serialize() {
    let mbr = Mbr {
        partitions: vec![
            MbrPartitionEntry { start_lba: 2048, length_lba: 1000, partition_type: 0x83, bootable: false },
            MbrPartitionEntry { start_lba: 2500, length_lba: 1000, partition_type: 0x83, bootable: false },
        ],
        boot_code: vec![0u8; 446],
    };
    assert!(mbr.serialize().is_err());
}

#[test]
fn overlapping_partitions_only_warn_on_parse() {
    let disk_lba = 100_000u64;
    let mut bytes = [0u8; 512];
    bytes[510] = 0x55;
    bytes[511] = 0xAA;

    // Hand-write two overlapping entries directly; Mbr::serialize would
    // reject this, but a foreign image might still contain it.
    let write_entry = |bytes: &mut [u8; 512], index: usize, start: u32, len: u32, ty: u8| {
        let off = 446 + index * 16;
        bytes[off + 4] = ty;
        bytes[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
        bytes[off + 12..off + 16].copy_from_slice(&len.to_le_bytes());
    };
    write_entry(&mut bytes, 0, 2048, 1000, 0x83);
    write_entry(&mut bytes, 1, 2500, 1000, 0x83);

    let (parsed, diagnostics) = Mbr::parse(&bytes, disk_lba).unwrap();
    assert_eq!(parsed.partitions.len(), 2);
    assert!(!diagnostics.is_empty());
}
