//! GPT dual-header round-trip coverage (spec §4.3, §8).

use diskim::table::gpt::{Gpt, GptPartitionEntry, Guid};

const LSS: u32 = 512;
const DISK_LBA: u64 = 200_000;

#[test]
fn gpt_round_trips_through_serialize_and_parse() {
    let gpt = Gpt::new(
        vec![GptPartitionEntry {
            start_lba: 2048,
            end_lba: 100_000,
            type_guid: Guid::microsoft_basic_data(),
            attributes: 0,
            guid: Guid::from_mixed_u128(0x1111_2222_3333_4444_5555_6666_7777_8888),
            name: "data".to_string(),
        }],
        Some(Guid::from_mixed_u128(0xAAAA_BBBB_CCCC_DDDD_EEEE_FFFF_0000_1111)),
        None,
    );

    let (primary, backup, array) = gpt.serialize(DISK_LBA, LSS).unwrap();

    // Lay both headers and the partition array into one flat image so
    // `parse`'s `read_at` closure can serve slices out of it by LBA.
    let mut image = vec![0u8; DISK_LBA as usize * LSS as usize];
    image[LSS as usize..2 * LSS as usize].copy_from_slice(&primary);
    image[image.len() - LSS as usize..].copy_from_slice(&backup);
    // Partition array follows LBA 2 by convention in this fixture.
    image[2 * LSS as usize..2 * LSS as usize + array.len()].copy_from_slice(&array);

    let read_at = |lba: u64, count: u64| -> diskim::Result<Vec<u8>> {
        let start = lba as usize * LSS as usize;
        let end = start + count as usize * LSS as usize;
        Ok(image[start..end].to_vec())
    };

    let (parsed, diagnostics) = Gpt::parse(DISK_LBA, LSS, read_at, None).unwrap();
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);
    assert_eq!(parsed.partitions.len(), 1);
    assert_eq!(parsed.partitions[0].name, "data");
    assert_eq!(parsed.partitions[0].start_lba, 2048);
}

#[test]
fn nil_guid_round_trips() {
    assert!(Guid::NIL.is_nil());
    assert!(!Guid::microsoft_basic_data().is_nil());
}

/// E2: primary header valid, backup corrupted -> parse succeeds off the
/// primary; zeroing the primary and restoring the backup -> parse
/// succeeds off the backup alone.
#[test]
fn parse_falls_back_to_backup_header_when_primary_is_corrupt() {
    let gpt = Gpt::new(
        vec![GptPartitionEntry {
            start_lba: 2048,
            end_lba: 100_000,
            type_guid: Guid::microsoft_basic_data(),
            attributes: 0,
            guid: Guid::from_mixed_u128(0x1111_2222_3333_4444_5555_6666_7777_8888),
            name: "data".to_string(),
        }],
        Some(Guid::from_mixed_u128(0xAAAA_BBBB_CCCC_DDDD_EEEE_FFFF_0000_1111)),
        None,
    );
    let (primary, backup, array) = gpt.serialize(DISK_LBA, LSS).unwrap();
    let array_sectors = array.len() as u64 / LSS as u64;
    let backup_array_lba = DISK_LBA - 1 - array_sectors;

    let mut image = vec![0u8; DISK_LBA as usize * LSS as usize];
    let put = |image: &mut Vec<u8>, lba: u64, bytes: &[u8]| {
        let start = lba as usize * LSS as usize;
        image[start..start + bytes.len()].copy_from_slice(bytes);
    };
    put(&mut image, 1, &primary);
    put(&mut image, 2, &array);
    put(&mut image, backup_array_lba, &array);
    put(&mut image, DISK_LBA - 1, &backup);

    let read_at = |image: &[u8], lba: u64, count: u64| -> diskim::Result<Vec<u8>> {
        let start = lba as usize * LSS as usize;
        let end = start + count as usize * LSS as usize;
        Ok(image[start..end].to_vec())
    };

    // Corrupt only the backup header: primary-first parse still succeeds.
    let mut corrupt_backup = image.clone();
    let backup_start = (DISK_LBA - 1) as usize * LSS as usize;
    corrupt_backup[backup_start] ^= 0xFF;
    let (parsed, _diag) = Gpt::parse(DISK_LBA, LSS, |lba, count| read_at(&corrupt_backup, lba, count), None).unwrap();
    assert_eq!(parsed.partitions.len(), 1);

    // Now corrupt the primary header (on the original, uncorrupted image)
    // and confirm the backup alone is sufficient.
    let mut corrupt_primary = image.clone();
    let primary_start = LSS as usize;
    corrupt_primary[primary_start] ^= 0xFF;
    let (parsed, _diag) = Gpt::parse(DISK_LBA, LSS, |lba, count| read_at(&corrupt_primary, lba, count), None).unwrap();
    assert_eq!(parsed.partitions.len(), 1);
    assert_eq!(parsed.partitions[0].name, "data");
}
