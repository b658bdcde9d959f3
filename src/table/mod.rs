//! Partition-table probing and the shared [`PartitionTable`] wrapper
//! (spec §4.1, §4.2, §4.3). Detection order follows the original
//! `examples/original_source/diskfs/table/__init__.py`: GPT is tried first
//! (it is unambiguous via its own signature and CRC32), falling back to MBR.

pub mod gpt;
pub mod mbr;

use crate::error::{Diagnostics, DiskError, Result};

/// A loaded partition table, whichever scheme it turned out to be.
#[derive(Debug, Clone)]
pub enum PartitionTable {
    Mbr(mbr::Mbr),
    Gpt(gpt::Gpt),
}

impl PartitionTable {
    /// Tries GPT first, then MBR, against a disk accessed only through
    /// `read_at(lba, sector_count) -> Vec<u8>`.
    pub fn detect<F>(disk_size_lba: u64, lss: u32, mut read_at: F) -> Result<(Self, Diagnostics)>
    where
        F: FnMut(u64, u64) -> Result<Vec<u8>>,
    {
        let mbr_sector = read_at(0, 1).ok();
        let mbr = mbr_sector
            .as_ref()
            .and_then(|buf| mbr::Mbr::parse(buf, disk_size_lba).ok())
            .map(|(mbr, _)| mbr);

        match gpt::Gpt::parse(disk_size_lba, lss, &mut read_at, mbr.clone()) {
            Ok((table, diagnostics)) => return Ok((PartitionTable::Gpt(table), diagnostics)),
            Err(err) => log::debug!("no GPT found, falling back to MBR: {err}"),
        }

        let buf = read_at(0, 1)?;
        let (mbr, diagnostics) = mbr::Mbr::parse(&buf, disk_size_lba)?;
        Ok((PartitionTable::Mbr(mbr), diagnostics))
    }

    pub fn as_mbr(&self) -> Option<&mbr::Mbr> {
        match self {
            PartitionTable::Mbr(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_gpt(&self) -> Option<&gpt::Gpt> {
        match self {
            PartitionTable::Gpt(g) => Some(g),
            _ => None,
        }
    }

    /// Partition ranges as `(start_lba, length_lba)`, independent of scheme.
    pub fn partition_ranges(&self) -> Vec<(u64, u64)> {
        match self {
            PartitionTable::Mbr(m) => m
                .partitions
                .iter()
                .map(|p| (p.start_lba as u64, p.length_lba as u64))
                .collect(),
            PartitionTable::Gpt(g) => g
                .partitions
                .iter()
                .map(|p| (p.start_lba, p.length_lba()))
                .collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        match self {
            PartitionTable::Mbr(m) => m.partitions.len(),
            PartitionTable::Gpt(g) => g.partitions.len(),
        }
    }

    pub fn nth_partition_range(&self, index: usize) -> Result<(u64, u64)> {
        self.partition_ranges()
            .get(index)
            .copied()
            .ok_or_else(|| DiskError::NotFound(format!("no partition at index {index}")))
    }
}
