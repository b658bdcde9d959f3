//! `diskim`: a userspace library for reading and writing disk images and
//! block devices at the partition-table and file-system layers.
//!
//! Layered bottom-up: sector-granular I/O ([`sector`]) underlies whole-disk
//! and volume views ([`disk`], [`volume`]), which carry partition-table
//! codecs ([`table`]) and, above those, a FAT12/16/32 (optionally VFAT)
//! file-system engine ([`fat`]).

pub mod error;
pub mod util;

pub mod sector;
pub mod disk;
pub mod volume;
pub mod table;
pub mod fat;

pub use disk::Disk;
pub use error::{DiskError, Result, Warning};
pub use sector::{FileStorage, MemStorage, SectorSize, SectorStore};
pub use volume::Volume;
