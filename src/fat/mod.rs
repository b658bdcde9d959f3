//! FAT12/16/32 file-system engine (spec §4.4-§4.8): the reserved-region
//! BPB family, the FAT cluster-link table, cluster-chain/root-directory
//! streams, 8.3/VFAT directory entries, path resolution, and the
//! [`FileSystem`](filesystem::FileSystem) built above all of them.

pub mod directory;
pub mod fat;
pub mod io;
pub mod path;
pub mod reserved;
pub mod filesystem;

pub use filesystem::FileSystem;
pub use reserved::{BootSector, FatType};
