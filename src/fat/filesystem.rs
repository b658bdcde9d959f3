//! FAT file system: the in-memory directory tree cached over the reserved
//! region, FAT, and directory entries below it, plus a POSIX-flavored
//! file-descriptor table on top (spec §4.8).
//!
//! Grounded in `examples/original_source/diskfs/fat/filesystem.py` (the
//! `FileSystem` class, its `Node`/`Root`/`FdTableRow` types, and the
//! `_transform_entry`/`_update_entry_by_stream` pair that every mutating
//! operation funnels through) and `examples/original_source/diskfs/
//! filesystem.py` (`StatusFlags`/`parse_flags`, `FsType`). The teacher has
//! no equivalent module; the single-`Mutex`-critical-section shape follows
//! `examples/rrbutani-fatfs`'s `mutex` module instead.
//!
//! The cached directory tree is an arena (`Vec<Node>`) indexed by
//! [`NodeId`] rather than a tree of owned nodes: a child never holds a
//! reference to its parent, only a sibling-array index, which sidesteps
//! the aliasing a `Rc<RefCell<..>>` tree would otherwise need.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;

use crate::error::{DiskError, Result};
use crate::fat::directory::{
    create_entry, entry_match, iter_entries, updated_entry, Attributes, Entry, ParsedEntry,
    ENTRY_SIZE,
};
use crate::fat::fat::Fat;
use crate::fat::io::{DataIo, RootdirIo, Whence};
use crate::fat::path;
use crate::fat::reserved::{BootSector, FatType, BOOT_SECTOR_SIZE};
use crate::sector::SectorStore;

/// POSIX `open()`-style flag bits, numbered the way Linux's `os` module
/// (and this crate's original Python source) numbers them. Not sourced
/// from `libc` since that dependency is Unix-only in this crate and the
/// FAT layer itself is platform-neutral.
pub mod open_flags {
    pub const O_RDONLY: u32 = 0o0;
    pub const O_WRONLY: u32 = 0o1;
    pub const O_RDWR: u32 = 0o2;
    pub const O_ACCMODE: u32 = 0o3;
    pub const O_CREAT: u32 = 0o100;
    pub const O_EXCL: u32 = 0o200;
    pub const O_TRUNC: u32 = 0o1000;
    pub const O_APPEND: u32 = 0o2000;
}

use open_flags::*;

const MIN_VOLUME_SIZE_READ: u64 = 4;
const PERMISSIONS_DIR: u32 = 0o777;
const PERMISSIONS_FILE: u32 = 0o666;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// Marks a directory-table slot as deleted (spec §4.8 entry transformation).
const DELETED_ENTRY_MARKER: u8 = 0xE5;

/// File status flags derived from `open()`'s access-mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    pub readable: bool,
    pub writable: bool,
    pub appending: bool,
}

/// Validates and decodes an `open_fd` flags word.
///
/// Returns `(status, creating, exclusive, truncating)`. Mirrors
/// `original_source/diskfs/filesystem.py`'s `parse_flags` exactly,
/// including its two validation rules.
pub fn parse_flags(flags: u32) -> Result<(StatusFlags, bool, bool, bool)> {
    let access = flags & O_ACCMODE;
    let readable = access == O_RDONLY || access == O_RDWR;
    let writable = access == O_WRONLY || access == O_RDWR;
    let appending = flags & O_APPEND != 0;
    let creating = flags & O_CREAT != 0;
    let exclusive = flags & O_EXCL != 0;
    let truncating = flags & O_TRUNC != 0;

    if exclusive && !creating {
        return Err(DiskError::Validation(
            "O_EXCL can only be used in combination with O_CREAT".into(),
        ));
    }
    if creating && !writable {
        return Err(DiskError::Validation("must be writable for creation".into()));
    }
    if truncating && !writable {
        return Err(DiskError::Validation("must be writable for truncation".into()));
    }

    Ok((
        StatusFlags { readable, writable, appending },
        creating,
        exclusive,
        truncating,
    ))
}

/// A synthesized POSIX `stat` result (spec §4.8 "stat").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub ino: u32,
    pub dev: u32,
    pub size: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFDIR != 0
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFREG != 0
    }
}

/// One entry yielded by [`FileSystem::scandir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub stat: Stat,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.stat.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.stat.is_file()
    }
}

/// Index into the [`Inner::nodes`] arena. The root is always index 0 and
/// has no backing [`Entry`] -- it is a headless directory.
pub type NodeId = usize;
const ROOT: NodeId = 0;

/// A cached directory-tree node. `children = None` means "not yet
/// enumerated"; `parent` is meaningless for the root (it points to
/// itself) and is never read for it since every traversal stops there.
#[derive(Debug, Clone)]
struct Node {
    entry: Option<Entry>,
    parent: NodeId,
    children: Option<Vec<NodeId>>,
    in_use: bool,
}

impl Node {
    fn is_directory(&self) -> bool {
        match &self.entry {
            None => true,
            Some(e) => e.attributes().contains(Attributes::SUBDIRECTORY),
        }
    }
}

/// Which in-use bookkeeping a path walk should perform (see
/// `_find_node`'s `set_in_use`/`unset_in_use`/`check_in_use` in the
/// original -- kept as a single enum rather than three booleans since
/// Rust has no "at most one of" argument shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InUseOp {
    None,
    Set,
    Unset,
    Check,
}

/// A cluster-chain or root-directory-region byte stream, addressed by the
/// node it backs. Reads/writes thread an explicit timestamp through so
/// `last_read`/`last_write` can later feed the entry's own access/modify
/// times without this layer reaching for a wall clock itself.
#[derive(Debug)]
enum Stream {
    Data(DataIo),
    Root(RootdirIo),
}

impl Stream {
    fn size(&self) -> u64 {
        match self {
            Stream::Data(d) => d.size(),
            Stream::Root(r) => r.size(),
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        match self {
            Stream::Data(d) => d.seek(offset, whence),
            Stream::Root(r) => r.seek(offset, whence),
        }
    }

    fn read(&mut self, store: &mut dyn SectorStore, buf: &mut [u8], now: NaiveDateTime) -> Result<usize> {
        match self {
            Stream::Data(d) => d.read(store, buf, now),
            Stream::Root(r) => r.read(store, buf),
        }
    }

    fn write(
        &mut self,
        store: &mut dyn SectorStore,
        fat: &mut Fat,
        buf: &[u8],
        now: NaiveDateTime,
    ) -> Result<usize> {
        match self {
            Stream::Data(d) => d.write(store, fat, buf, now),
            Stream::Root(r) => r.write(store, fat, buf),
        }
    }

    fn truncate(&mut self, store: &mut dyn SectorStore, fat: &mut Fat, size: Option<u64>) -> Result<u64> {
        match self {
            Stream::Data(d) => d.truncate(store, fat, size),
            Stream::Root(_) => Err(DiskError::UnsupportedOperation(
                "root directory region cannot be truncated".into(),
            )),
        }
    }

    fn start_cluster(&self) -> u32 {
        match self {
            Stream::Data(d) => d.start_cluster(),
            Stream::Root(_) => 0,
        }
    }

    fn last_read(&self) -> Option<NaiveDateTime> {
        match self {
            Stream::Data(d) => d.last_read(),
            Stream::Root(_) => None,
        }
    }

    fn last_write(&self) -> Option<NaiveDateTime> {
        match self {
            Stream::Data(d) => d.last_write(),
            Stream::Root(_) => None,
        }
    }

    fn increment_fd_count(&mut self) {
        if let Stream::Data(d) = self {
            d.increment_fd_count();
        }
    }

    fn decrement_fd_count(&mut self) -> Result<()> {
        if let Stream::Data(d) = self {
            d.decrement_fd_count()?;
        }
        Ok(())
    }

    fn fd_count(&self) -> u32 {
        match self {
            Stream::Data(d) => d.fd_count(),
            Stream::Root(_) => 0,
        }
    }
}

/// One row of the file-descriptor table. `path` is the resolved absolute
/// path captured at `open_fd` time, used only to detect a second `open`
/// of a path already open so the stream (and its position) is shared.
#[derive(Debug, Clone)]
struct FdRow {
    node: NodeId,
    flags: StatusFlags,
    path: Vec<String>,
}

/// Everything behind the single mutex: the backing store, the on-disk
/// structures above it, and the process-local caches (directory tree,
/// open streams, file-descriptor table, current working directory).
struct Inner<S: SectorStore> {
    store: S,
    boot_sector: BootSector,
    fat: Fat,
    fat_32: bool,
    vfat: bool,
    nodes: Vec<Node>,
    streams: HashMap<NodeId, Stream>,
    fds: HashMap<u32, FdRow>,
    next_fd: u32,
    cwd: Vec<String>,
    clock: Box<dyn Fn() -> NaiveDateTime + Send>,
}

impl<S: SectorStore> Inner<S> {
    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    fn resolve(&self, path: &str) -> Vec<String> {
        path::resolve(&self.cwd, path)
    }

    fn is_root(&self, path: &str) -> bool {
        self.resolve(path).is_empty()
    }

    fn realpath(&self, path: &str) -> String {
        path::render(&self.resolve(path))
    }

    fn getcwd(&self) -> String {
        path::render(&self.cwd)
    }

    fn ensure_stream(&mut self, id: NodeId) -> Result<()> {
        if self.streams.contains_key(&id) {
            return Ok(());
        }
        let stream = if id == ROOT {
            if self.fat_32 {
                Stream::Data(DataIo::for_root(&mut self.fat, &mut self.store, &self.boot_sector)?)
            } else {
                Stream::Root(RootdirIo::new(&self.boot_sector))
            }
        } else {
            let entry = self.nodes[id].entry.clone().expect("non-root node always has an entry");
            Stream::Data(DataIo::for_entry(
                &mut self.fat,
                &mut self.store,
                &self.boot_sector,
                &entry,
                self.fat_32,
            )?)
        };
        self.streams.insert(id, stream);
        Ok(())
    }

    fn read_directory_raw(&mut self, id: NodeId) -> Result<Vec<u8>> {
        self.ensure_stream(id)?;
        let now = self.now();
        let Inner { streams, store, .. } = self;
        let stream = streams.get_mut(&id).expect("stream just ensured");
        stream.seek(0, Whence::Start)?;
        let size = stream.size() as usize;
        let mut buf = vec![0u8; size];
        let mut total = 0usize;
        while total < size {
            let n = stream.read(store, &mut buf[total..], now)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn scan_raw_entries(&mut self, id: NodeId) -> Result<Vec<ParsedEntry>> {
        let raw = self.read_directory_raw(id)?;
        let slots = raw.chunks_exact(ENTRY_SIZE).map(|c| {
            let mut arr = [0u8; ENTRY_SIZE];
            arr.copy_from_slice(c);
            arr
        });
        iter_entries(slots, false, self.vfat, self.fat_32)
    }

    /// Lazily scans `id`'s directory contents into child arena slots.
    /// A no-op once children have been scanned, and for a node that
    /// turns out not to be a (non-empty) directory at all -- matching
    /// `_scandir`'s early-return for files and zero-cluster directories.
    fn ensure_children(&mut self, id: NodeId) -> Result<()> {
        if self.nodes[id].children.is_some() {
            return Ok(());
        }

        if let Some(entry) = &self.nodes[id].entry {
            if !entry.attributes().contains(Attributes::SUBDIRECTORY) || entry.cluster() == 0 {
                self.nodes[id].children = Some(Vec::new());
                return Ok(());
            }
        }

        let raw = self.read_directory_raw(id)?;
        let slots = raw.chunks_exact(ENTRY_SIZE).map(|c| {
            let mut arr = [0u8; ENTRY_SIZE];
            arr.copy_from_slice(c);
            arr
        });
        let parsed = iter_entries(slots, true, self.vfat, self.fat_32)?;

        let mut child_ids = Vec::with_capacity(parsed.len());
        for p in parsed {
            if let ParsedEntry::Useful(entry) = p {
                let child_id = self.nodes.len();
                self.nodes.push(Node { entry: Some(entry), parent: id, children: None, in_use: false });
                child_ids.push(child_id);
            }
        }
        self.nodes[id].children = Some(child_ids);
        Ok(())
    }

    /// Walks `components` from the root, applying `op`'s in-use
    /// bookkeeping to every matched node along the way (not just the
    /// leaf) -- this is what lets `rmdir`/`unlink`/rename on an ancestor
    /// directory of a currently-open file be rejected as in-use.
    fn find_node_by_components(&mut self, components: &[String], op: InUseOp) -> Result<NodeId> {
        if components.is_empty() {
            return Err(DiskError::NotFound("/".into()));
        }

        let mut node = ROOT;
        for (index, part) in components.iter().enumerate() {
            self.ensure_children(node)?;
            let children = self.nodes[node].children.clone().unwrap_or_default();

            let mut found = None;
            for child in children {
                let is_match = {
                    let entry = self.nodes[child].entry.as_ref().expect("child always has an entry");
                    entry_match(part, entry, self.vfat)
                };
                if is_match {
                    match op {
                        InUseOp::Set => self.nodes[child].in_use = true,
                        InUseOp::Unset => self.nodes[child].in_use = false,
                        InUseOp::None | InUseOp::Check => {}
                    }
                    found = Some(child);
                    break;
                }
            }

            let child = found.ok_or_else(|| DiskError::NotFound(components.join("/")))?;

            if index == components.len() - 1 {
                if op == InUseOp::Check && self.nodes[child].in_use {
                    return Err(DiskError::PermissionDenied(format!(
                        "{} is being used by another process",
                        components.join("/")
                    )));
                }
                return Ok(child);
            }

            if !self.nodes[child].is_directory() {
                return Err(DiskError::NotFound(components.join("/")));
            }
            node = child;
        }

        unreachable!("components is non-empty")
    }

    fn find_node(&mut self, path: &str, op: InUseOp) -> Result<NodeId> {
        let components = self.resolve(path);
        self.find_node_by_components(&components, op)
    }

    fn find_node_or_root_by_components(&mut self, components: &[String]) -> Result<NodeId> {
        if components.is_empty() {
            Ok(ROOT)
        } else {
            self.find_node_by_components(components, InUseOp::None)
        }
    }

    fn find_node_or_root(&mut self, path: &str) -> Result<NodeId> {
        let components = self.resolve(path);
        self.find_node_or_root_by_components(&components)
    }

    /// The central rename/create/delete helper (spec §4.8 "Entry
    /// transformation"). Rewrites `parent_id`'s directory table so that
    /// the slot matching `old_entry`'s filename (if any) is replaced by
    /// `new_entry` (if any); deletes if only `old_entry` is set, creates
    /// if only `new_entry` is set. On a non-root parent, the parent's own
    /// cluster/size/timestamps are refreshed afterwards, which may in
    /// turn rewrite *its* parent, and so on up to the root.
    fn transform_entry(&mut self, parent_id: NodeId, old_entry: Option<&Entry>, new_entry: Option<Entry>) -> Result<()> {
        if old_entry == new_entry.as_ref() {
            return Ok(());
        }

        let existing_entries = self.scan_raw_entries(parent_id)?;
        self.ensure_stream(parent_id)?;
        let now = self.now();
        let mut replaced_old_entry = false;

        if let Some(old) = old_entry {
            let old_filename = old.filename();
            let mut offset_entries = 0usize;
            let mut old_total_entries = None;
            for parsed in &existing_entries {
                match parsed {
                    ParsedEntry::Useful(e) => {
                        if entry_match(&old_filename, e, self.vfat) {
                            old_total_entries = Some(e.total_entries());
                            break;
                        }
                        offset_entries += e.total_entries();
                    }
                    ParsedEntry::Raw(_) => offset_entries += 1,
                }
            }
            let old_total_entries = old_total_entries.ok_or_else(|| {
                DiskError::Validation("could not find old entry in parent directory".into())
            })?;

            let new_total_entries = new_entry.as_ref().map(|e| e.total_entries()).unwrap_or(0);
            let to_delete = if new_entry.is_none() || new_total_entries > old_total_entries {
                old_total_entries
            } else {
                old_total_entries - new_total_entries
            };

            let Inner { streams, store, fat, .. } = self;
            let stream = streams.get_mut(&parent_id).expect("stream just ensured");
            stream.seek((offset_entries * ENTRY_SIZE) as i64, Whence::Start)?;
            for _ in 0..to_delete {
                stream.write(store, fat, &[DELETED_ENTRY_MARKER], now)?;
                stream.seek((ENTRY_SIZE - 1) as i64, Whence::Current)?;
            }

            if let Some(new) = &new_entry {
                if new_total_entries <= old_total_entries {
                    stream.seek((offset_entries * ENTRY_SIZE) as i64, Whence::Start)?;
                    stream.write(store, fat, &new.to_bytes(), now)?;
                    replaced_old_entry = true;
                }
            }
        }

        if let Some(new) = &new_entry {
            if !replaced_old_entry {
                let total_entries_directory: usize = existing_entries
                    .iter()
                    .map(|p| match p {
                        ParsedEntry::Useful(e) => e.total_entries(),
                        ParsedEntry::Raw(_) => 1,
                    })
                    .sum();
                let Inner { streams, store, fat, .. } = self;
                let stream = streams.get_mut(&parent_id).expect("stream just ensured");
                stream.seek((total_entries_directory * ENTRY_SIZE) as i64, Whence::Start)?;
                stream.write(store, fat, &new.to_bytes(), now)?;
            }
        }

        if parent_id != ROOT {
            self.update_entry_by_stream(parent_id)?;
        }

        Ok(())
    }

    /// Refreshes `node`'s own entry (cluster/size/access-modify times)
    /// from its cached stream and writes the refreshed entry back into
    /// its parent's directory table. Used both on fd close/truncate
    /// (the node is a file) and, recursively via `transform_entry`, to
    /// bubble a directory's cluster-chain growth up to its own parent.
    fn update_entry_by_stream(&mut self, node: NodeId) -> Result<()> {
        self.ensure_stream(node)?;
        let old_entry = self.nodes[node].entry.clone().expect("non-root node always has an entry");
        let (start_cluster, size, last_accessed, last_modified) = {
            let stream = self.streams.get(&node).expect("stream just ensured");
            (stream.start_cluster(), stream.size() as u32, stream.last_read(), stream.last_write())
        };
        let new_entry = updated_entry(
            &old_entry,
            Some(start_cluster),
            Some(size),
            last_accessed,
            last_modified,
            self.vfat,
            self.fat_32,
        )?;

        let parent = self.nodes[node].parent;
        self.transform_entry(parent, Some(&old_entry), Some(new_entry.clone()))?;
        self.nodes[node].entry = Some(new_entry);
        Ok(())
    }

    fn create_child(&mut self, components: &[String], parent: NodeId, directory: bool) -> Result<NodeId> {
        self.ensure_children(parent)?;
        let existing: Vec<Entry> = self.nodes[parent]
            .children
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|&c| self.nodes[c].entry.clone().expect("child always has an entry"))
            .collect();

        let attributes = if directory { Attributes::SUBDIRECTORY } else { Attributes::ARCHIVE };
        let now = self.now();
        let name = components.last().expect("components must be non-empty");
        let entry = create_entry(&existing, name, attributes, now, now, now, 0, 0, self.vfat, self.fat_32)?;

        let node_id = self.nodes.len();
        self.nodes.push(Node {
            entry: Some(entry.clone()),
            parent,
            children: if directory { Some(Vec::new()) } else { None },
            in_use: false,
        });

        self.transform_entry(parent, None, Some(entry))?;
        self.nodes[parent].children.get_or_insert_with(Vec::new).push(node_id);
        Ok(node_id)
    }

    fn stat_entry(&self, entry: Option<&Entry>) -> Stat {
        let dev = self.boot_sector.bpb.volume_id().unwrap_or(0);
        match entry {
            None => Stat {
                mode: S_IFDIR | PERMISSIONS_DIR,
                ino: 0,
                dev,
                size: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
            },
            Some(e) => {
                let is_dir = e.attributes().contains(Attributes::SUBDIRECTORY);
                let mode = if is_dir { S_IFDIR | PERMISSIONS_DIR } else { S_IFREG | PERMISSIONS_FILE };
                Stat {
                    mode,
                    ino: e.cluster(),
                    dev,
                    size: e.size(),
                    atime: e.last_accessed().map(|d| d.and_utc().timestamp()).unwrap_or(0),
                    mtime: e.last_modified().map(|d| d.and_utc().timestamp()).unwrap_or(0),
                    ctime: e.created().map(|d| d.and_utc().timestamp()).unwrap_or(0),
                }
            }
        }
    }

    // -- file-descriptor table -------------------------------------------------

    fn open_fd(&mut self, path: &str, flags: u32) -> Result<u32> {
        if self.is_root(path) {
            return Err(DiskError::IsADirectory(path.to_string()));
        }

        let components = self.resolve(path);
        let (status, creating, exclusive, truncating) = parse_flags(flags)?;
        if status.writable && !self.store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }

        let already_open = self.fds.values().find(|row| row.path == components).map(|row| row.node);

        let (node, existed) = match already_open {
            Some(node) => (node, true),
            None => {
                let parent_components = &components[..components.len() - 1];
                let parent = self.find_node_or_root_by_components(parent_components)?;
                match self.find_node_by_components(&components, InUseOp::None) {
                    Ok(node) => {
                        if self.nodes[node].is_directory() {
                            return Err(DiskError::IsADirectory(path.to_string()));
                        }
                        (node, true)
                    }
                    Err(DiskError::NotFound(_)) => {
                        if !creating {
                            return Err(DiskError::NotFound(path.to_string()));
                        }
                        (self.create_child(&components, parent, false)?, false)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if existed && exclusive {
            return Err(DiskError::AlreadyExists(path.to_string()));
        }

        self.ensure_stream(node)?;
        // Matches every matched ancestor (not just the leaf) getting
        // flagged in-use, so a rename/rmdir of an ancestor directory of
        // an open file is rejected too.
        self.find_node_by_components(&components, InUseOp::Set)?;

        {
            let stream = self.streams.get_mut(&node).expect("stream just ensured");
            stream.increment_fd_count();
        }

        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(fd, FdRow { node, flags: status, path: components });

        if truncating {
            let Inner { streams, store, fat, .. } = self;
            let stream = streams.get_mut(&node).expect("stream just ensured");
            stream.truncate(store, fat, Some(0))?;
        }

        Ok(fd)
    }

    fn close_fd(&mut self, fd: u32) -> Result<()> {
        let row = self.fds.get(&fd).cloned().ok_or(DiskError::BadFileDescriptor(fd))?;
        self.update_entry_by_stream(row.node)?;
        self.fds.remove(&fd);

        let not_in_use = {
            let stream = self.streams.get_mut(&row.node).expect("stream must exist for an open fd");
            stream.decrement_fd_count()?;
            stream.fd_count() == 0
        };
        if not_in_use {
            self.find_node_by_components(&row.path, InUseOp::Unset)?;
        }
        Ok(())
    }

    fn stat_fd(&mut self, fd: u32) -> Result<Stat> {
        let node = self.fds.get(&fd).ok_or(DiskError::BadFileDescriptor(fd))?.node;
        let entry = self.nodes[node].entry.clone();
        Ok(self.stat_entry(entry.as_ref()))
    }

    fn seek_fd(&mut self, fd: u32, offset: i64, whence: Whence) -> Result<u64> {
        let node = self.fds.get(&fd).ok_or(DiskError::BadFileDescriptor(fd))?.node;
        let stream = self.streams.get_mut(&node).expect("stream must exist for an open fd");
        stream.seek(offset, whence)
    }

    fn read_fd(&mut self, fd: u32, buf: &mut [u8]) -> Result<usize> {
        let row = self.fds.get(&fd).cloned().ok_or(DiskError::BadFileDescriptor(fd))?;
        if !row.flags.readable {
            return Err(DiskError::UnsupportedOperation("file not open for reading".into()));
        }
        let now = self.now();
        let Inner { streams, store, .. } = self;
        let stream = streams.get_mut(&row.node).expect("stream must exist for an open fd");
        stream.read(store, buf, now)
    }

    fn write_fd(&mut self, fd: u32, buf: &[u8]) -> Result<usize> {
        let row = self.fds.get(&fd).cloned().ok_or(DiskError::BadFileDescriptor(fd))?;
        if !row.flags.writable {
            return Err(DiskError::UnsupportedOperation("file not open for writing".into()));
        }
        let now = self.now();
        if row.flags.appending {
            let stream = self.streams.get_mut(&row.node).expect("stream must exist for an open fd");
            let size = stream.size();
            stream.seek(size as i64, Whence::Start)?;
        }
        let Inner { streams, store, fat, .. } = self;
        let stream = streams.get_mut(&row.node).expect("stream must exist for an open fd");
        stream.write(store, fat, buf, now)
    }

    fn truncate_fd(&mut self, fd: u32, size: u64) -> Result<u64> {
        let row = self.fds.get(&fd).cloned().ok_or(DiskError::BadFileDescriptor(fd))?;
        if !row.flags.writable {
            return Err(DiskError::UnsupportedOperation("file not open for writing".into()));
        }
        let result = {
            let Inner { streams, store, fat, .. } = self;
            let stream = streams.get_mut(&row.node).expect("stream must exist for an open fd");
            stream.truncate(store, fat, Some(size))?
        };
        self.update_entry_by_stream(row.node)?;
        Ok(result)
    }

    fn flush_fd(&mut self, fd: u32) -> Result<()> {
        let node = self.fds.get(&fd).ok_or(DiskError::BadFileDescriptor(fd))?.node;
        self.update_entry_by_stream(node)
    }

    fn isatty_fd(&self, fd: u32) -> Result<bool> {
        if self.fds.contains_key(&fd) {
            Ok(false)
        } else {
            Err(DiskError::BadFileDescriptor(fd))
        }
    }

    // -- path-addressed operations ---------------------------------------------

    fn stat(&mut self, path: &str) -> Result<Stat> {
        let node = self.find_node_or_root(path)?;
        let entry = self.nodes[node].entry.clone();
        Ok(self.stat_entry(entry.as_ref()))
    }

    fn listdir(&mut self, path: &str) -> Result<Vec<String>> {
        let node = self.find_node_or_root(path)?;
        if !self.nodes[node].is_directory() {
            return Err(DiskError::NotADirectory(path.to_string()));
        }
        self.ensure_children(node)?;
        Ok(self.nodes[node]
            .children
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|&c| self.nodes[c].entry.as_ref().expect("child always has an entry").filename())
            .collect())
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        if !self.store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        if self.is_root(path) {
            return Err(DiskError::PermissionDenied(format!("{path} is the root directory")));
        }
        let components = self.resolve(path);
        let parent_components = &components[..components.len() - 1];
        let parent = self.find_node_or_root_by_components(parent_components)?;

        match self.find_node_by_components(&components, InUseOp::None) {
            Ok(_) => return Err(DiskError::AlreadyExists(path.to_string())),
            Err(DiskError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.create_child(&components, parent, true)?;
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        if !self.store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        if self.is_root(path) {
            return Err(DiskError::PermissionDenied(format!("{path} is the root directory")));
        }

        let node = self.find_node(path, InUseOp::Check)?;
        if !self.nodes[node].is_directory() {
            return Err(DiskError::NotADirectory(path.to_string()));
        }
        self.ensure_children(node)?;
        if !self.nodes[node].children.as_ref().unwrap().is_empty() {
            return Err(DiskError::NotEmpty(path.to_string()));
        }

        let components = self.resolve(path);
        let parent_components = &components[..components.len() - 1];
        let parent = self.find_node_or_root_by_components(parent_components)?;
        let entry = self.nodes[node].entry.clone().expect("non-root node always has an entry");
        self.transform_entry(parent, Some(&entry), None)?;

        self.ensure_stream(node)?;
        {
            let Inner { streams, store, fat, .. } = self;
            let stream = streams.get_mut(&node).expect("stream just ensured");
            stream.truncate(store, fat, Some(0))?;
        }
        self.streams.remove(&node);
        self.nodes[parent].children.as_mut().unwrap().retain(|&c| c != node);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        if !self.store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        if self.is_root(path) {
            return Err(DiskError::PermissionDenied(format!("{path} is the root directory")));
        }

        let node = self.find_node(path, InUseOp::Check)?;
        if self.nodes[node].is_directory() {
            return Err(DiskError::IsADirectory(path.to_string()));
        }

        let components = self.resolve(path);
        let parent_components = &components[..components.len() - 1];
        let parent = self.find_node_or_root_by_components(parent_components)?;
        let entry = self.nodes[node].entry.clone().expect("non-root node always has an entry");
        self.transform_entry(parent, Some(&entry), None)?;

        self.ensure_stream(node)?;
        {
            let Inner { streams, store, fat, .. } = self;
            let stream = streams.get_mut(&node).expect("stream just ensured");
            stream.truncate(store, fat, Some(0))?;
        }
        self.streams.remove(&node);
        self.nodes[parent].children.as_mut().unwrap().retain(|&c| c != node);
        Ok(())
    }

    fn move_entry(&mut self, src: &str, dst: &str, replace: bool) -> Result<()> {
        if !self.store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        if self.is_root(src) {
            return Err(DiskError::PermissionDenied(format!("{src} is the root directory")));
        }
        if self.is_root(dst) {
            return Err(DiskError::PermissionDenied(format!("{dst} is the root directory")));
        }

        let src_components = self.resolve(src);
        let dst_components = self.resolve(dst);
        if src_components == dst_components {
            return Ok(());
        }

        let src_node = self.find_node_by_components(&src_components, InUseOp::Check)?;
        let directory = self.nodes[src_node].is_directory();

        let dst_node = match self.find_node_by_components(&dst_components, InUseOp::Check) {
            Ok(n) => Some(n),
            Err(DiskError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if let Some(dn) = dst_node {
            if !replace {
                return Err(DiskError::AlreadyExists(dst.to_string()));
            }
            if directory {
                if !self.nodes[dn].is_directory() {
                    return Err(DiskError::NotADirectory(dst.to_string()));
                }
                self.ensure_children(dn)?;
                if !self.nodes[dn].children.as_ref().unwrap().is_empty() {
                    return Err(DiskError::AlreadyExists(dst.to_string()));
                }
            } else if self.nodes[dn].is_directory() {
                return Err(DiskError::IsADirectory(dst.to_string()));
            }
        }

        let src_parent_components = &src_components[..src_components.len() - 1];
        let dst_parent_components = &dst_components[..dst_components.len() - 1];
        let src_parent = self.find_node_or_root_by_components(src_parent_components)?;
        let dst_parent = self.find_node_or_root_by_components(dst_parent_components)?;

        let src_entry = self.nodes[src_node].entry.clone().expect("non-root node always has an entry");
        let dst_entry = dst_node.map(|n| self.nodes[n].entry.clone().expect("non-root node always has an entry"));

        self.ensure_children(dst_parent)?;
        let mut existing: Vec<Entry> = self.nodes[dst_parent]
            .children
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|&c| self.nodes[c].entry.clone().expect("child always has an entry"))
            .collect();
        if let Some(de) = &dst_entry {
            if let Some(pos) = existing.iter().position(|e| e == de) {
                existing.remove(pos);
            }
        }

        let now = self.now();
        let created = src_entry.created().unwrap_or(now);
        let last_accessed = src_entry.last_accessed().unwrap_or(now);
        let last_modified = src_entry.last_modified().unwrap_or(now);
        let dst_name = dst_components.last().expect("dst is not the root");

        let new_entry = create_entry(
            &existing,
            dst_name,
            src_entry.attributes(),
            created,
            last_accessed,
            last_modified,
            src_entry.cluster(),
            src_entry.size(),
            self.vfat,
            self.fat_32,
        )?;

        // The old destination entry is deleted outright rather than
        // replaced -- matches the source's comment about replicating
        // Windows' overwrite semantics.
        self.transform_entry(dst_parent, dst_entry.as_ref(), None)?;

        if src_parent == dst_parent {
            self.transform_entry(src_parent, Some(&src_entry), Some(new_entry.clone()))?;
        } else {
            self.transform_entry(src_parent, Some(&src_entry), None)?;
            self.transform_entry(dst_parent, None, Some(new_entry.clone()))?;
        }

        if let Some(dn) = dst_node {
            self.ensure_stream(dn)?;
            {
                let Inner { streams, store, fat, .. } = self;
                let stream = streams.get_mut(&dn).expect("stream just ensured");
                stream.truncate(store, fat, Some(0))?;
            }
            self.streams.remove(&dn);
            self.nodes[dst_parent].children.as_mut().unwrap().retain(|&c| c != dn);
        }

        self.nodes[src_parent].children.as_mut().unwrap().retain(|&c| c != src_node);
        self.nodes[src_node].entry = Some(new_entry);
        self.nodes[src_node].parent = dst_parent;
        self.nodes[dst_parent].children.get_or_insert_with(Vec::new).push(src_node);

        Ok(())
    }

    fn utime(&mut self, path: &str, times: Option<(NaiveDateTime, NaiveDateTime)>) -> Result<()> {
        if !self.store.writable() {
            return Err(DiskError::PermissionDenied("volume was opened read-only".into()));
        }
        if self.is_root(path) {
            return Err(DiskError::PermissionDenied(format!("{path} is the root directory")));
        }

        let now = self.now();
        let (last_accessed, last_modified) = times.unwrap_or((now, now));

        let node = self.find_node(path, InUseOp::Check)?;
        let entry = self.nodes[node].entry.clone().expect("non-root node always has an entry");
        let new_entry = updated_entry(
            &entry,
            Some(entry.cluster()),
            Some(entry.size()),
            Some(last_accessed),
            Some(last_modified),
            self.vfat,
            self.fat_32,
        )?;

        let components = self.resolve(path);
        let parent_components = &components[..components.len() - 1];
        let parent = self.find_node_or_root_by_components(parent_components)?;
        self.transform_entry(parent, Some(&entry), Some(new_entry.clone()))?;
        self.nodes[node].entry = Some(new_entry);
        Ok(())
    }

    fn chdir(&mut self, path: &str) -> Result<()> {
        if self.is_root(path) {
            self.cwd = Vec::new();
            return Ok(());
        }
        let node = self.find_node(path, InUseOp::None)?;
        if !self.nodes[node].is_directory() {
            return Err(DiskError::NotADirectory(path.to_string()));
        }
        self.cwd = self.resolve(path);
        Ok(())
    }
}

fn default_clock() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// A FAT file system opened over some [`SectorStore`] -- a [`Volume`](
/// crate::volume::Volume), a [`FileStorage`](crate::sector::FileStorage),
/// or a [`MemStorage`](crate::sector::MemStorage). The whole instance is
/// one `Mutex`-guarded critical section (spec §5): every public method
/// locks for its duration, except [`scandir`](Self::scandir), whose
/// returned iterator re-locks once per `next()` call instead.
pub struct FileSystem<S: SectorStore> {
    inner: Mutex<Inner<S>>,
}

impl<S: SectorStore> FileSystem<S> {
    /// Opens the FAT file system on `store` (sector 0 is its boot sector).
    /// Uses the system wall clock for timestamps written during mutation;
    /// see [`FileSystem::from_volume_with_clock`] for deterministic tests.
    pub fn from_volume(store: S, vfat: bool) -> Result<Self> {
        Self::from_volume_with_clock(store, vfat, default_clock)
    }

    /// As [`FileSystem::from_volume`], but with an injectable clock
    /// (spec §9: "implementers must make the clock injectable for
    /// deterministic tests").
    pub fn from_volume_with_clock(
        mut store: S,
        vfat: bool,
        clock: impl Fn() -> NaiveDateTime + Send + 'static,
    ) -> Result<Self> {
        let lss = store.sector_size().logical as u64;
        let size_lba = store.size_bytes() / lss;
        if size_lba < MIN_VOLUME_SIZE_READ {
            return Err(DiskError::Validation(format!(
                "volume must span at least {MIN_VOLUME_SIZE_READ} logical sectors"
            )));
        }

        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        store.read_bytes(0, &mut buf)?;
        let (boot_sector, diagnostics) = BootSector::parse(&buf)?;
        for warning in diagnostics.into_vec() {
            log::warn!("{warning}");
        }
        boot_sector.validate_for_volume(0, lss as u32, size_lba)?;

        let fat = Fat::new(&mut store, &boot_sector, 0)?;
        let fat_32 = boot_sector.fat_type() == FatType::Fat32;

        let inner = Inner {
            store,
            boot_sector,
            fat,
            fat_32,
            vfat,
            nodes: vec![Node { entry: None, parent: ROOT, children: None, in_use: false }],
            streams: HashMap::new(),
            fds: HashMap::new(),
            next_fd: 3,
            cwd: Vec::new(),
            clock: Box::new(clock),
        };

        Ok(FileSystem { inner: Mutex::new(inner) })
    }

    pub fn open_fd(&self, path: &str, flags: u32) -> Result<u32> {
        self.inner.lock().unwrap().open_fd(path, flags)
    }

    pub fn close_fd(&self, fd: u32) -> Result<()> {
        self.inner.lock().unwrap().close_fd(fd)
    }

    pub fn read_fd(&self, fd: u32, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().unwrap().read_fd(fd, buf)
    }

    pub fn write_fd(&self, fd: u32, buf: &[u8]) -> Result<usize> {
        self.inner.lock().unwrap().write_fd(fd, buf)
    }

    pub fn seek_fd(&self, fd: u32, offset: i64, whence: Whence) -> Result<u64> {
        self.inner.lock().unwrap().seek_fd(fd, offset, whence)
    }

    pub fn truncate_fd(&self, fd: u32, size: u64) -> Result<u64> {
        self.inner.lock().unwrap().truncate_fd(fd, size)
    }

    pub fn stat_fd(&self, fd: u32) -> Result<Stat> {
        self.inner.lock().unwrap().stat_fd(fd)
    }

    pub fn flush_fd(&self, fd: u32) -> Result<()> {
        self.inner.lock().unwrap().flush_fd(fd)
    }

    pub fn isatty_fd(&self, fd: u32) -> Result<bool> {
        self.inner.lock().unwrap().isatty_fd(fd)
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        self.inner.lock().unwrap().stat(path)
    }

    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        self.inner.lock().unwrap().listdir(path)
    }

    /// Yields directory entries one at a time, re-locking the file system
    /// on every step rather than for the iterator's whole lifetime (spec
    /// §4.8/§5): other methods may run, and even mutate this directory,
    /// between two calls to `next()`.
    pub fn scandir(&self, path: &str) -> Result<ScanDir<'_, S>> {
        let mut inner = self.inner.lock().unwrap();
        let dir = inner.find_node_or_root(path)?;
        if !inner.nodes[dir].is_directory() {
            return Err(DiskError::NotADirectory(path.to_string()));
        }
        let dirpath = inner.realpath(path);
        Ok(ScanDir { fs: self, dir, dirpath, index: 0 })
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.inner.lock().unwrap().mkdir(path)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.inner.lock().unwrap().rmdir(path)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.inner.lock().unwrap().unlink(path)
    }

    /// Fails with `AlreadyExists` if `dst` already exists.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.inner.lock().unwrap().move_entry(src, dst, false)
    }

    /// Silently replaces `dst` if it exists (and is of a compatible
    /// file/directory type and, for a directory, empty).
    pub fn replace(&self, src: &str, dst: &str) -> Result<()> {
        self.inner.lock().unwrap().move_entry(src, dst, true)
    }

    /// `times = None` means "now" for both access and modification time.
    pub fn utime(&self, path: &str, times: Option<(NaiveDateTime, NaiveDateTime)>) -> Result<()> {
        self.inner.lock().unwrap().utime(path, times)
    }

    pub fn realpath(&self, path: &str) -> String {
        self.inner.lock().unwrap().realpath(path)
    }

    pub fn getcwd(&self) -> String {
        self.inner.lock().unwrap().getcwd()
    }

    pub fn chdir(&self, path: &str) -> Result<()> {
        self.inner.lock().unwrap().chdir(path)
    }

    pub fn chmod(&self, _path: &str, _mode: u32) -> Result<()> {
        Err(DiskError::UnsupportedOperation("chmod is unsupported for this file system".into()))
    }

    pub fn link(&self, _src: &str, _dst: &str) -> Result<()> {
        Err(DiskError::UnsupportedOperation("link is unsupported for this file system".into()))
    }

    pub fn symlink(&self, _src: &str, _dst: &str) -> Result<()> {
        Err(DiskError::UnsupportedOperation("symlink is unsupported for this file system".into()))
    }

    pub fn readlink(&self, _path: &str) -> Result<String> {
        Err(DiskError::UnsupportedOperation("readlink is unsupported for this file system".into()))
    }
}

/// Iterator returned by [`FileSystem::scandir`].
pub struct ScanDir<'a, S: SectorStore> {
    fs: &'a FileSystem<S>,
    dir: NodeId,
    dirpath: String,
    index: usize,
}

impl<'a, S: SectorStore> Iterator for ScanDir<'a, S> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut inner = self.fs.inner.lock().unwrap();
        if let Err(e) = inner.ensure_children(self.dir) {
            return Some(Err(e));
        }
        let children = inner.nodes[self.dir].children.clone().unwrap_or_default();
        if self.index >= children.len() {
            return None;
        }
        let child = children[self.index];
        self.index += 1;

        let entry = inner.nodes[child].entry.clone().expect("child always has an entry");
        let stat = inner.stat_entry(Some(&entry));
        let name = entry.filename();
        let path = if self.dirpath == "/" {
            format!("/{name}")
        } else {
            format!("{}/{}", self.dirpath, name)
        };
        Some(Ok(DirEntry { name, path, stat }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::{MemStorage, SectorSize};
    use chrono::NaiveDate;

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    /// A minimal, writable FAT16 image: 16870 sectors of 512 bytes, 4
    /// sectors per cluster, 2 17-sector FATs, a 512-entry root directory --
    /// 4200 data clusters, comfortably inside FAT16's [4085, 65524) range
    /// (`FatType::from_total_clusters`).
    fn fat16_image() -> MemStorage {
        let lss = 512u32;
        let sector_size = SectorSize::uniform(lss).unwrap();
        let total_sectors: u32 = 16870;
        let mut store = MemStorage::new(total_sectors as u64 * lss as u64, sector_size);

        let mut buf = [0u8; 512];
        buf[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        buf[3..11].copy_from_slice(b"MSDOS5.0");
        crate::util::codec::put_le!(buf, 11, lss as u16);
        buf[13] = 4; // sectors per cluster
        crate::util::codec::put_le!(buf, 14, 4u16); // reserved sectors
        buf[16] = 2; // num fats
        crate::util::codec::put_le!(buf, 17, 512u16); // rootdir entries
        crate::util::codec::put_le!(buf, 19, total_sectors as u16);
        buf[21] = 0xF8;
        crate::util::codec::put_le!(buf, 22, 17u16); // fat size (sectors)
        crate::util::codec::put_le!(buf, 24, 63u16);
        crate::util::codec::put_le!(buf, 26, 255u16);
        crate::util::codec::put_le!(buf, 28, 0u32);
        crate::util::codec::put_le!(buf, 32, 0u32);
        buf[36] = 0x80;
        buf[37] = 0;
        buf[38] = 0x29;
        crate::util::codec::put_le!(buf, 39, 0x1234_5678u32);
        buf[43..54].copy_from_slice(b"NO NAME    ");
        buf[54..62].copy_from_slice(b"FAT16   ");
        buf[510] = 0x55;
        buf[511] = 0xAA;

        store.write_bytes(0, &buf).unwrap();
        let (boot_sector, _) = BootSector::parse(&buf).unwrap();
        assert_eq!(boot_sector.fat_type(), FatType::Fat16);
        store
            .write_bytes(boot_sector.fat_region_start() * lss as u64, &[0xF8, 0xFF, 0xFF, 0xFF])
            .unwrap();
        store
    }

    fn open_fs() -> FileSystem<MemStorage> {
        FileSystem::from_volume_with_clock(fat16_image(), true, fixed_clock).unwrap()
    }

    #[test]
    fn root_listing_starts_empty() {
        let fs = open_fs();
        assert_eq!(fs.listdir("/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn mkdir_then_listdir_sees_it() {
        let fs = open_fs();
        fs.mkdir("/docs").unwrap();
        assert_eq!(fs.listdir("/").unwrap(), vec!["docs".to_string()]);
        assert!(fs.stat("/docs").unwrap().is_dir());
    }

    #[test]
    fn mkdir_of_existing_path_fails() {
        let fs = open_fs();
        fs.mkdir("/docs").unwrap();
        assert!(matches!(fs.mkdir("/docs"), Err(DiskError::AlreadyExists(_))));
    }

    #[test]
    fn mkdir_of_root_is_rejected() {
        let fs = open_fs();
        assert!(matches!(fs.mkdir("/"), Err(DiskError::PermissionDenied(_))));
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let fs = open_fs();
        let fd = fs.open_fd("/hello.txt", O_CREAT | O_WRONLY).unwrap();
        assert_eq!(fs.write_fd(fd, b"hello").unwrap(), 5);
        fs.close_fd(fd).unwrap();

        let fd = fs.open_fd("/hello.txt", O_RDONLY).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(fs.read_fd(fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        fs.close_fd(fd).unwrap();

        assert_eq!(fs.stat("/hello.txt").unwrap().size, 5);
    }

    #[test]
    fn open_existing_with_excl_fails() {
        let fs = open_fs();
        let fd = fs.open_fd("/a.txt", O_CREAT | O_WRONLY).unwrap();
        fs.close_fd(fd).unwrap();
        assert!(matches!(
            fs.open_fd("/a.txt", O_CREAT | O_EXCL | O_WRONLY),
            Err(DiskError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_root_fails() {
        let fs = open_fs();
        assert!(matches!(fs.open_fd("/", O_RDONLY), Err(DiskError::IsADirectory(_))));
    }

    #[test]
    fn rmdir_nonempty_fails() {
        let fs = open_fs();
        fs.mkdir("/d").unwrap();
        let fd = fs.open_fd("/d/f.txt", O_CREAT | O_WRONLY).unwrap();
        fs.close_fd(fd).unwrap();
        assert!(matches!(fs.rmdir("/d"), Err(DiskError::NotEmpty(_))));
    }

    #[test]
    fn rmdir_empty_removes_it() {
        let fs = open_fs();
        fs.mkdir("/d").unwrap();
        fs.rmdir("/d").unwrap();
        assert_eq!(fs.listdir("/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn unlink_of_directory_fails() {
        let fs = open_fs();
        fs.mkdir("/d").unwrap();
        assert!(matches!(fs.unlink("/d"), Err(DiskError::IsADirectory(_))));
    }

    #[test]
    fn rename_moves_entry_across_parents() {
        let fs = open_fs();
        fs.mkdir("/a").unwrap();
        fs.mkdir("/b").unwrap();
        let fd = fs.open_fd("/a/f.txt", O_CREAT | O_WRONLY).unwrap();
        fs.write_fd(fd, b"data").unwrap();
        fs.close_fd(fd).unwrap();

        fs.rename("/a/f.txt", "/b/f.txt").unwrap();
        assert_eq!(fs.listdir("/a").unwrap(), Vec::<String>::new());
        assert_eq!(fs.listdir("/b").unwrap(), vec!["f.txt".to_string()]);

        let fd = fs.open_fd("/b/f.txt", O_RDONLY).unwrap();
        let mut buf = [0u8; 4];
        fs.read_fd(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
        fs.close_fd(fd).unwrap();
    }

    #[test]
    fn rename_onto_existing_without_replace_fails() {
        let fs = open_fs();
        let fd = fs.open_fd("/a.txt", O_CREAT | O_WRONLY).unwrap();
        fs.close_fd(fd).unwrap();
        let fd = fs.open_fd("/b.txt", O_CREAT | O_WRONLY).unwrap();
        fs.close_fd(fd).unwrap();
        assert!(matches!(fs.rename("/a.txt", "/b.txt"), Err(DiskError::AlreadyExists(_))));
        fs.replace("/a.txt", "/b.txt").unwrap();
        assert_eq!(fs.listdir("/").unwrap(), vec!["b.txt".to_string()]);
    }

    #[test]
    fn in_use_file_blocks_unlink() {
        let fs = open_fs();
        let fd = fs.open_fd("/busy.txt", O_CREAT | O_WRONLY).unwrap();
        assert!(matches!(fs.unlink("/busy.txt"), Err(DiskError::PermissionDenied(_))));
        fs.close_fd(fd).unwrap();
        fs.unlink("/busy.txt").unwrap();
    }

    #[test]
    fn scandir_yields_every_child() {
        let fs = open_fs();
        fs.mkdir("/x").unwrap();
        fs.mkdir("/y").unwrap();
        let names: Vec<String> = fs.scandir("/").unwrap().map(|e| e.unwrap().name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"x".to_string()));
        assert!(names.contains(&"y".to_string()));
    }

    #[test]
    fn chdir_and_relative_paths() {
        let fs = open_fs();
        fs.mkdir("/sub").unwrap();
        fs.chdir("/sub").unwrap();
        assert_eq!(fs.getcwd(), "/sub");
        let fd = fs.open_fd("rel.txt", O_CREAT | O_WRONLY).unwrap();
        fs.close_fd(fd).unwrap();
        assert_eq!(fs.realpath("rel.txt"), "/sub/rel.txt");
    }

    #[test]
    fn chmod_link_symlink_readlink_are_unsupported() {
        let fs = open_fs();
        assert!(matches!(fs.chmod("/x", 0o644), Err(DiskError::UnsupportedOperation(_))));
        assert!(matches!(fs.link("/a", "/b"), Err(DiskError::UnsupportedOperation(_))));
        assert!(matches!(fs.symlink("/a", "/b"), Err(DiskError::UnsupportedOperation(_))));
        assert!(matches!(fs.readlink("/a"), Err(DiskError::UnsupportedOperation(_))));
    }
}
