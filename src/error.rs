//! Error and diagnostic-warning taxonomy shared by every layer of the crate.
//!
//! Hard failures are a single [`DiskError`] enum (via `thiserror`); advisory
//! failures -- the kind that a permissive parser still wants to surface, but
//! that shouldn't abort the caller -- are collected into a [`Warning`] list
//! instead of being raised. Codecs that can produce warnings return
//! `Result<(T, Vec<Warning>), DiskError>` rather than swallowing them.

use std::fmt;

pub type Result<T> = std::result::Result<T, DiskError>;

/// Hard failures. See spec §7 for the taxonomy this mirrors.
#[derive(thiserror::Error, Debug)]
pub enum DiskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("bounds error: {0}")]
    Bounds(String),

    #[error("misaligned: {0}")]
    Alignment(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(u32),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("file system limit reached: {0}")]
    FilesystemLimit(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Advisory conditions: the structure parsed but violates a non-fatal rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Parsed structure violates an advisory rule (unrecognized OEM name,
    /// empty boot code, etc.) but is otherwise usable.
    Validation(String),
    /// Partition bounds are suspicious (overlap or out-of-range) but were
    /// accepted on load; writing the table back out will be rejected.
    Bounds(String),
    /// Partition/volume is not aligned to the disk's physical sector size.
    Alignment(String),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Validation(s) => write!(f, "validation warning: {s}"),
            Warning::Bounds(s) => write!(f, "bounds warning: {s}"),
            Warning::Alignment(s) => write!(f, "alignment warning: {s}"),
        }
    }
}

/// Accumulator passed through parse paths so warnings can be collected
/// without aborting, then logged by the caller (or inspected by tests).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnostics(pub Vec<Warning>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.0.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }
}
