//! Byte-offset field extraction, in the spirit of the small `e!` macro the
//! teacher's boot-sector and directory-entry parsers used for fixed-offset
//! little-endian fields -- generalized here to slices of runtime-determined
//! length instead of a fixed 512-byte `GenericArray`.

/// Extracts a little-endian integer field at a byte offset out of a slice.
///
/// ```ignore
/// let v: u32 = le!(u32, buf, 0x24);
/// ```
macro_rules! le {
    ($ty:tt, $buf:expr, $offset:expr) => {{
        let start = $offset;
        let end = start + core::mem::size_of::<$ty>();
        $ty::from_le_bytes($buf[start..end].try_into().unwrap())
    }};
}

/// Writes a little-endian integer field at a byte offset into a slice.
macro_rules! put_le {
    ($buf:expr, $offset:expr, $value:expr) => {{
        let bytes = $value.to_le_bytes();
        let start = $offset;
        $buf[start..start + bytes.len()].copy_from_slice(&bytes);
    }};
}

pub(crate) use le;
pub(crate) use put_le;
