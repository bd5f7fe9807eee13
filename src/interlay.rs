//! Interlay calculation.
//!
//! An interlayed stream contains a header followed by fixed-size block
//! slices, each slice holding a block of data surrounded by prefix and
//! postfix bytes.  [`Interlay`] maps logical data positions to block
//! indices and physical byte ranges.  Pure arithmetic, no I/O.

/// Position arithmetic for an interlayed stream.
///
/// All derived constants are computed once at construction.  The header
/// always starts at byte 0; prefixes precede and postfixes follow every
/// block of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interlay {
    header_size: u64,
    prefix_size: u64,
    postfix_size: u64,
    data_size: u64,
    slice_len: u64,
    postfix_pos: u64,
}

impl Interlay {
    /// Callers must guarantee `data_size > 0`.
    pub fn new(header_size: u64, prefix_size: u64, data_size: u64, postfix_size: u64) -> Self {
        debug_assert!(data_size > 0, "interlay with zero data size");
        Self {
            header_size,
            prefix_size,
            postfix_size,
            data_size,
            slice_len: prefix_size + data_size + postfix_size,
            postfix_pos: prefix_size + data_size,
        }
    }

    /// Length of one full slice: prefix, data and postfix.
    #[inline]
    pub fn slice_len(&self) -> u64 {
        self.slice_len
    }

    /// Offset of the first data byte within a slice (the prefix size).
    #[inline]
    pub fn data_position(&self) -> u64 {
        self.prefix_size
    }

    /// Offset of the first postfix byte within a slice.
    #[inline]
    pub fn postfix_position(&self) -> u64 {
        self.postfix_pos
    }

    /// Byte position of the payload, directly following the header.
    #[inline]
    pub fn payload_position(&self) -> u64 {
        self.header_size
    }

    /// Block index containing the data byte at logical position `pos`.
    /// Logical positions count payload-data bytes only.
    #[inline]
    pub fn block_for(&self, pos: u64) -> u64 {
        pos / self.data_size
    }

    /// Physical byte range covering one full slice of `block`:
    /// `(first byte to read, number of bytes to read)`.
    #[inline]
    pub fn read_slice(&self, block: u64) -> (u64, u64) {
        (self.header_size + block * self.slice_len, self.slice_len)
    }
}
