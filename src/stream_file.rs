//! Byte-stream access over a block file.
//!
//! [`StreamFile`] composes a [`BlockFile`] into a sequentially readable,
//! seekable byte stream with its own byte-granular cursor.  Reads pull
//! one block at a time through a one-block cache; writes are not
//! supported at byte granularity and fail explicitly — use
//! [`BlockFile::write_block`] before wrapping the store.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::block_file::{BlockFile, BlockFileError, BlockSeekFrom};
use crate::transform::Transform;

/// A [`BlockFile`] accessed bytewise.
pub struct StreamFile<F: Read + Write + Seek, T: Transform> {
    file: BlockFile<F, T>,
    data_size: u64,
    /// The current logical byte position, independent of the store's
    /// block cursor until a seek synchronizes them.
    pos: u64,
    /// Last block fetched: `(block index, decoded payload)`.  Dropped
    /// whenever a seek lands outside the cached block.
    cache: Option<(u64, Vec<u8>)>,
}

impl<F: Read + Write + Seek, T: Transform> StreamFile<F, T> {
    /// Wrap a block file.  The stream starts at byte 0.
    pub fn new(file: BlockFile<F, T>) -> Self {
        let data_size = file.data_size() as u64;
        Self {
            file,
            data_size,
            pos: 0,
            cache: None,
        }
    }

    /// The current logical byte position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Give the wrapped block file back, discarding the read cache.
    pub fn into_inner(self) -> BlockFile<F, T> {
        self.file
    }

    /// Sync and release the underlying store.
    pub fn close(self) -> Result<(F, T), BlockFileError> {
        self.file.close()
    }

    fn seek_inner(&mut self, whence: SeekFrom) -> Result<u64, BlockFileError> {
        // Resolve the absolute byte target first: relative variants can
        // land before byte 0, which the std contract treats as an error
        // rather than a clamp.
        let target = match whence {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => {
                let end = self.file.num_blocks()? as i128 * self.data_size as i128;
                end + delta as i128
            }
        };
        if target < 0 {
            return Err(BlockFileError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the stream",
            )));
        }
        let target = target as u64;
        let rem = target % self.data_size;
        let reached = self
            .file
            .seek_block(BlockSeekFrom::Start(target / self.data_size))?;
        if self.cache.as_ref().map(|(b, _)| *b) != Some(reached) {
            self.cache = None;
        }
        // The store may have clamped the block; the byte position must
        // reflect the block actually reached.
        self.pos = reached * self.data_size + rem;
        Ok(self.pos)
    }

    /// Read into `buf` from the current position, touching a single
    /// block only.  Returns the number of bytes copied, which may be
    /// less than `buf.len()` when the buffer spans a block boundary,
    /// and 0 at end of stream.
    pub fn read_once(&mut self, buf: &mut [u8]) -> Result<usize, BlockFileError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let block = self.pos / self.data_size;
        let offset = (self.pos % self.data_size) as usize;

        let data: &[u8] = match &mut self.cache {
            Some((b, d)) if *b == block => &d[..],
            slot => {
                self.file.seek_block(BlockSeekFrom::Start(block))?;
                let fetched = match self.file.read_block() {
                    Ok(d) => d,
                    // A block boundary with nothing behind it is a clean
                    // end of stream, not an error.
                    Err(BlockFileError::ShortRead { got: 0, .. }) => return Ok(0),
                    Err(e) => return Err(e),
                };
                &slot.insert((block, fetched)).1[..]
            }
        };

        if offset >= data.len() {
            return Ok(0);
        }
        let m = buf.len().min(data.len() - offset);
        buf[..m].copy_from_slice(&data[offset..offset + m]);
        self.pos += m as u64;
        Ok(m)
    }

    /// Read until `buf` is full or the stream ends, crossing block
    /// boundaries as needed.  Returns the number of bytes copied.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, BlockFileError> {
        let mut n = 0;
        while n < buf.len() {
            let m = self.read_once(&mut buf[n..])?;
            if m == 0 {
                break;
            }
            n += m;
        }
        Ok(n)
    }
}

impl<F: Read + Write + Seek, T: Transform> Read for StreamFile<F, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_once(buf).map_err(io::Error::from)
    }
}

impl<F: Read + Write + Seek, T: Transform> Seek for StreamFile<F, T> {
    fn seek(&mut self, whence: SeekFrom) -> io::Result<u64> {
        self.seek_inner(whence).map_err(io::Error::from)
    }
}

impl<F: Read + Write + Seek, T: Transform> Write for StreamFile<F, T> {
    /// Byte-granular writes are not supported; write whole blocks
    /// through [`BlockFile::write_block`] instead.
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "byte-level writes are not supported; use BlockFile::write_block",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
