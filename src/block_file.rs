//! The block store: a raw seekable stream addressed as a header plus a
//! sequence of fixed-size, transform-framed blocks.
//!
//! A [`BlockFile`] exclusively owns its stream for the whole open
//! lifetime; seeking or writing the stream from outside would
//! desynchronize the cursor bookkeeping.  One authoritative block cursor
//! advances by exactly one block on every successful read or write, and
//! is restored to the same block boundary after any failed one, so a
//! caller observing an error may retry.
//!
//! The transform's full-read signal is intercepted here and converted
//! into a streaming pass over the raw payload; it never surfaces past
//! open, sync or close.

use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tracing::{debug, trace};

use crate::interlay::Interlay;
use crate::transform::{HeaderOutcome, InitOutcome, Transform, TransformError};

#[derive(Error, Debug)]
pub enum BlockFileError {
    /// The stream held fewer bytes than a full header or block.
    #[error("Short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },
    /// The stream accepted fewer bytes than a full header or block.
    #[error("Short write: wanted {wanted} bytes, wrote {got}")]
    ShortWrite { wanted: usize, got: usize },
    /// The transform framed a block to the wrong length.
    #[error("Transform produced a {got}-byte frame, block size is {wanted}")]
    BadFrame { wanted: usize, got: usize },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<BlockFileError> for io::Error {
    fn from(e: BlockFileError) -> Self {
        match e {
            BlockFileError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Where to seek a block cursor from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSeekFrom {
    /// Absolute block index.
    Start(u64),
    /// Relative to the current block.
    Current(i64),
    /// Block count minus the offset, so `End(0)` is the append point.
    /// Forces a recount of the file's blocks.
    End(i64),
}

/// A file of transform-framed fixed-size blocks behind an optional
/// header.
///
/// `file` may be anything seekable: an [`std::fs::File`], an in-memory
/// [`std::io::Cursor`], etc.  Both the stream and the transform are
/// returned by [`BlockFile::close`].
pub struct BlockFile<F: Read + Write + Seek, T: Transform> {
    header_size: usize,
    block_size: usize,
    data_size: usize,
    layout: Interlay,
    block_pos: u64,
    /// Blocks in the file; 0 doubles as "unknown, recompute from the
    /// stream length".
    num_blocks: u64,
    transform: T,
    file: F,
}

impl<F: Read + Write + Seek, T: Transform> std::fmt::Debug for BlockFile<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFile")
            .field("header_size", &self.header_size)
            .field("block_size", &self.block_size)
            .field("data_size", &self.data_size)
            .field("layout", &self.layout)
            .field("block_pos", &self.block_pos)
            .field("num_blocks", &self.num_blocks)
            .finish_non_exhaustive()
    }
}

impl<F: Read + Write + Seek, T: Transform> BlockFile<F, T> {
    /// Open `file` as a block file framed by `transform`.
    ///
    /// Reads the stored header (an empty stream is a valid new file and
    /// yields no header), initializes the transform, runs the full-read
    /// pass if the transform demands one, and leaves the cursor at
    /// block 0.
    pub fn open(file: F, transform: T) -> Result<Self, BlockFileError> {
        let header_size = transform.header_size();
        let block_size = transform.block_size();
        let data_size = transform.data_size();
        debug!(header_size, block_size, data_size, "opening block file");

        let mut bf = Self {
            header_size,
            block_size,
            data_size,
            // Prefix/postfix framing lives inside the transform; the
            // store only addresses whole blocks.
            layout: Interlay::new(header_size as u64, 0, block_size as u64, 0),
            block_pos: 0,
            num_blocks: 0,
            transform,
            file,
        };
        let header = bf.read_header()?;
        match bf.transform.init(header.as_deref())? {
            InitOutcome::Ready => {}
            InitOutcome::FullReadRequired => {
                bf.full_read()?;
            }
        }
        bf.seek_to_block(0)?;
        Ok(bf)
    }

    /// Size of one framed block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Size of the data carried in one block.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Size of the header.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// The current block cursor.
    pub fn block_position(&self) -> u64 {
        self.block_pos
    }

    /// Borrow the transform.
    pub fn transform(&self) -> &T {
        &self.transform
    }

    fn seek_to_block(&mut self, block: u64) -> Result<(), BlockFileError> {
        let (pos, _) = self.layout.read_slice(block);
        self.file.seek(SeekFrom::Start(pos))?;
        self.block_pos = block;
        Ok(())
    }

    /// Restore the raw cursor to the current block after a failure,
    /// preferring the original error over any restore error.
    fn restore_cursor(&mut self) {
        let _ = self.seek_to_block(self.block_pos);
    }

    fn read_header(&mut self) -> Result<Option<Vec<u8>>, BlockFileError> {
        if self.header_size == 0 {
            self.seek_to_block(0)?;
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(0))?;
        let mut header = vec![0u8; self.header_size];
        let got = read_up_to(&mut self.file, &mut header)?;
        let header = match got {
            // End of stream at byte 0: a new file without a header yet.
            0 => None,
            n if n < self.header_size => {
                return Err(BlockFileError::ShortRead {
                    wanted: self.header_size,
                    got: n,
                })
            }
            _ => Some(header),
        };
        self.seek_to_block(0)?;
        Ok(header)
    }

    fn write_header(&mut self, header: &[u8]) -> Result<(), BlockFileError> {
        trace!(bytes = header.len(), "writing header");
        self.file.seek(SeekFrom::Start(0))?;
        // Pad or truncate to exactly the header size.
        let mut buf = vec![0u8; self.header_size];
        let n = header.len().min(self.header_size);
        buf[..n].copy_from_slice(&header[..n]);
        let wrote = match self.file.write(&buf) {
            Ok(n) => n,
            Err(e) => {
                self.restore_cursor();
                return Err(e.into());
            }
        };
        if wrote < self.header_size {
            self.restore_cursor();
            return Err(BlockFileError::ShortWrite {
                wanted: self.header_size,
                got: wrote,
            });
        }
        self.seek_to_block(self.block_pos)
    }

    fn full_read(&mut self) -> Result<Option<Vec<u8>>, BlockFileError> {
        debug!("transform requested a full payload pass");
        self.file
            .seek(SeekFrom::Start(self.layout.payload_position()))?;
        let header = self.transform.full_read(&mut self.file)?;
        self.seek_to_block(0)?;
        Ok(header)
    }

    /// Read the block at the cursor and advance to the next one.
    ///
    /// Returns the decoded payload.  A stream with fewer than
    /// [`BlockFile::block_size`] bytes remaining is a fatal short read
    /// (partial blocks are never tolerated); on any failure the cursor
    /// is restored to the same block.
    pub fn read_block(&mut self) -> Result<Vec<u8>, BlockFileError> {
        self.seek_to_block(self.block_pos)?;
        let mut raw = vec![0u8; self.block_size];
        let got = match read_up_to(&mut self.file, &mut raw) {
            Ok(n) => n,
            Err(e) => {
                self.restore_cursor();
                return Err(e.into());
            }
        };
        if got < self.block_size {
            self.restore_cursor();
            return Err(BlockFileError::ShortRead {
                wanted: self.block_size,
                got,
            });
        }
        match self.transform.read_block(self.block_pos, &raw) {
            Ok(data) => {
                self.block_pos += 1;
                Ok(data)
            }
            Err(e) => {
                self.restore_cursor();
                Err(e.into())
            }
        }
    }

    /// Frame `data` through the transform, write it at the cursor and
    /// advance to the next block.
    ///
    /// Extending the file by one block past the last existing one bumps
    /// the block count; on any failure the cursor is restored.
    pub fn write_block(&mut self, data: &[u8]) -> Result<(), BlockFileError> {
        if self.num_blocks == 0 {
            // "Is this the last block" bookkeeping needs a real count.
            self.compute_num_blocks()?;
        } else {
            self.seek_to_block(self.block_pos)?;
        }
        let frame = self.transform.write_block(self.block_pos, data)?;
        if frame.len() != self.block_size {
            return Err(BlockFileError::BadFrame {
                wanted: self.block_size,
                got: frame.len(),
            });
        }
        let wrote = match self.file.write(&frame) {
            Ok(n) => n,
            Err(e) => {
                self.restore_cursor();
                return Err(e.into());
            }
        };
        if wrote < self.block_size {
            self.restore_cursor();
            return Err(BlockFileError::ShortWrite {
                wanted: self.block_size,
                got: wrote,
            });
        }
        if self.block_pos == self.num_blocks {
            self.num_blocks += 1;
        }
        self.block_pos += 1;
        Ok(())
    }

    fn compute_num_blocks(&mut self) -> Result<u64, BlockFileError> {
        let end = match self.file.seek(SeekFrom::End(0)) {
            Ok(n) => n,
            Err(e) => {
                self.restore_cursor();
                return Err(e.into());
            }
        };
        let payload = end.saturating_sub(self.layout.payload_position());
        self.num_blocks = payload / self.block_size as u64;
        let n = self.num_blocks;
        self.seek_to_block(self.block_pos)?;
        Ok(n)
    }

    /// The number of blocks in the file, computed lazily from the
    /// stream length.
    pub fn num_blocks(&mut self) -> Result<u64, BlockFileError> {
        if self.num_blocks == 0 {
            self.compute_num_blocks()?;
        }
        Ok(self.num_blocks)
    }

    /// Move the block cursor.  The result is clamped to the valid range:
    /// never negative, never more than one block past the last existing
    /// one.  Returns the block actually reached.
    pub fn seek_block(&mut self, whence: BlockSeekFrom) -> Result<u64, BlockFileError> {
        let target: i128 = match whence {
            BlockSeekFrom::Start(n) => n as i128,
            BlockSeekFrom::Current(d) => self.block_pos as i128 + d as i128,
            BlockSeekFrom::End(back) => self.compute_num_blocks()? as i128 - back as i128,
        };
        if self.num_blocks == 0 {
            // A zero count may just mean "never computed"; refresh it so
            // the clamp below uses the real block count.
            self.compute_num_blocks()?;
        }
        let limit = self.num_blocks as i128 + 1;
        let pos = target.clamp(0, limit) as u64;
        self.seek_to_block(pos)?;
        Ok(pos)
    }

    /// Sync the file: ask the transform for a header and persist it.
    /// An unchanged header skips the write; the cursor stays on the
    /// current block either way, even when resolving the header took a
    /// full payload pass.
    pub fn sync(&mut self) -> Result<(), BlockFileError> {
        trace!("syncing header");
        let saved = self.block_pos;
        let result = self.sync_inner();
        // The full-read pass parks the cursor at block 0; put it back
        // where the caller left it.  A sync failure wins over a
        // restore failure.
        let restored = self.seek_to_block(saved);
        result.and(restored)
    }

    fn sync_inner(&mut self) -> Result<(), BlockFileError> {
        let header = match self.transform.sync_header()? {
            HeaderOutcome::Unchanged => None,
            HeaderOutcome::Header(h) => Some(h),
            HeaderOutcome::FullReadRequired => self.full_read()?,
        };
        if let Some(h) = header {
            self.write_header(&h)?;
            // Only now is the header durable; transforms tracking a
            // dirty header clear it here.
            self.transform.header_persisted();
        }
        Ok(())
    }

    /// Sync, flush and release the underlying stream.
    pub fn close(mut self) -> Result<(F, T), BlockFileError> {
        self.sync()?;
        self.file.flush()?;
        Ok((self.file, self.transform))
    }
}

/// Read until `buf` is full or the stream ends.  Returns the number of
/// bytes read; end-of-stream is not an error here.
fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}
