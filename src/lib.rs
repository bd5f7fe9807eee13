//! Block-structured file storage with pluggable per-block transforms.
//!
//! A backing random-access stream is divided into a fixed-size header
//! followed by fixed-size blocks, each framed by a [`Transform`] before
//! it reaches storage — encryption, checksumming, or any other opaque
//! per-block codec satisfying the same contract.
//!
//! - [`BlockFile`] owns the raw stream and drives the transform at
//!   every boundary: open, block read/write, sync, close.
//! - [`StreamFile`] layers a sequential, byte-addressed cursor on top
//!   of a block file (reads and seeks; block-level writes stay on
//!   [`BlockFile`]).
//! - [`Interlay`] is the pure position arithmetic shared by both.
//! - [`crypto::CryptoTransform`] is the flagship transform: per-block
//!   AES-256-GCM under keys derived from the block index, with the
//!   master key recoverable only by hashing the full payload.

pub mod block_file;
pub mod crypto;
pub mod interlay;
pub mod stream_file;
pub mod transform;

pub use block_file::{BlockFile, BlockFileError, BlockSeekFrom};
pub use interlay::Interlay;
pub use stream_file::StreamFile;
pub use transform::{
    ChecksumTransform, HeaderOutcome, InitOutcome, Passthrough, Transform, TransformError,
};
