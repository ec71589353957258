//! The storage contract and the in-memory reference backend.
//!
//! The distribution core is agnostic about where piece payloads live; it
//! only needs indexed byte access and a whole-content digest for
//! correctness checks. Production backends (file, mmap) are supplied by the
//! harness; [`MemoryStorage`] here backs the tests.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// The storage backing the operation currently in flight, if any. Swapped
/// per distribution call; sender workers read pieces through it at drain
/// time.
pub(crate) type SharedStorage = Arc<Mutex<Option<Arc<dyn Storage>>>>;

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The piece index is outside `[0, piece_count)`.
    #[error("piece {index} out of range (piece count {count})")]
    OutOfRange { index: u32, count: u32 },

    /// The piece has not been written yet.
    #[error("piece {0} not present")]
    Missing(u32),

    /// Backend I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque byte source/sink keyed by piece index.
pub trait Storage: Send + Sync {
    /// Total number of pieces.
    fn piece_count(&self) -> u32;

    /// Reads the payload of a possessed piece, for sending.
    fn read_piece(&self, index: u32) -> Result<Bytes, StorageError>;

    /// Stores the payload of a received piece.
    fn write_piece(&self, index: u32, payload: Bytes) -> Result<(), StorageError>;

    /// Whole-content hash over the pieces in index order. Only meaningful
    /// once the storage is fully populated.
    fn digest(&self) -> Vec<u8>;

    /// Discards all piece payloads.
    fn clear(&self);
}

/// Heap-backed storage splitting one block of bytes into equal-size pieces.
pub struct MemoryStorage {
    pieces: RwLock<Vec<Option<Bytes>>>,
}

impl MemoryStorage {
    /// Empty storage with room for `piece_count` pieces.
    pub fn empty(piece_count: u32) -> Self {
        Self {
            pieces: RwLock::new(vec![None; piece_count as usize]),
        }
    }

    /// Fully-populated storage over `data`, split into `piece_count` pieces.
    /// The final piece takes the remainder.
    pub fn from_bytes(data: &[u8], piece_count: u32) -> Self {
        let piece_size = data.len().div_ceil(piece_count as usize).max(1);
        let pieces = (0..piece_count as usize)
            .map(|i| {
                let start = (i * piece_size).min(data.len());
                let end = ((i + 1) * piece_size).min(data.len());
                Some(Bytes::copy_from_slice(&data[start..end]))
            })
            .collect();
        Self {
            pieces: RwLock::new(pieces),
        }
    }

    /// True once every piece has been written.
    pub fn is_complete(&self) -> bool {
        self.pieces.read().iter().all(Option::is_some)
    }
}

impl Storage for MemoryStorage {
    fn piece_count(&self) -> u32 {
        self.pieces.read().len() as u32
    }

    fn read_piece(&self, index: u32) -> Result<Bytes, StorageError> {
        let pieces = self.pieces.read();
        let slot = pieces.get(index as usize).ok_or(StorageError::OutOfRange {
            index,
            count: pieces.len() as u32,
        })?;
        slot.clone().ok_or(StorageError::Missing(index))
    }

    fn write_piece(&self, index: u32, payload: Bytes) -> Result<(), StorageError> {
        let mut pieces = self.pieces.write();
        let count = pieces.len() as u32;
        let slot = pieces
            .get_mut(index as usize)
            .ok_or(StorageError::OutOfRange { index, count })?;
        *slot = Some(payload);
        Ok(())
    }

    fn digest(&self) -> Vec<u8> {
        let mut hasher = Sha1::new();
        for piece in self.pieces.read().iter().flatten() {
            hasher.update(piece);
        }
        hasher.finalize().to_vec()
    }

    fn clear(&self) {
        for slot in self.pieces.write().iter_mut() {
            *slot = None;
        }
    }
}
