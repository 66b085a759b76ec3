//! Chunk-backed byte storage and the tagged output-queue buffer.
//!
//! Serialized frame headers land in fixed-size [`Chunk`]s pooled per stream;
//! the output queue references them through [`TypedBuf::Shared`] entries that
//! address a chunk by id rather than by pointer. QPACK output and
//! application data ride along as `Private` and `Alien` entries whose
//! backing is a refcounted [`Bytes`] handle.

use crate::varint;
use bytes::Bytes;

/// Size of a serialization chunk. Must be at least as large as any single
/// shared write a serializer performs (frame headers and small fixed-field
/// frames only; payloads go out as private or alien buffers).
pub const CHUNK_SIZE: usize = 1024;

/// A fixed-size byte region owned by a stream's chunk pool.
///
/// Chunks are identified by a per-stream monotonic id, so the pool FIFO
/// always holds a contiguous id range and shared buffers can address their
/// chunk by `id - head_id`.
#[derive(Debug)]
pub struct Chunk {
    id: u64,
    data: Vec<u8>,
    last: usize,
}

impl Chunk {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            data: vec![0; CHUNK_SIZE],
            last: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current write cursor.
    pub fn last(&self) -> usize {
        self.last
    }

    /// Bytes of free space after the cursor.
    pub fn left(&self) -> usize {
        CHUNK_SIZE - self.last
    }

    /// Append raw bytes at the cursor.
    pub fn put_slice(&mut self, src: &[u8]) {
        debug_assert!(src.len() <= self.left());
        self.data[self.last..self.last + src.len()].copy_from_slice(src);
        self.last += src.len();
    }

    pub fn put_u8(&mut self, b: u8) {
        debug_assert!(self.left() >= 1);
        self.data[self.last] = b;
        self.last += 1;
    }

    /// Append a varint at the cursor. The caller has sized the chunk via
    /// `ensure_chunk`, so encoding cannot fail here.
    pub fn put_varint(&mut self, value: u64) {
        let n = varint::encode(value, &mut self.data[self.last..])
            .expect("chunk sized for varint by ensure_chunk");
        self.last += n;
    }

    /// Written bytes in `[pos, last)`.
    pub fn slice(&self, pos: usize, last: usize) -> &[u8] {
        &self.data[pos..last]
    }
}

/// An output-queue entry with explicit ownership.
#[derive(Debug)]
pub enum TypedBuf {
    /// Points into a [`Chunk`] in the stream's pool; the chunk is released
    /// once this entry is acked and the chunk is the pool head.
    Shared { chunk_id: u64, pos: usize, last: usize },

    /// Owns its bytes (QPACK prefix/representation/update blocks); dropped
    /// when popped.
    Private(Bytes),

    /// Application-owned DATA payload; never copied, acked bytes are
    /// reported through the stream's `acked_data` callback.
    Alien(Bytes),
}

impl TypedBuf {
    pub fn len(&self) -> usize {
        match self {
            TypedBuf::Shared { pos, last, .. } => last - pos,
            TypedBuf::Private(b) | TypedBuf::Alien(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_alien(&self) -> bool {
        matches!(self, TypedBuf::Alien(_))
    }
}
