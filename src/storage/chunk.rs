//! # Chunks and Block Handles
//!
//! A chunk is one page viewed as a 48-byte header plus an array of
//! fixed-size blocks. The header records the chunk's own page index, its
//! capacity, how many blocks are free, the block size, the next chunk in
//! its collection, and the head of the intrusive free-block list.
//!
//! ## Chunk Header Layout (48 bytes)
//!
//! ```text
//! Offset  Size  Field             Notes
//! ------  ----  ----------------  -----------------------------------
//! 0       8     chunk_idx         owner page index
//! 8       8     capacity          number of blocks in the payload
//! 16      8     num_free_blocks   0 <= n <= capacity
//! 24      8     block_size        bytes per block (>= 8)
//! 32      8     next_chunk        next chunk in collection, -1 = tail
//! 40      8     first_free_block  free-list head, -1 = full
//! ```
//!
//! Free blocks form an intrusive singly linked list: the first 8 bytes of
//! a free slot hold the next free block index (-1 terminates). That link
//! is why block sizes are clamped to a minimum of 8.

use zerocopy::little_endian::I64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{NONE_IDX, PAGE_SIZE};

pub const CHUNK_HEADER_SIZE: usize = 48;

/// Smallest allocatable block: a free slot must fit its next-free link.
pub const MIN_BLOCK_SIZE: i64 = 8;

/// Blocks a chunk of `block_size`-byte blocks can hold.
pub fn capacity_for(block_size: i64) -> i64 {
    (PAGE_SIZE as i64 - CHUNK_HEADER_SIZE as i64) / block_size
}

/// Handle of one block: `(chunk page index, block index within chunk)`.
///
/// Stable for the lifetime of the record: file growth never moves a
/// chunk, so a chblix only dies when its block is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chblix {
    pub chunk: i64,
    pub block: i64,
}

impl Chblix {
    /// The absent handle, `(-1, -1)`; used in on-disk encodings.
    pub const NONE: Chblix = Chblix {
        chunk: NONE_IDX,
        block: NONE_IDX,
    };

    pub fn new(chunk: i64, block: i64) -> Self {
        Self { chunk, block }
    }

    pub fn is_none(&self) -> bool {
        self.chunk == NONE_IDX
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ChunkHeader {
    chunk_idx: I64,
    capacity: I64,
    num_free_blocks: I64,
    block_size: I64,
    next_chunk: I64,
    first_free_block: I64,
}

const _: () = assert!(std::mem::size_of::<ChunkHeader>() == CHUNK_HEADER_SIZE);

impl ChunkHeader {
    /// Header of a freshly carved chunk: everything free, no successor.
    pub fn new(chunk_idx: i64, block_size: i64) -> Self {
        let capacity = capacity_for(block_size);
        Self {
            chunk_idx: I64::new(chunk_idx),
            capacity: I64::new(capacity),
            num_free_blocks: I64::new(capacity),
            block_size: I64::new(block_size),
            next_chunk: I64::new(NONE_IDX),
            first_free_block: I64::new(0),
        }
    }

    pub fn chunk_idx(&self) -> i64 {
        self.chunk_idx.get()
    }

    pub fn capacity(&self) -> i64 {
        self.capacity.get()
    }

    pub fn num_free_blocks(&self) -> i64 {
        self.num_free_blocks.get()
    }

    pub fn set_num_free_blocks(&mut self, n: i64) {
        self.num_free_blocks = I64::new(n);
    }

    pub fn block_size(&self) -> i64 {
        self.block_size.get()
    }

    pub fn next_chunk(&self) -> i64 {
        self.next_chunk.get()
    }

    pub fn set_next_chunk(&mut self, next: i64) {
        self.next_chunk = I64::new(next);
    }

    pub fn first_free_block(&self) -> i64 {
        self.first_free_block.get()
    }

    pub fn set_first_free_block(&mut self, block: i64) {
        self.first_free_block = I64::new(block);
    }

    pub fn is_full(&self) -> bool {
        self.num_free_blocks.get() == 0
    }

    pub fn is_drained(&self) -> bool {
        self.num_free_blocks.get() == self.capacity.get()
    }

    /// Byte offset of a block's slot within the chunk's page.
    pub fn block_offset(&self, block: i64) -> usize {
        CHUNK_HEADER_SIZE + (block * self.block_size.get()) as usize
    }
}
