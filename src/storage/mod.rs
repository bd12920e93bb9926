//! # Storage Layer
//!
//! Foundation of the engine: one memory-mapped file carved into fixed
//! 4 KiB pages. Page 0 is the superblock; every other page is a *chunk*,
//! a header plus an array of fixed-size blocks, owned by exactly one
//! collection (a table's row chain, a schema chain, the varchar heap, or
//! the metatable).
//!
//! ## Module Organization
//!
//! - `file`: memory-mapped file access ([`FileManager`])
//! - `superblock`: page-0 metadata ([`Superblock`])
//! - `chunk`: chunk headers and block handles ([`ChunkHeader`], [`Chblix`])
//! - `pool`: the linked-block allocator and its cursor
//!
//! ## Layout Summary
//!
//! ```text
//! page 0   +--------------------------+
//!          | Superblock (64 B)        |   magic, roots, free-chunk head
//!          | zeros to end of page     |
//! page 1.. +--------------------------+
//!          | ChunkHeader (48 B)       |   capacity, free list, next link
//!          | block 0 .. block cap-1   |   capacity * block_size bytes
//!          +--------------------------+
//! ```
//!
//! Block handles ([`Chblix`]) are `(chunk page index, block index)` pairs;
//! the file only grows, so a handle stays valid until its block is freed.

mod chunk;
mod file;
pub mod pool;
pub(crate) mod superblock;

pub use chunk::{capacity_for, Chblix, ChunkHeader, CHUNK_HEADER_SIZE, MIN_BLOCK_SIZE};
pub use file::FileManager;
pub use superblock::{Superblock, SUPERBLOCK_SIZE};

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Fixed page size; recorded in the superblock of every file.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel index for "no chunk" / "no block".
pub const NONE_IDX: i64 = -1;

/// Parses a zerocopy struct from a byte slice with size validation.
#[inline]
pub(crate) fn parse_zerocopy<'a, T: FromBytes + KnownLayout + Immutable + zerocopy::Unaligned>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// Parses a mutable zerocopy struct from a byte slice with size validation.
#[inline]
pub(crate) fn parse_zerocopy_mut<'a, T>(bytes: &'a mut [u8], type_name: &str) -> Result<&'a mut T>
where
    T: FromBytes + KnownLayout + zerocopy::IntoBytes + zerocopy::Unaligned,
{
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::mut_from_bytes(&mut bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}
