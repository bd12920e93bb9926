//! # Varchar Heap
//!
//! Side storage for values wider than a fixed field: one linked-block
//! collection with a small block size (the *grain*), rooted in the
//! superblock. A VARCHAR field in a row slot holds only a 24-byte
//! [`VchTicket`]; the bytes themselves live here, chained grain by grain.
//!
//! ## Heap Block Layout
//!
//! ```text
//! +-------------------+------------------------+
//! | payload (grain B) | continuation chblix    |
//! |                   | (i64 chunk, i64 block) |
//! +-------------------+------------------------+
//! ```
//!
//! A string of N bytes occupies ceil(N/grain) blocks; the last block's
//! continuation is (-1, -1). The empty string is the empty ticket
//! (size 0, no blocks).
//!
//! Tickets are not stable under [`update`]: the old chain is freed and a
//! new one is written, so the caller must store the returned ticket.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{err, ErrorKind};
use crate::storage::{pool, superblock, Chblix, FileManager};

/// Reference from a VARCHAR field into the heap: total size plus the
/// handle of the first grain.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct VchTicket {
    size: U64,
    chunk: I64,
    block: I64,
}

const _: () = assert!(std::mem::size_of::<VchTicket>() == 24);

impl VchTicket {
    pub const EMPTY: VchTicket = VchTicket {
        size: U64::from_bytes([0u8; 8]),
        chunk: I64::from_bytes((-1i64).to_le_bytes()),
        block: I64::from_bytes((-1i64).to_le_bytes()),
    };

    fn new(size: u64, head: Chblix) -> Self {
        Self {
            size: U64::new(size),
            chunk: I64::new(head.chunk),
            block: I64::new(head.block),
        }
    }

    pub fn size(&self) -> u64 {
        self.size.get()
    }

    pub fn head(&self) -> Chblix {
        Chblix::new(self.chunk.get(), self.block.get())
    }

    pub fn is_empty(&self) -> bool {
        self.size.get() == 0
    }
}

fn grain_of(fm: &FileManager) -> Result<usize> {
    Ok(superblock::read(fm)?.heap_grain() as usize)
}

fn read_continuation(fm: &FileManager, at: Chblix, grain: usize) -> Result<Chblix> {
    let mut link = [0u8; 16];
    pool::read_block_at(fm, at, grain, &mut link)?;
    Ok(Chblix::new(
        i64::from_le_bytes(link[..8].try_into().unwrap()),
        i64::from_le_bytes(link[8..].try_into().unwrap()),
    ))
}

fn write_continuation(fm: &mut FileManager, at: Chblix, grain: usize, next: Chblix) -> Result<()> {
    let mut link = [0u8; 16];
    link[..8].copy_from_slice(&next.chunk.to_le_bytes());
    link[8..].copy_from_slice(&next.block.to_le_bytes());
    pool::write_block_at(fm, at, grain, &link)
}

/// Writes `bytes` into a fresh grain chain and returns its ticket.
pub fn put(fm: &mut FileManager, bytes: &[u8]) -> Result<VchTicket> {
    if bytes.is_empty() {
        return Ok(VchTicket::EMPTY);
    }

    let grain = grain_of(fm)?;
    let root = superblock::read(fm)?.varchar_heap_root();

    let mut head = Chblix::NONE;
    let mut prev = Chblix::NONE;
    for piece in bytes.chunks(grain) {
        let at = pool::alloc(fm, root)?;
        pool::write_block_at(fm, at, 0, piece)?;
        write_continuation(fm, at, grain, Chblix::NONE)?;
        if prev.is_none() {
            head = at;
        } else {
            write_continuation(fm, prev, grain, at)?;
        }
        prev = at;
    }

    Ok(VchTicket::new(bytes.len() as u64, head))
}

/// Reads a ticket's bytes back out of the chain.
pub fn get(fm: &FileManager, ticket: &VchTicket) -> Result<Vec<u8>> {
    if ticket.is_empty() {
        return Ok(Vec::new());
    }

    let grain = grain_of(fm)?;
    let mut remaining = ticket.size() as usize;
    let mut out = Vec::with_capacity(remaining);
    let mut at = ticket.head();

    while remaining > 0 {
        ensure!(
            !at.is_none(),
            err(
                ErrorKind::InvalidHandle,
                format!("varchar chain ends {} bytes short", remaining)
            )
        );
        let take = remaining.min(grain);
        let mut piece = vec![0u8; take];
        pool::read_block_at(fm, at, 0, &mut piece)?;
        out.extend_from_slice(&piece);
        remaining -= take;
        if remaining > 0 {
            at = read_continuation(fm, at, grain)?;
        }
    }

    Ok(out)
}

/// Frees every grain of a ticket's chain. The heap root in the superblock
/// is rewritten when a head chunk gets recycled underneath it.
pub fn del(fm: &mut FileManager, ticket: &VchTicket) -> Result<()> {
    if ticket.is_empty() {
        return Ok(());
    }

    let grain = grain_of(fm)?;
    let mut root = superblock::read(fm)?.varchar_heap_root();
    let old_root = root;

    let mut at = ticket.head();
    while !at.is_none() {
        let next = read_continuation(fm, at, grain)?;
        pool::free(fm, &mut root, at)?;
        at = next;
    }

    if root != old_root {
        superblock::update(fm, |sb| sb.set_varchar_heap_root(root))?;
    }
    Ok(())
}

/// Replaces a ticket's contents. The returned ticket supersedes the old
/// one, which must not be used again.
pub fn update(fm: &mut FileManager, ticket: &VchTicket, bytes: &[u8]) -> Result<VchTicket> {
    del(fm, ticket)?;
    put(fm, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Superblock;

    fn scratch(grain: u64) -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = FileManager::create(dir.path().join("heap.cdb")).unwrap();
        fm.write(0, 0, Superblock::new(grain).as_bytes()).unwrap();
        let root = pool::chunk_init(&mut fm, grain as i64 + 16).unwrap();
        superblock::update(&mut fm, |sb| sb.set_varchar_heap_root(root)).unwrap();
        (dir, fm)
    }

    #[test]
    fn short_string_roundtrip() {
        let (_dir, mut fm) = scratch(64);
        let t = put(&mut fm, b"hello").unwrap();

        assert_eq!(t.size(), 5);
        assert_eq!(get(&fm, &t).unwrap(), b"hello");
    }

    #[test]
    fn multi_grain_string_chains() {
        let (_dir, mut fm) = scratch(8);
        let text = b"The quick brown fox jumps over the lazy d";
        assert_eq!(text.len(), 41);

        let t = put(&mut fm, text).unwrap();
        assert_eq!(t.size(), 41);
        assert_eq!(get(&fm, &t).unwrap(), text);
    }

    #[test]
    fn exact_grain_multiple_roundtrip() {
        let (_dir, mut fm) = scratch(8);
        let t = put(&mut fm, b"0123456789abcdef").unwrap();
        assert_eq!(get(&fm, &t).unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn empty_string_is_the_empty_ticket() {
        let (_dir, mut fm) = scratch(8);
        let t = put(&mut fm, b"").unwrap();

        assert!(t.is_empty());
        assert!(t.head().is_none());
        assert_eq!(get(&fm, &t).unwrap(), Vec::<u8>::new());
        del(&mut fm, &t).unwrap();
    }

    #[test]
    fn update_shrinks_and_frees_old_grains() {
        let (_dir, mut fm) = scratch(8);
        let root = superblock::read(&fm).unwrap().varchar_heap_root();

        let t = put(&mut fm, b"The quick brown fox jumps over the lazy d").unwrap();
        let t = update(&mut fm, &t, b"yes").unwrap();

        assert_eq!(t.size(), 3);
        assert_eq!(get(&fm, &t).unwrap(), b"yes");

        // All old grains are back on the free list: one chunk, one live block.
        let hdr = pool::header(&fm, root).unwrap();
        assert_eq!(hdr.num_free_blocks(), hdr.capacity() - 1);
    }

    #[test]
    fn del_returns_grains_to_the_free_list() {
        let (_dir, mut fm) = scratch(8);
        let root = superblock::read(&fm).unwrap().varchar_heap_root();
        let before = pool::header(&fm, root).unwrap().num_free_blocks();

        let t = put(&mut fm, b"some medium sized text").unwrap();
        del(&mut fm, &t).unwrap();

        assert_eq!(pool::header(&fm, root).unwrap().num_free_blocks(), before);
    }

    #[test]
    fn ticket_layout_is_24_bytes() {
        let t = VchTicket::new(7, Chblix::new(3, 4));
        let bytes = t.as_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), 7);
        assert_eq!(i64::from_le_bytes(bytes[8..16].try_into().unwrap()), 3);
        assert_eq!(i64::from_le_bytes(bytes[16..].try_into().unwrap()), 4);
    }
}
