//! # Linked-Block Allocator
//!
//! The engine's core abstraction: a *collection* is a chain of chunks with
//! identical block size, anchored at a head chunk whose page index is the
//! collection's root. Tables, schemas, the varchar heap, and the metatable
//! are all collections; everything they store lives in blocks handed out
//! here.
//!
//! ## Allocation
//!
//! `alloc` always works at the tail chunk: pop its free list, or carve a
//! new chunk and link it when the tail is full. Blocks freed in interior
//! chunks stay unused until their whole chunk drains. Allocation is not
//! perfectly packed, and that is accepted; it keeps scan order stable and
//! the allocator O(chain length).
//!
//! ## Recycling
//!
//! A chunk whose last live block is freed is unlinked from its collection
//! (unless it is the chain's only chunk; collections keep a head) and
//! pushed onto the engine-wide free-chunk chain rooted in the superblock.
//! `chunk_init` pops that chain before extending the file, so dropped
//! tables return their pages to the pool.
//!
//! ## Iteration Under Deletion
//!
//! [`BlockCursor`] yields live blocks in chunk order, block order. The one
//! supported mutation during iteration is deleting the block the cursor
//! just returned. If that delete drains the chunk (which unlinks it), the
//! caller repositions the cursor at the chunk's pre-delete successor;
//! [`free`] returns exactly that index. Any other mutation of the
//! collection mid-iteration is unsupported.

use eyre::{ensure, Result};
use smallvec::SmallVec;
use zerocopy::IntoBytes;

use crate::error::{err, ErrorKind};

use super::{
    parse_zerocopy_mut, superblock, Chblix, ChunkHeader, FileManager, CHUNK_HEADER_SIZE,
    MIN_BLOCK_SIZE, NONE_IDX,
};

/// Copies a chunk's header out of its page.
pub fn header(fm: &FileManager, chunk_idx: i64) -> Result<ChunkHeader> {
    ensure!(
        chunk_idx >= 1,
        err(
            ErrorKind::InvalidHandle,
            format!("page {} is not a chunk", chunk_idx)
        )
    );
    let page = fm.page(chunk_idx)?;
    let hdr: &ChunkHeader = super::parse_zerocopy(&page[..CHUNK_HEADER_SIZE], "ChunkHeader")?;
    Ok(*hdr)
}

fn write_header(fm: &mut FileManager, chunk_idx: i64, edit: impl FnOnce(&mut ChunkHeader)) -> Result<()> {
    let page = fm.page_mut(chunk_idx)?;
    let hdr: &mut ChunkHeader = parse_zerocopy_mut(&mut page[..CHUNK_HEADER_SIZE], "ChunkHeader")?;
    edit(hdr);
    fm.sync_page(chunk_idx)
}

/// Carves a new chunk of `block_size`-byte blocks, reusing a recycled page
/// when one is available, and threads its free list `[0, 1, …, cap-1, -1]`.
pub fn chunk_init(fm: &mut FileManager, block_size: i64) -> Result<i64> {
    let block_size = block_size.max(MIN_BLOCK_SIZE);
    let capacity = super::capacity_for(block_size);
    ensure!(
        capacity >= 1,
        err(
            ErrorKind::Alloc,
            format!("block size {} does not fit in a page", block_size)
        )
    );

    let idx = match pop_free_chunk(fm)? {
        Some(idx) => idx,
        None => fm.new_page()?,
    };

    let hdr = ChunkHeader::new(idx, block_size);
    {
        let page = fm.page_mut(idx)?;
        page[..CHUNK_HEADER_SIZE].copy_from_slice(hdr.as_bytes());
        for block in 0..capacity {
            let next = if block + 1 < capacity { block + 1 } else { NONE_IDX };
            let off = CHUNK_HEADER_SIZE + (block * block_size) as usize;
            page[off..off + 8].copy_from_slice(&next.to_le_bytes());
        }
    }
    fm.sync_page(idx)?;
    Ok(idx)
}

/// Pushes a chunk's page onto the superblock free-chunk chain.
pub fn chunk_destroy(fm: &mut FileManager, chunk_idx: i64) -> Result<()> {
    let old_head = superblock::read(fm)?.free_chunk_head();
    write_header(fm, chunk_idx, |h| h.set_next_chunk(old_head))?;
    superblock::update(fm, |sb| sb.set_free_chunk_head(chunk_idx))
}

fn pop_free_chunk(fm: &mut FileManager) -> Result<Option<i64>> {
    let head = superblock::read(fm)?.free_chunk_head();
    if head == NONE_IDX {
        return Ok(None);
    }
    let next = header(fm, head)?.next_chunk();
    superblock::update(fm, |sb| sb.set_free_chunk_head(next))?;
    Ok(Some(head))
}

/// Links `new` as the tail of the chain rooted at `head`.
pub fn chunk_append(fm: &mut FileManager, head: i64, new: i64) -> Result<()> {
    let tail = tail_of(fm, head)?;
    write_header(fm, tail, |h| h.set_next_chunk(new))
}

fn tail_of(fm: &FileManager, head: i64) -> Result<i64> {
    let mut idx = head;
    loop {
        let next = header(fm, idx)?.next_chunk();
        if next == NONE_IDX {
            return Ok(idx);
        }
        idx = next;
    }
}

/// Allocates one block from the collection rooted at `head`, growing the
/// chain when the tail chunk is full.
pub fn alloc(fm: &mut FileManager, head: i64) -> Result<Chblix> {
    let tail = tail_of(fm, head)?;
    let hdr = header(fm, tail)?;

    let target = if hdr.is_full() {
        let new = chunk_init(fm, hdr.block_size())?;
        write_header(fm, tail, |h| h.set_next_chunk(new))?;
        new
    } else {
        tail
    };

    pop_block(fm, target)
}

fn pop_block(fm: &mut FileManager, chunk_idx: i64) -> Result<Chblix> {
    let page = fm.page_mut(chunk_idx)?;
    let (hdr_bytes, payload) = page.split_at_mut(CHUNK_HEADER_SIZE);
    let hdr: &mut ChunkHeader = parse_zerocopy_mut(hdr_bytes, "ChunkHeader")?;

    let block = hdr.first_free_block();
    ensure!(
        block != NONE_IDX,
        err(
            ErrorKind::Alloc,
            format!("chunk {} free list empty with free count {}", chunk_idx, hdr.num_free_blocks())
        )
    );

    let off = (block * hdr.block_size()) as usize;
    let next = i64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
    hdr.set_first_free_block(next);
    hdr.set_num_free_blocks(hdr.num_free_blocks() - 1);

    fm.sync_page(chunk_idx)?;
    Ok(Chblix::new(chunk_idx, block))
}

/// Frees one block. The handle is validated against the chain rooted at
/// `*root` before anything is touched. If the free drains the chunk and
/// the chain has other chunks, the chunk is unlinked (rewriting `*root`
/// when the head itself drains) and recycled; the unlinked chunk's
/// pre-delete successor is returned so iterators can reposition.
pub fn free(fm: &mut FileManager, root: &mut i64, at: Chblix) -> Result<Option<i64>> {
    // Locate the chunk in the chain, remembering its predecessor.
    let mut pred = NONE_IDX;
    let mut idx = *root;
    while idx != NONE_IDX && idx != at.chunk {
        pred = idx;
        idx = header(fm, idx)?.next_chunk();
    }
    ensure!(
        idx == at.chunk,
        err(
            ErrorKind::InvalidHandle,
            format!("chunk {} is not part of this collection", at.chunk)
        )
    );

    let hdr = header(fm, at.chunk)?;
    ensure!(
        at.block >= 0 && at.block < hdr.capacity(),
        err(
            ErrorKind::InvalidHandle,
            format!("block {} out of range for chunk {}", at.block, at.chunk)
        )
    );
    ensure!(
        !block_is_free(fm, &hdr, at)?,
        err(
            ErrorKind::InvalidHandle,
            format!("block ({}, {}) is already free", at.chunk, at.block)
        )
    );

    // Push onto the chunk's free list.
    {
        let page = fm.page_mut(at.chunk)?;
        let (hdr_bytes, payload) = page.split_at_mut(CHUNK_HEADER_SIZE);
        let hdr: &mut ChunkHeader = parse_zerocopy_mut(hdr_bytes, "ChunkHeader")?;
        let off = (at.block * hdr.block_size()) as usize;
        payload[off..off + 8].copy_from_slice(&hdr.first_free_block().to_le_bytes());
        hdr.set_first_free_block(at.block);
        hdr.set_num_free_blocks(hdr.num_free_blocks() + 1);
    }
    fm.sync_page(at.chunk)?;

    let hdr = header(fm, at.chunk)?;
    let next = hdr.next_chunk();
    if !hdr.is_drained() || (at.chunk == *root && next == NONE_IDX) {
        return Ok(None);
    }

    // Drained and not the only chunk: unlink and recycle.
    if at.chunk == *root {
        *root = next;
    } else {
        write_header(fm, pred, |h| h.set_next_chunk(next))?;
    }
    chunk_destroy(fm, at.chunk)?;
    Ok(Some(next))
}

fn block_is_free(fm: &FileManager, hdr: &ChunkHeader, at: Chblix) -> Result<bool> {
    let mut cur = hdr.first_free_block();
    let mut steps = 0;
    while cur != NONE_IDX {
        if cur == at.block {
            return Ok(true);
        }
        ensure!(
            steps < hdr.capacity() && cur >= 0 && cur < hdr.capacity(),
            err(
                ErrorKind::Io,
                format!("corrupt free list in chunk {}", at.chunk)
            )
        );
        let mut link = [0u8; 8];
        fm.read(at.chunk, hdr.block_offset(cur), &mut link)?;
        cur = i64::from_le_bytes(link);
        steps += 1;
    }
    Ok(false)
}

/// True when the handle names an in-range block that is not on its
/// chunk's free list. Chain membership is not checked here; [`free`]
/// performs the full validation.
pub fn is_live(fm: &FileManager, at: Chblix) -> Result<bool> {
    if at.is_none() || at.chunk < 1 || at.chunk >= fm.page_count() {
        return Ok(false);
    }
    let hdr = header(fm, at.chunk)?;
    if at.block < 0 || at.block >= hdr.capacity() {
        return Ok(false);
    }
    Ok(!block_is_free(fm, &hdr, at)?)
}

/// True when the handle names a live block of the chain rooted at `head`.
pub fn is_member(fm: &FileManager, head: i64, at: Chblix) -> Result<bool> {
    let mut idx = head;
    while idx != NONE_IDX {
        if idx == at.chunk {
            return is_live(fm, at);
        }
        idx = header(fm, idx)?.next_chunk();
    }
    Ok(false)
}

/// Copies a whole block into `dst` (`dst.len() <= block_size`).
pub fn read_block(fm: &FileManager, at: Chblix, dst: &mut [u8]) -> Result<()> {
    read_block_at(fm, at, 0, dst)
}

/// Copies from a byte range within a block.
pub fn read_block_at(fm: &FileManager, at: Chblix, offset: usize, dst: &mut [u8]) -> Result<()> {
    let hdr = header(fm, at.chunk)?;
    check_range(&hdr, at, offset, dst.len())?;
    fm.read(at.chunk, hdr.block_offset(at.block) + offset, dst)
}

/// Overwrites a whole block from `src` (`src.len() <= block_size`).
pub fn write_block(fm: &mut FileManager, at: Chblix, src: &[u8]) -> Result<()> {
    write_block_at(fm, at, 0, src)
}

/// Overwrites a byte range within a block.
pub fn write_block_at(fm: &mut FileManager, at: Chblix, offset: usize, src: &[u8]) -> Result<()> {
    let hdr = header(fm, at.chunk)?;
    check_range(&hdr, at, offset, src.len())?;
    fm.write(at.chunk, hdr.block_offset(at.block) + offset, src)
}

fn check_range(hdr: &ChunkHeader, at: Chblix, offset: usize, len: usize) -> Result<()> {
    ensure!(
        at.block >= 0 && at.block < hdr.capacity(),
        err(
            ErrorKind::InvalidHandle,
            format!("block {} out of range for chunk {}", at.block, at.chunk)
        )
    );
    ensure!(
        offset + len <= hdr.block_size() as usize,
        err(
            ErrorKind::InvalidHandle,
            format!(
                "access of {} bytes at offset {} exceeds block size {}",
                len,
                offset,
                hdr.block_size()
            )
        )
    );
    Ok(())
}

/// Returns every chunk of a collection to the free-chunk pool.
pub fn destroy_chain(fm: &mut FileManager, head: i64) -> Result<()> {
    let mut chunks = Vec::new();
    let mut idx = head;
    while idx != NONE_IDX {
        chunks.push(idx);
        idx = header(fm, idx)?.next_chunk();
    }
    for idx in chunks {
        chunk_destroy(fm, idx)?;
    }
    Ok(())
}

/// Iterator over the live blocks of a collection, in chunk order then
/// block order. Holds no borrow of the file, so callers may read, write,
/// and allocate between `next` calls; the only supported mutation of the
/// iterated collection itself is deleting the block just yielded (see the
/// module docs for the reposition protocol).
#[derive(Debug)]
pub struct BlockCursor {
    chunk: i64,
    block: i64,
    free_mask: SmallVec<[u64; 8]>,
    mask_valid: bool,
}

impl BlockCursor {
    pub fn new(head: i64) -> Self {
        Self {
            chunk: head,
            block: 0,
            free_mask: SmallVec::new(),
            mask_valid: false,
        }
    }

    /// Advances to the next live block, crossing chunk boundaries.
    pub fn next(&mut self, fm: &FileManager) -> Result<Option<Chblix>> {
        loop {
            if self.chunk == NONE_IDX {
                return Ok(None);
            }
            let hdr = header(fm, self.chunk)?;
            if !self.mask_valid {
                self.build_mask(fm, &hdr)?;
            }
            while self.block < hdr.capacity() {
                let block = self.block;
                self.block += 1;
                if !self.is_marked_free(block) {
                    return Ok(Some(Chblix::new(self.chunk, block)));
                }
            }
            self.chunk = hdr.next_chunk();
            self.block = 0;
            self.mask_valid = false;
        }
    }

    /// Restarts iteration at the head of `chunk`: the pre-delete
    /// successor returned by [`free`] when the current chunk was
    /// unlinked underneath the cursor.
    pub fn reposition(&mut self, chunk: i64) {
        self.chunk = chunk;
        self.block = 0;
        self.mask_valid = false;
    }

    fn build_mask(&mut self, fm: &FileManager, hdr: &ChunkHeader) -> Result<()> {
        if hdr.next_chunk() != NONE_IDX {
            fm.prefetch_pages(hdr.next_chunk(), 1);
        }

        let words = (hdr.capacity() as usize).div_ceil(64);
        self.free_mask.clear();
        self.free_mask.resize(words, 0);

        let mut cur = hdr.first_free_block();
        let mut steps = 0;
        while cur != NONE_IDX {
            ensure!(
                steps < hdr.capacity() && cur >= 0 && cur < hdr.capacity(),
                err(
                    ErrorKind::Io,
                    format!("corrupt free list in chunk {}", self.chunk)
                )
            );
            self.free_mask[(cur / 64) as usize] |= 1u64 << (cur % 64);
            let mut link = [0u8; 8];
            fm.read(self.chunk, hdr.block_offset(cur), &mut link)?;
            cur = i64::from_le_bytes(link);
            steps += 1;
        }
        ensure!(
            steps == hdr.num_free_blocks(),
            err(
                ErrorKind::Io,
                format!(
                    "chunk {} free list has {} entries but header says {}",
                    self.chunk,
                    steps,
                    hdr.num_free_blocks()
                )
            )
        );

        self.mask_valid = true;
        Ok(())
    }

    fn is_marked_free(&self, block: i64) -> bool {
        self.free_mask[(block / 64) as usize] & (1u64 << (block % 64)) != 0
    }
}
