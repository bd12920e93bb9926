//! # Superblock
//!
//! Page 0 of every database file holds the superblock, the only metadata
//! at a fixed offset. Everything else in the file is reached from here.
//!
//! ## Layout (64 bytes, rest of the page zeroed)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------------
//! 0       8     magic: "chunkdb\0"
//! 8       4     version (u32 LE)
//! 12      4     page_size (u32 LE)
//! 16      8     metatable_root (i64 LE)
//! 24      8     varchar_heap_root (i64 LE)
//! 32      8     free_chunk_head (i64 LE, -1 = none)
//! 40      8     heap_grain (u64 LE)
//! 48      16    reserved zeros
//! ```
//!
//! `metatable_root` and `varchar_heap_root` are rewritten if those
//! collections ever recycle their head chunk; `free_chunk_head` anchors
//! the LIFO chain of recycled pages.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{err, ErrorKind};

use super::{parse_zerocopy, parse_zerocopy_mut, NONE_IDX, PAGE_SIZE};

pub const SUPERBLOCK_SIZE: usize = 64;

pub const MAGIC: &[u8; 8] = b"chunkdb\0";
pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Superblock {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    metatable_root: I64,
    varchar_heap_root: I64,
    free_chunk_head: I64,
    heap_grain: U64,
    reserved: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<Superblock>() == SUPERBLOCK_SIZE);

impl Superblock {
    /// A fresh superblock with no collections yet; the database bootstrap
    /// fills the roots in once the head chunks exist.
    pub fn new(heap_grain: u64) -> Self {
        Self {
            magic: *MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(PAGE_SIZE as u32),
            metatable_root: I64::new(NONE_IDX),
            varchar_heap_root: I64::new(NONE_IDX),
            free_chunk_head: I64::new(NONE_IDX),
            heap_grain: U64::new(heap_grain),
            reserved: [0u8; 16],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let sb: &Self = parse_zerocopy(bytes, "Superblock")?;
        sb.validate()?;
        Ok(sb)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        let sb: &mut Self = parse_zerocopy_mut(bytes, "Superblock")?;
        sb.validate()?;
        Ok(sb)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            &self.magic == MAGIC,
            err(ErrorKind::Io, "invalid magic bytes, not a chunkdb file")
        );
        ensure!(
            self.version.get() == CURRENT_VERSION,
            err(
                ErrorKind::Io,
                format!(
                    "unsupported file version {} (expected {})",
                    self.version.get(),
                    CURRENT_VERSION
                )
            )
        );
        ensure!(
            self.page_size.get() as usize == PAGE_SIZE,
            err(
                ErrorKind::Io,
                format!(
                    "file page size {} does not match build page size {}",
                    self.page_size.get(),
                    PAGE_SIZE
                )
            )
        );
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn metatable_root(&self) -> i64 {
        self.metatable_root.get()
    }

    pub fn set_metatable_root(&mut self, root: i64) {
        self.metatable_root = I64::new(root);
    }

    pub fn varchar_heap_root(&self) -> i64 {
        self.varchar_heap_root.get()
    }

    pub fn set_varchar_heap_root(&mut self, root: i64) {
        self.varchar_heap_root = I64::new(root);
    }

    pub fn free_chunk_head(&self) -> i64 {
        self.free_chunk_head.get()
    }

    pub fn set_free_chunk_head(&mut self, head: i64) {
        self.free_chunk_head = I64::new(head);
    }

    pub fn heap_grain(&self) -> u64 {
        self.heap_grain.get()
    }
}

/// Copies the superblock out of page 0.
pub(crate) fn read(fm: &super::FileManager) -> Result<Superblock> {
    Ok(*Superblock::from_bytes(fm.page(0)?)?)
}

/// Edits the superblock in place and schedules a flush of page 0.
pub(crate) fn update<F>(fm: &mut super::FileManager, f: F) -> Result<()>
where
    F: FnOnce(&mut Superblock),
{
    let sb = Superblock::from_bytes_mut(fm.page_mut(0)?)?;
    f(sb);
    fm.sync_page(0)
}
