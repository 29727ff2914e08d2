//! Memory blocks.
//!
//! Blocks are the main unit for the memory bookkeeping. A block is a span of the region starting
//! with a boundary tag (the header), which packs the block's size together with two flags: whether
//! the block is allocated, and whether its predecessor in address order is. Free blocks mirror the
//! header in their last word (the footer), so the block after them can find their start.
//!
//! ```notrust
//!    allocated                     free
//!   +--------+-----------------+  +--------+------+------+-----------+--------+
//!   | header | payload ...     |  | header | prev | next | ...       | footer |
//!   +--------+-----------------+  +--------+------+------+-----------+--------+
//!            ^ 16-aligned
//! ```
//!
//! The sentinels are ordinary allocated blocks: the prologue has a fixed size, while the epilogue
//! has size zero and therefore no footer and no successor.

use core::{cmp, fmt, mem};

use crate::region::Region;
use shim::config;

/// The alignment unit.
pub const ALIGN: usize = config::ALIGNMENT;
/// The size of a machine word, which is also the size of a boundary tag.
pub const WORD: usize = mem::size_of::<usize>();
/// The size of a block header.
pub const HEADER: usize = WORD;
/// The smallest block, large enough to hold the free block metadata (header, links, footer).
pub const MIN_BLOCK_SIZE: usize = align(2 * HEADER + 2 * WORD);
/// The size of the prologue sentinel.
pub const PROLOGUE_SIZE: usize = ALIGN;

/// Round `size` up to the alignment unit.
#[inline]
pub const fn align(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

/// The block size needed to serve a request of `size` bytes.
///
/// Returns `None` on arithmetic overflow.
#[inline]
pub fn request_size(size: usize) -> Option<usize> {
    let size = size.checked_add(HEADER + ALIGN - 1)? & !(ALIGN - 1);

    Some(cmp::max(size, MIN_BLOCK_SIZE))
}

/// A boundary tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
    /// The allocated bit.
    const ALLOCATED: usize = 0b01;
    /// The predecessor allocated bit.
    const PREV_ALLOCATED: usize = 0b10;
    /// All the bits which are not size.
    const FLAGS: usize = ALIGN - 1;

    /// Pack a tag.
    #[inline]
    pub fn new(size: usize, allocated: bool, prev_allocated: bool) -> Tag {
        debug_assert!(size % ALIGN == 0, "Unaligned block size {}.", size);

        Tag(size)
            .with_allocated(allocated)
            .with_prev_allocated(prev_allocated)
    }

    /// The raw word.
    #[inline]
    pub fn word(self) -> usize {
        self.0
    }

    /// The size of the block, including its header (and footer).
    #[inline]
    pub fn size(self) -> usize {
        self.0 & !Tag::FLAGS
    }

    /// Is the block allocated?
    #[inline]
    pub fn is_allocated(self) -> bool {
        self.0 & Tag::ALLOCATED != 0
    }

    /// Is the block's predecessor allocated?
    #[inline]
    pub fn is_prev_allocated(self) -> bool {
        self.0 & Tag::PREV_ALLOCATED != 0
    }

    /// The same tag, with another size.
    #[inline]
    pub fn with_size(self, size: usize) -> Tag {
        debug_assert!(size % ALIGN == 0, "Unaligned block size {}.", size);

        Tag(size | (self.0 & Tag::FLAGS))
    }

    /// The same tag, with another allocation state.
    #[inline]
    pub fn with_allocated(self, allocated: bool) -> Tag {
        if allocated {
            Tag(self.0 | Tag::ALLOCATED)
        } else {
            Tag(self.0 & !Tag::ALLOCATED)
        }
    }

    /// The same tag, with another predecessor allocation state.
    #[inline]
    pub fn with_prev_allocated(self, prev_allocated: bool) -> Tag {
        if prev_allocated {
            Tag(self.0 | Tag::PREV_ALLOCATED)
        } else {
            Tag(self.0 & !Tag::PREV_ALLOCATED)
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}{}{}", self.size(), if self.is_allocated() { "a" } else { "f" },
               if self.is_prev_allocated() { "A" } else { "F" })
    }
}

/// A block, identified by the offset of its header in the region.
///
/// This is a plain handle. It does not borrow the region, so it stays meaningful only as long as
/// no split or merge moves the block boundaries around it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block(usize);

impl Block {
    /// The block whose header is at `offset`.
    #[inline]
    pub fn at(offset: usize) -> Block {
        Block(offset)
    }

    /// The block whose payload starts at `offset`.
    #[inline]
    pub fn from_payload(offset: usize) -> Block {
        debug_assert!(offset >= HEADER, "Payload offset {} precedes any header.", offset);

        Block(offset - HEADER)
    }

    /// The offset of the header.
    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }

    /// The offset of the payload.
    #[inline]
    pub fn payload(self) -> usize {
        self.0 + HEADER
    }

    /// Read the header.
    #[inline]
    pub fn tag(self, region: &Region) -> Tag {
        Tag(region.read(self.0))
    }

    /// Read the footer.
    ///
    /// Only free blocks have a meaningful footer, and sentinels of size zero have none at all.
    #[inline]
    pub fn footer(self, region: &Region) -> Tag {
        let size = self.size(region);
        debug_assert!(size != 0, "Reading the footer of a sentinel at {}.", self.0);

        Tag(region.read(self.0 + size - HEADER))
    }

    /// The size of the block.
    #[inline]
    pub fn size(self, region: &Region) -> usize {
        self.tag(region).size()
    }

    /// Is this block allocated?
    #[inline]
    pub fn is_allocated(self, region: &Region) -> bool {
        self.tag(region).is_allocated()
    }

    /// The number of bytes the client may use.
    #[inline]
    pub fn usable_size(self, region: &Region) -> usize {
        self.size(region) - HEADER
    }

    /// The block directly after this one.
    #[inline]
    pub fn next(self, region: &Region) -> Block {
        let size = self.size(region);
        debug_assert!(size != 0, "The epilogue at {} has no successor.", self.0);

        Block(self.0 + size)
    }

    /// The block directly before this one, if that block is free.
    ///
    /// Allocated blocks keep no footer, so an allocated predecessor cannot be located (and is
    /// never needed).
    #[inline]
    pub fn prev_free(self, region: &Region) -> Option<Block> {
        if self.tag(region).is_prev_allocated() {
            return None;
        }

        // The predecessor is free, hence the word before our header is its footer.
        let footer = Tag(region.read(self.0 - HEADER));
        debug_assert!(!footer.is_allocated() && footer.size() != 0, "Corrupt footer {:?} before \
                      {}.", footer, self.0);

        Some(Block(self.0 - footer.size()))
    }

    /// Write a fresh tag, and the footer if the block is free.
    #[inline]
    pub fn init(self, region: &mut Region, tag: Tag) {
        region.write(self.0, tag.word());
        self.write_footer(region, tag);
    }

    /// Change the size, keeping the flags.
    ///
    /// If the block is free, the footer is written at the new end.
    #[inline]
    pub fn set_size(self, region: &mut Region, size: usize) {
        let tag = self.tag(region).with_size(size);

        region.write(self.0, tag.word());
        self.write_footer(region, tag);
    }

    /// Change the allocation state.
    ///
    /// The footer is rewritten when the block becomes free, and the successor's predecessor flag
    /// is updated.
    #[inline]
    pub fn set_allocated(self, region: &mut Region, allocated: bool) {
        let tag = self.tag(region).with_allocated(allocated);

        region.write(self.0, tag.word());
        self.write_footer(region, tag);

        if tag.size() != 0 {
            self.next(region).set_prev_allocated(region, allocated);
        }
    }

    /// Change the predecessor allocation state.
    #[inline]
    pub fn set_prev_allocated(self, region: &mut Region, prev_allocated: bool) {
        let tag = self.tag(region).with_prev_allocated(prev_allocated);

        region.write(self.0, tag.word());
        self.write_footer(region, tag);
    }

    /// Mirror the header into the footer, if the block is free.
    #[inline]
    fn write_footer(self, region: &mut Region, tag: Tag) {
        // Sentinels have no footer. Writing one would land outside the block.
        if !tag.is_allocated() && tag.size() != 0 {
            region.write(self.0 + tag.size() - HEADER, tag.word());
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@0x{:x}", self.0)
    }
}
