//! The free index.
//!
//! Free blocks are kept in a set of intrusive, doubly linked lists, one per size class. The links
//! live in the free block's own payload (right after its header), so the index costs nothing but
//! the list heads. A block is in exactly one list, chosen by its current size, which is why a
//! block must always be removed _before_ its size is changed.
//!
//! Links are region offsets. Offset zero is inside the alignment padding before the prologue, so
//! no block can live there, and it doubles as the null link.

use crate::block::{Block, HEADER, WORD};
use crate::region::Region;

/// The number of size classes.
pub const CLASSES: usize = 11;

/// The upper (inclusive) bound of every size class but the last, which is unbounded.
const LIMITS: [usize; CLASSES - 1] = [32, 48, 64, 96, 128, 256, 512, 1024, 2048, 4096];

/// The null link.
const NIL: usize = 0;

/// The size class of a block of `size` bytes.
#[inline]
pub fn size_class(size: usize) -> usize {
    LIMITS.iter().position(|&limit| size <= limit).unwrap_or(CLASSES - 1)
}

/// A view of a block known to be free.
///
/// This exposes the links, which are only meaningful while the block is free. Never keep one of
/// these across an operation which may allocate or merge the block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock(Block);

impl FreeBlock {
    /// View `block` as a free block.
    #[inline]
    pub fn new(block: Block, region: &Region) -> FreeBlock {
        debug_assert!(!block.is_allocated(region), "{:?} is not free.", block);

        FreeBlock(block)
    }

    /// The previous block in the class list.
    #[inline]
    pub fn prev(self, region: &Region) -> Option<Block> {
        link(region.read(self.0.offset() + HEADER))
    }

    /// The next block in the class list.
    #[inline]
    pub fn next(self, region: &Region) -> Option<Block> {
        link(region.read(self.0.offset() + HEADER + WORD))
    }

    /// Set the previous link.
    #[inline]
    fn set_prev(self, region: &mut Region, prev: Option<Block>) {
        region.write(self.0.offset() + HEADER, prev.map_or(NIL, Block::offset));
    }

    /// Set the next link.
    #[inline]
    fn set_next(self, region: &mut Region, next: Option<Block>) {
        region.write(self.0.offset() + HEADER + WORD, next.map_or(NIL, Block::offset));
    }
}

/// Decode a raw link.
#[inline]
fn link(word: usize) -> Option<Block> {
    if word == NIL { None } else { Some(Block::at(word)) }
}

/// The segregated free lists.
pub struct FreeIndex {
    /// The head of every class list.
    heads: [Option<Block>; CLASSES],
}

impl FreeIndex {
    /// Create an empty index.
    pub const fn new() -> FreeIndex {
        FreeIndex {
            heads: [None; CLASSES],
        }
    }

    /// The first block of the list of class `class`.
    #[inline]
    pub fn head(&self, class: usize) -> Option<Block> {
        self.heads[class]
    }

    /// Push a free block to the front of the list matching its current size.
    pub fn insert(&mut self, region: &mut Region, block: Block) {
        let class = size_class(block.size(region));
        let free = FreeBlock::new(block, region);

        log!(INTERNAL, "Indexing {:?} (size {}) in class {}.", block, block.size(region), class);

        let head = self.heads[class];
        free.set_prev(region, None);
        free.set_next(region, head);

        if let Some(head) = head {
            FreeBlock::new(head, region).set_prev(region, Some(block));
        }

        self.heads[class] = Some(block);
    }

    /// Unlink a free block.
    ///
    /// The block must be in the index, under its current size.
    pub fn remove(&mut self, region: &mut Region, block: Block) {
        let class = size_class(block.size(region));
        let free = FreeBlock::new(block, region);

        log!(INTERNAL, "Unindexing {:?} from class {}.", block, class);

        let prev = free.prev(region);
        let next = free.next(region);

        match prev {
            Some(prev) => FreeBlock::new(prev, region).set_next(region, next),
            None => {
                debug_assert!(self.heads[class] == Some(block), "{:?} is not in class {}.", block,
                              class);
                self.heads[class] = next;
            },
        }

        if let Some(next) = next {
            FreeBlock::new(next, region).set_prev(region, prev);
        }
    }

    /// Find a free block of at least `size` bytes.
    ///
    /// The search starts at the class `size` belongs to, and returns the smallest sufficient block
    /// of the first class holding any (an exact match ends the search early). Larger classes are
    /// only searched when the smaller ones come up empty.
    pub fn find_fit(&self, region: &Region, size: usize) -> Option<Block> {
        for class in size_class(size)..CLASSES {
            let mut best: Option<(Block, usize)> = None;

            for block in self.iter(region, class) {
                let block_size = block.size(region);

                if block_size == size {
                    return Some(block);
                }

                if block_size > size && best.map_or(true, |(_, best_size)| block_size < best_size) {
                    best = Some((block, block_size));
                }
            }

            if let Some((block, _)) = best {
                return Some(block);
            }
        }

        None
    }

    /// Iterate over the list of class `class`.
    #[inline]
    pub fn iter<'a>(&self, region: &'a Region, class: usize) -> Iter<'a> {
        Iter {
            region,
            cur: self.heads[class],
        }
    }
}

/// An iterator over one class list.
pub struct Iter<'a> {
    /// The region the list lives in.
    region: &'a Region,
    /// The next block to yield.
    cur: Option<Block>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let cur = self.cur?;
        self.cur = FreeBlock::new(cur, self.region).next(self.region);

        Some(cur)
    }
}
