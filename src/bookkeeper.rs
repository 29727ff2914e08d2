//! Memory bookkeeping.
//!
//! The heap ties the pieces together: it owns the region and its growth source, keeps the free
//! index, and implements allocation, release and resizing on top of them.
//!
//! ```notrust
//!    Region
//!   +-----+----------+-------------------------------------------------+----------+
//!   | pad | prologue | blocks ...                                      | epilogue |
//!   +-----+----------+-------------------------------------------------+----------+
//!   0     PAD        FIRST                                    len - HEADER       len
//! ```

use core::{cmp, fmt, ptr};

use crate::block::{self, Block, Tag, ALIGN, HEADER, MIN_BLOCK_SIZE, PROLOGUE_SIZE};
use crate::brk::Break;
use crate::fail;
use crate::free_list::{self, FreeBlock, FreeIndex, CLASSES};
use crate::region::Region;
use shim::config;

/// The padding before the prologue, which puts every payload on the alignment unit.
const PAD: usize = ALIGN - HEADER;
/// The offset of the first block following the prologue.
const FIRST: usize = PAD + PROLOGUE_SIZE;

/// The memory bookkeeper.
///
/// This is the main component of tagalloc. It manages a single contiguous region, obtained from
/// (and grown through) `B`, which is always a gapless sequence of blocks bounded by the two
/// sentinels. Every free block is in the free index, under the class of its current size, and no
/// two free blocks are ever adjacent.
///
/// Only making use of the public methods (and following their respective assumptions) guarantees
/// that these invariants hold. [`check`](#method.check) verifies them.
pub struct Heap<B: Break> {
    /// The growth source.
    brk: B,
    /// The managed memory.
    region: Region,
    /// The free blocks.
    free: FreeIndex,
    /// The minimum number of bytes to grow by.
    growth: usize,
    /// The number of successful growths.
    grows: usize,
}

// The region is owned by the heap, and only ever accessed through it.
unsafe impl<B: Break + Send> Send for Heap<B> {}

impl<B: Break> Heap<B> {
    /// Set up a heap with the default growth increment.
    #[inline]
    pub fn new(brk: B) -> Result<Heap<B>, ()> {
        Heap::with_growth(brk, config::GROWTH_INCREMENT)
    }

    /// Set up a heap which grows by at least `increment` bytes at a time.
    ///
    /// The region starts out as the prologue, one free block of `increment` bytes and the
    /// epilogue. This fails if the growth source cannot provide that much.
    pub fn with_growth(mut brk: B, increment: usize) -> Result<Heap<B>, ()> {
        let growth = config::extend_size(increment, config::MIN_GROWTH).ok_or(())?;
        let len = (FIRST + HEADER).checked_add(growth).ok_or(())?;

        log!(NOTE, "Initializing a heap of {} bytes (growing by {}).", len, growth);

        let start = brk.sbrk(len)?;
        let misalign = start.as_ptr() as usize % ALIGN;

        let base = if misalign == 0 {
            start
        } else {
            // Slide the region up to the next aligned address, and make up for the lost bytes.
            let skew = ALIGN - misalign;
            let extra = brk.sbrk(skew)?;

            if extra.as_ptr() as usize != start.as_ptr() as usize + len {
                log!(WARNING, "The growth source is not contiguous.");

                return Err(());
            }

            log!(DEBUG, "Skipping {} bytes to align the region.", skew);

            unsafe {
                // The segment holds `len + skew` bytes.
                ptr::NonNull::new_unchecked(start.as_ptr().add(skew))
            }
        };

        let mut region = unsafe {
            // Freshly obtained from the growth source.
            Region::from_raw_parts(base, len)
        };

        // The prologue keeps a footer, so it looks like any other block from both sides.
        let prologue = Tag::new(PROLOGUE_SIZE, true, true);
        Block::at(PAD).init(&mut region, prologue);
        region.write(FIRST - HEADER, prologue.word());

        let first = Block::at(FIRST);
        first.init(&mut region, Tag::new(growth, false, true));
        first.next(&region).init(&mut region, Tag::new(0, true, false));

        let mut free = FreeIndex::new();
        free.insert(&mut region, first);

        Ok(Heap {
            brk,
            region,
            free,
            growth,
            grows: 0,
        })
    }

    /// Allocate a chunk of memory.
    ///
    /// The returned pointer is aligned to the alignment unit and valid for `size` bytes, or null
    /// if `size` is zero or no memory could be obtained.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        self.alloc_aligned(size, ALIGN)
    }

    /// Allocate a chunk of memory aligned to `align`.
    ///
    /// `align` must be a power of two; alignments up to the alignment unit are served exactly
    /// like `alloc`. Larger ones are found by carving a free block off the front of a block
    /// with enough slack:
    ///
    /// ```notrust
    ///    |<-- gap (free, >= MIN_BLOCK_SIZE) -->|<-- needed -->|<-- rest (free) -->|
    ///    ^ found block                         ^ header       ^ split off by trim
    ///                                                 ^ payload on `align`
    /// ```
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> *mut u8 {
        if !align.is_power_of_two() {
            log!(DEBUG, "Rejecting the alignment {}.", align);

            return ptr::null_mut();
        }

        match self.alloc_block(size, align) {
            Some(block) => self.region.ptr_at(block.payload()),
            None => ptr::null_mut(),
        }
    }

    /// Allocate a zeroed chunk of `count * size` bytes.
    ///
    /// Returns null if either is zero, or the product overflows.
    pub fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(total) => total,
            None => {
                log!(DEBUG, "Rejecting an array of {} elements of {} bytes.", count, size);

                return ptr::null_mut();
            },
        };

        match self.alloc_block(total, ALIGN) {
            Some(block) => {
                self.region.fill(block.payload(), total, 0);

                self.region.ptr_at(block.payload())
            },
            None => ptr::null_mut(),
        }
    }

    /// Free a chunk of memory.
    ///
    /// The block is merged with whatever free neighbors it has. Freeing null does nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap, and must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let block = self.block_of(ptr);

        log!(INTERNAL, "Freeing {:?} (size {}).", block, block.size(&self.region));

        #[cfg(feature = "security")]
        self.region.fill(block.payload(), block.usable_size(&self.region), 0);

        block.set_allocated(&mut self.region, false);
        let block = self.coalesce(block);
        self.free.insert(&mut self.region, block);
    }

    /// Reallocate memory.
    ///
    /// Resizes the allocation at `ptr` to `size` bytes, preserving the contents up to the smaller
    /// of the two sizes. The block is resized in place when possible (shrinking, or growing into a
    /// free successor); otherwise the contents move to a new allocation.
    ///
    /// Null `ptr` makes this an allocation, zero `size` a free (returning null). If the memory
    /// cannot be obtained, null is returned and the old allocation is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap. If a different pointer is returned,
    /// `ptr` must not be used afterwards.
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        self.realloc_aligned(ptr, size, ALIGN)
    }

    /// Reallocate memory aligned to `align`.
    ///
    /// This is `realloc` for allocations made by `alloc_aligned`. Resizing in place keeps the
    /// address, so only a move needs to look for an aligned block.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap, aligned to `align`. If a different
    /// pointer is returned, `ptr` must not be used afterwards.
    pub unsafe fn realloc_aligned(&mut self, ptr: *mut u8, size: usize, align: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc_aligned(size, align);
        }
        if !align.is_power_of_two() {
            return ptr::null_mut();
        }

        if size == 0 {
            self.free(ptr);

            return ptr::null_mut();
        }

        let block = self.block_of(ptr);
        let needed = match block::request_size(size) {
            Some(needed) => needed,
            None => return ptr::null_mut(),
        };
        let current = block.size(&self.region);

        log!(INTERNAL, "Reallocating {:?} (size {}) to {} bytes.", block, current, size);

        if needed <= current {
            self.trim(block, needed);

            return ptr;
        }

        if self.absorb_next(block, needed) {
            self.trim(block, needed);

            return ptr;
        }

        let new = match self.alloc_block(size, align) {
            Some(new) => new,
            None => return ptr::null_mut(),
        };

        let copy = cmp::min(block.usable_size(&self.region), size);
        self.region.copy(block.payload(), new.payload(), copy);
        self.free(ptr);

        self.region.ptr_at(new.payload())
    }

    /// The number of bytes usable through a live allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        self.block_of(ptr).usable_size(&self.region)
    }

    /// Does `ptr` point into the managed region?
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.region.offset_of(ptr).is_some()
    }

    /// The growth source.
    #[inline]
    pub fn brk(&self) -> &B {
        &self.brk
    }

    /// Iterate over the blocks between the sentinels, in address order.
    #[inline]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            region: &self.region,
            cur: Block::at(FIRST),
            end: self.epilogue(),
        }
    }

    /// Summarize the heap.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            region_size: self.region.len(),
            grows: self.grows,
            ..Stats::default()
        };

        for block in self.blocks() {
            if block.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += block.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            }
        }

        stats
    }

    /// Verify the heap invariants.
    ///
    /// This walks every block and every free list, and reports the first inconsistency found. It
    /// does not modify anything, and never panics, even on a corrupted heap (as long as the
    /// sentinels are in bound).
    pub fn check(&self) -> Result<(), Corruption> {
        let region = &self.region;
        let epilogue = self.epilogue();

        let prologue = Block::at(PAD).tag(region);
        if prologue != Tag::new(PROLOGUE_SIZE, true, prologue.is_prev_allocated())
            || region.read(FIRST - HEADER) != prologue.word() {
            return Err(Corruption::Prologue);
        }

        // Walk the blocks in address order.
        let mut free_blocks = 0;
        let mut prev_allocated = true;
        let mut block = Block::at(FIRST);

        while block < epilogue {
            let offset = block.offset();
            let tag = block.tag(region);
            let size = tag.size();

            if block.payload() % ALIGN != 0 {
                return Err(Corruption::Misaligned { offset });
            }
            if size < MIN_BLOCK_SIZE || offset + size > epilogue.offset() {
                return Err(Corruption::Size { offset, size });
            }
            if tag.is_prev_allocated() != prev_allocated {
                return Err(Corruption::PrevFlag { offset });
            }

            if !tag.is_allocated() {
                if block.footer(region) != tag {
                    return Err(Corruption::Footer { offset });
                }
                if !prev_allocated {
                    return Err(Corruption::AdjacentFree { offset });
                }

                free_blocks += 1;
            }

            prev_allocated = tag.is_allocated();
            block = Block::at(offset + size);
        }

        let tag = epilogue.tag(region);
        if block != epilogue || tag.size() != 0 || !tag.is_allocated() {
            return Err(Corruption::Epilogue { offset: block.offset() });
        }
        if tag.is_prev_allocated() != prev_allocated {
            return Err(Corruption::PrevFlag { offset: epilogue.offset() });
        }

        // Walk the free lists. Every step is validated before it is taken, and the count bounds
        // the walk, so a corrupted list cannot send us out of the region or around in circles.
        let mut listed = 0;
        for class in 0..CLASSES {
            let mut prev = None;
            let mut cur = self.free.head(class);

            while let Some(block) = cur {
                let offset = block.offset();

                if offset < FIRST || offset >= epilogue.offset() || block.payload() % ALIGN != 0 {
                    return Err(Corruption::Link { offset });
                }

                let tag = block.tag(region);
                if tag.is_allocated() || free_list::size_class(tag.size()) != class {
                    return Err(Corruption::Class { offset, class });
                }

                let free = FreeBlock::new(block, region);
                if free.prev(region) != prev {
                    return Err(Corruption::Link { offset });
                }

                listed += 1;
                if listed > free_blocks {
                    return Err(Corruption::Count { listed, free: free_blocks });
                }

                prev = Some(block);
                cur = free.next(region);
            }
        }

        if listed != free_blocks {
            return Err(Corruption::Count { listed, free: free_blocks });
        }

        // The lists are now known to be sane, so every free block can be looked up in its own.
        for info in self.blocks().filter(|info| !info.allocated) {
            let block = Block::at(info.offset);

            if !self.free.iter(region, free_list::size_class(info.size)).any(|x| x == block) {
                return Err(Corruption::Unlisted { offset: info.offset });
            }
        }

        Ok(())
    }

    /// Find a block for a request of `size` bytes aligned to `align`, growing the region if
    /// needed.
    fn alloc_block(&mut self, size: usize, align: usize) -> Option<Block> {
        if size == 0 {
            log!(INTERNAL, "Zero-sized allocation.");

            return None;
        }

        let needed = block::request_size(size)?;
        // Room for the worst placement of the aligned block behind a leading free block.
        let search = if align <= ALIGN {
            needed
        } else {
            needed.checked_add(align)?.checked_add(MIN_BLOCK_SIZE)?
        };

        log!(INTERNAL, "Allocating {} bytes (block size {}, align {}).", size, needed, align);

        let mut grown = 0;
        let block = loop {
            if let Some(block) = self.free.find_fit(&self.region, search) {
                break block;
            }

            // A growth bridging a gap may come out slightly short, so allow a second one.
            if grown == 2 {
                return None;
            }
            self.grow(search).ok()?;
            grown += 1;
        };

        self.free.remove(&mut self.region, block);
        let block = if align > ALIGN { self.align_block(block, align) } else { block };
        block.set_allocated(&mut self.region, true);
        self.trim(block, needed);

        Some(block)
    }

    /// Move the start of a free, unindexed block up until its payload is aligned to `align`.
    ///
    /// The skipped bytes become a free block of their own, and are indexed. The remainder (still
    /// free and unindexed) is returned.
    fn align_block(&mut self, block: Block, align: usize) -> Block {
        let addr = self.region.ptr_at(block.payload()) as usize;
        let mut gap = addr.wrapping_neg() & (align - 1);

        // Too small to be a block; take the next aligned address instead.
        if gap != 0 && gap < MIN_BLOCK_SIZE {
            gap += align;
        }
        if gap == 0 {
            return block;
        }

        let size = block.size(&self.region);
        debug_assert!(size >= gap + MIN_BLOCK_SIZE, "{:?} cannot be aligned to {}.", block, align);

        log!(INTERNAL, "Skipping {} bytes of {:?} to align to {}.", gap, block, align);

        // The predecessor is allocated, since no two free blocks are adjacent.
        block.set_size(&mut self.region, gap);
        let aligned = Block::at(block.offset() + gap);
        aligned.init(&mut self.region, Tag::new(size - gap, false, false));
        self.free.insert(&mut self.region, block);

        aligned
    }

    /// Shrink an allocated block to `size` bytes, if the excess can form a block of its own.
    ///
    /// The excess becomes a free block, which is merged with a free successor and indexed.
    fn trim(&mut self, block: Block, size: usize) {
        let current = block.size(&self.region);
        debug_assert!(block.is_allocated(&self.region), "Trimming the free block {:?}.", block);
        debug_assert!(size <= current, "Trimming {:?} up to {}.", block, size);

        if current - size < MIN_BLOCK_SIZE {
            return;
        }

        log!(INTERNAL, "Splitting {} bytes off {:?}.", current - size, block);

        let rest = Block::at(block.offset() + size);

        #[cfg(feature = "security")]
        self.region.fill(rest.offset(), current - size, 0);

        block.set_size(&mut self.region, size);
        rest.init(&mut self.region, Tag::new(current - size, false, true));
        rest.next(&self.region).set_prev_allocated(&mut self.region, false);

        let rest = self.coalesce(rest);
        self.free.insert(&mut self.region, rest);
    }

    /// Grow an allocated block into its successor, if that is free and makes it reach `size`.
    fn absorb_next(&mut self, block: Block, size: usize) -> bool {
        let next = block.next(&self.region);
        let tag = next.tag(&self.region);
        let merged = block.size(&self.region) + tag.size();

        if tag.is_allocated() || merged < size {
            return false;
        }

        log!(INTERNAL, "Growing {:?} into {:?}.", block, next);

        self.free.remove(&mut self.region, next);
        block.set_size(&mut self.region, merged);
        block.next(&self.region).set_prev_allocated(&mut self.region, true);

        true
    }

    /// Merge a free block, which is not in the index, with its free neighbors.
    ///
    /// The neighbors are taken out of the index. The merged block (which is not indexed either) is
    /// returned.
    fn coalesce(&mut self, block: Block) -> Block {
        let region = &mut self.region;

        // Look at both sides before touching anything.
        let prev = block.prev_free(region);
        let next = block.next(region);
        let next_free = !next.is_allocated(region);

        let mut start = block;
        let mut size = block.size(region);

        if let Some(prev) = prev {
            self.free.remove(region, prev);
            size += prev.size(region);
            start = prev;
        }

        if next_free {
            self.free.remove(region, next);
            size += next.size(region);
        }

        if size != block.size(region) {
            log!(INTERNAL, "Merged {:?} into {:?} (size {}).", block, start, size);

            start.set_size(region, size);
        }

        start
    }

    /// Extend the region by at least `min` bytes.
    ///
    /// The old epilogue becomes the header of a new free block spanning the extension, which is
    /// merged with the last block if that is free. On failure, the OOM handler is called and the
    /// heap is left as it was.
    ///
    /// If someone else moved the break since the last growth, the foreign bytes between the
    /// region and the extension are covered by a block which stays allocated forever:
    ///
    /// ```notrust
    ///    region           gap (foreign)        extension
    ///    ... | epilogue | .................. | ............................ |
    ///          hole header                  ^ new free block   new epilogue ^
    /// ```
    ///
    /// Such a growth may come out a little short of `min`.
    fn grow(&mut self, min: usize) -> Result<(), ()> {
        let size = match config::extend_size(min, self.growth) {
            Some(size) => size,
            None => {
                fail::oom(min);

                return Err(());
            },
        };

        log!(NOTE, "Growing the heap by {} bytes.", size);

        let old_end = match self.brk.sbrk(size) {
            Ok(old_end) => old_end,
            Err(()) => {
                log!(WARNING, "The growth source refused {} bytes.", size);
                fail::oom(size);

                return Err(());
            },
        };

        let gap = (old_end.as_ptr() as usize).checked_sub(self.region.end() as usize);
        // The hole must fit a block header before the extension, and be a block itself.
        let layout = gap.and_then(|gap| {
            if gap == 0 {
                return Some((0, size));
            }

            let hole = block::align(cmp::max(gap.checked_add(HEADER)?, MIN_BLOCK_SIZE));
            let extension = size.checked_add(gap & !(ALIGN - 1))?;

            if extension < hole.checked_add(MIN_BLOCK_SIZE)? {
                return None;
            }

            Some((hole, extension))
        });

        let (hole, extension) = match layout {
            Some(layout) => layout,
            None => {
                log!(WARNING, "Cannot grow {:?} from {:?}.", self.region, old_end);
                fail::oom(size);

                return Err(());
            },
        };

        let epilogue = self.epilogue();
        let mut prev_allocated = epilogue.tag(&self.region).is_prev_allocated();

        unsafe {
            // The bytes following the region are either ours or skipped over by the hole.
            self.region.extend(extension);
        }

        let mut block = epilogue;
        if hole != 0 {
            log!(WARNING, "Covering foreign memory with a hole of {} bytes.", hole);

            epilogue.init(&mut self.region, Tag::new(hole, true, prev_allocated));
            block = Block::at(epilogue.offset() + hole);
            prev_allocated = true;
        }

        block.init(&mut self.region, Tag::new(extension - hole, false, prev_allocated));
        block.next(&self.region).init(&mut self.region, Tag::new(0, true, false));

        let block = self.coalesce(block);
        self.free.insert(&mut self.region, block);
        self.grows += 1;

        Ok(())
    }

    /// The block of a live allocation.
    fn block_of(&self, ptr: *mut u8) -> Block {
        let Some(offset) = self.region.offset_of(ptr) else {
            panic!("{:?} is not in the heap {:?}.", ptr, self.region);
        };
        assert!(offset >= FIRST + HEADER && offset % ALIGN == 0, "{:?} is not a payload.", ptr);

        let block = Block::from_payload(offset);
        debug_assert!(block.is_allocated(&self.region), "{:?} is not allocated (double free?).",
                      ptr);

        block
    }

    /// The epilogue sentinel.
    #[inline]
    fn epilogue(&self) -> Block {
        Block::at(self.region.len() - HEADER)
    }
}

impl<B: Break> fmt::Debug for Heap<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Heap {:?} (grown {} times)", self.region, self.grows)?;
        writeln!(f, "  @0x{:x} prologue", PAD)?;

        for block in self.blocks() {
            writeln!(f, "  {:?}", block)?;
        }

        write!(f, "  @0x{:x} epilogue", self.epilogue().offset())
    }
}

/// A block, as seen from outside the heap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The offset of the block header in the region.
    pub offset: usize,
    /// The size of the block, including its header.
    pub size: usize,
    /// Is the block allocated?
    pub allocated: bool,
}

impl fmt::Debug for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@0x{:x} 0x{:x} {}", self.offset, self.size,
               if self.allocated { "allocated" } else { "free" })
    }
}

/// An iterator over the blocks of a heap.
pub struct Blocks<'a> {
    /// The region.
    region: &'a Region,
    /// The next block to yield.
    cur: Block,
    /// The epilogue.
    end: Block,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cur >= self.end {
            return None;
        }

        let tag = self.cur.tag(self.region);
        let info = BlockInfo {
            offset: self.cur.offset(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        };

        // A zero size would spin forever; end the walk instead.
        self.cur = if tag.size() == 0 { self.end } else { Block::at(info.offset + info.size) };

        Some(info)
    }
}

/// Heap statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// The size of the region, sentinels and padding included.
    pub region_size: usize,
    /// The number of allocated blocks.
    pub allocated_blocks: usize,
    /// The total size of the allocated blocks.
    pub allocated_bytes: usize,
    /// The number of free blocks.
    pub free_blocks: usize,
    /// The total size of the free blocks.
    pub free_bytes: usize,
    /// The number of times the region was grown.
    pub grows: usize,
}

/// A heap inconsistency, as found by [`Heap::check`](struct.Heap.html#method.check).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corruption {
    /// The prologue was overwritten.
    Prologue,
    /// The block walk does not end at the epilogue, or the epilogue was overwritten.
    Epilogue {
        /// Where the walk ended.
        offset: usize,
    },
    /// A block payload is not aligned.
    Misaligned {
        /// The block.
        offset: usize,
    },
    /// A block has an impossible size.
    Size {
        /// The block.
        offset: usize,
        /// Its size.
        size: usize,
    },
    /// A free block's footer differs from its header.
    Footer {
        /// The block.
        offset: usize,
    },
    /// A block's predecessor flag is wrong.
    PrevFlag {
        /// The block.
        offset: usize,
    },
    /// Two free blocks are adjacent.
    AdjacentFree {
        /// The second block.
        offset: usize,
    },
    /// A free list holds an allocated block, or a block of another class.
    Class {
        /// The block.
        offset: usize,
        /// The class of the list.
        class: usize,
    },
    /// A free list link points outside the blocks, or the links disagree.
    Link {
        /// The block.
        offset: usize,
    },
    /// A free block is not in the free index.
    Unlisted {
        /// The block.
        offset: usize,
    },
    /// The free lists hold another number of blocks than there are free blocks.
    Count {
        /// The number of listed blocks (so far).
        listed: usize,
        /// The number of free blocks.
        free: usize,
    },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Corruption::Prologue => write!(f, "corrupted prologue"),
            Corruption::Epilogue { offset } => write!(f, "block walk ended at 0x{:x}, not at the \
                                                       epilogue", offset),
            Corruption::Misaligned { offset } => write!(f, "misaligned block at 0x{:x}", offset),
            Corruption::Size { offset, size } => write!(f, "block at 0x{:x} has invalid size \
                                                         0x{:x}", offset, size),
            Corruption::Footer { offset } => write!(f, "footer mismatch in free block at 0x{:x}",
                                                    offset),
            Corruption::PrevFlag { offset } => write!(f, "wrong predecessor flag at 0x{:x}",
                                                      offset),
            Corruption::AdjacentFree { offset } => write!(f, "uncoalesced free block at 0x{:x}",
                                                          offset),
            Corruption::Class { offset, class } => write!(f, "block at 0x{:x} does not belong in \
                                                           class {}", offset, class),
            Corruption::Link { offset } => write!(f, "broken free list link at 0x{:x}", offset),
            Corruption::Unlisted { offset } => write!(f, "free block at 0x{:x} is not indexed",
                                                      offset),
            Corruption::Count { listed, free } => write!(f, "{} blocks indexed, but {} free",
                                                         listed, free),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use core::ptr::NonNull;

    use crate::arena::Arena;

    /// The smallest growth increment, to keep the arenas small.
    const GROWTH: usize = config::MIN_GROWTH;

    /// A heap over an arena of `capacity` bytes.
    fn heap(capacity: usize) -> Heap<Arena> {
        Heap::with_growth(Arena::new(capacity).unwrap(), GROWTH).unwrap()
    }

    /// The size of a fresh heap's region.
    const INITIAL: usize = FIRST + GROWTH + HEADER;

    fn offset<B: Break>(heap: &Heap<B>, ptr: *mut u8) -> usize {
        heap.region.offset_of(ptr).unwrap()
    }

    #[test]
    fn test_init() {
        let heap = heap(INITIAL);

        assert_eq!(heap.check(), Ok(()));
        assert_eq!(heap.stats(), Stats {
            region_size: INITIAL,
            free_blocks: 1,
            free_bytes: GROWTH,
            ..Stats::default()
        });
        assert_eq!(heap.blocks().collect::<Vec<_>>(), [BlockInfo {
            offset: FIRST,
            size: GROWTH,
            allocated: false,
        }]);

        // Too small for the initial block.
        assert!(Heap::with_growth(Arena::new(INITIAL - ALIGN).unwrap(), GROWTH).is_err());
    }

    #[test]
    fn test_alloc_split() {
        let mut heap = heap(INITIAL);

        let ptr = heap.alloc(1);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % ALIGN, 0);
        assert_eq!(offset(&heap, ptr), FIRST + HEADER);
        assert_eq!(unsafe { heap.usable_size(ptr) }, MIN_BLOCK_SIZE - HEADER);

        let rest = Block::at(FIRST + MIN_BLOCK_SIZE);
        assert_eq!(rest.size(&heap.region), GROWTH - MIN_BLOCK_SIZE);
        assert_eq!(rest.footer(&heap.region), rest.tag(&heap.region));
        assert!(rest.tag(&heap.region).is_prev_allocated());
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_no_split_of_small_rest() {
        let mut heap = heap(INITIAL);

        // Leaves 16 bytes, which cannot form a block of its own.
        let ptr = heap.alloc(GROWTH - 16 - HEADER);
        assert!(!ptr.is_null());
        assert_eq!(unsafe { heap.usable_size(ptr) }, GROWTH - HEADER);
        assert_eq!(heap.stats().free_blocks, 0);
        assert!(heap.epilogue().tag(&heap.region).is_prev_allocated());
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_zero() {
        let mut heap = heap(INITIAL);

        assert!(heap.alloc(0).is_null());
        assert!(heap.calloc(0, 8).is_null());
        assert!(heap.calloc(8, 0).is_null());
        unsafe { heap.free(ptr::null_mut()); }
        assert_eq!(heap.stats().allocated_blocks, 0);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_coalesce() {
        let mut heap = heap(INITIAL);

        let a = heap.alloc(16);
        let b = heap.alloc(48);
        let c = heap.alloc(16);
        let d = heap.alloc(16);

        unsafe {
            heap.free(b);
            assert_eq!(heap.check(), Ok(()));
            heap.free(c);
            assert_eq!(heap.check(), Ok(()));
        }

        // B and C merged, and fit a request neither could serve alone.
        assert_eq!(heap.alloc(80), b);

        unsafe {
            heap.free(b);
            heap.free(a);
            heap.free(d);
        }

        // Everything merged back into one block.
        assert_eq!(heap.stats().free_blocks, 1);
        assert_eq!(heap.stats().free_bytes, GROWTH);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_three_way() {
        let mut heap = heap(INITIAL);

        let a = heap.alloc(100);
        let b = heap.alloc(100);
        let c = heap.alloc(100);
        let _guard = heap.alloc(100);

        unsafe {
            heap.free(a);
            heap.free(c);
            assert_eq!(heap.stats().free_blocks, 3);
            heap.free(b);
        }

        assert_eq!(heap.stats().free_blocks, 2);
        assert_eq!(heap.alloc(300), a);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_grow() {
        let mut heap = heap(4 * INITIAL);

        let a = heap.alloc(GROWTH / 2);
        let b = heap.alloc(GROWTH);
        assert!(!a.is_null() && !b.is_null());
        assert_eq!(heap.stats().grows, 1);
        // The tail of the initial block merged with the extension.
        assert_eq!(offset(&heap, b), offset(&heap, a) + GROWTH / 2 + ALIGN);

        // Larger than the increment.
        let c = heap.alloc(2 * GROWTH);
        assert!(!c.is_null());
        assert_eq!(heap.stats().grows, 2);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_exhaustion() {
        let mut heap = heap(INITIAL + GROWTH);

        let a = heap.alloc(GROWTH - 64);
        assert!(!a.is_null());
        assert!(heap.alloc(2 * GROWTH).is_null());
        assert_eq!(heap.stats().grows, 0);
        assert_eq!(heap.check(), Ok(()));

        // Still usable.
        let b = heap.alloc(GROWTH / 2);
        assert!(!b.is_null());
        assert_eq!(heap.stats().grows, 1);
        assert!(heap.alloc(GROWTH).is_null());
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_calloc() {
        let mut heap = heap(INITIAL);

        let a = heap.alloc(256);
        unsafe {
            ptr::write_bytes(a, 0xFF, 256);
            heap.free(a);
        }

        let b = heap.calloc(16, 16);
        assert_eq!(b, a);
        assert!(unsafe { core::slice::from_raw_parts(b, 256) }.iter().all(|&x| x == 0));

        assert!(heap.calloc(usize::MAX, 2).is_null());
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_realloc_in_place() {
        let mut heap = heap(INITIAL);

        unsafe {
            let a = heap.alloc(200);
            ptr::write_bytes(a, 0xAA, 200);

            // Shrinking splits the tail off, which merges with the free space after it.
            assert_eq!(heap.realloc(a, 40), a);
            assert_eq!(heap.usable_size(a), 48 - HEADER);
            assert_eq!(heap.stats().free_blocks, 1);
            assert_eq!(heap.check(), Ok(()));

            // Growing eats into the free successor.
            assert_eq!(heap.realloc(a, 1000), a);
            assert!(heap.usable_size(a) >= 1000);
            assert_eq!(*a.add(39), 0xAA);
            assert_eq!(heap.check(), Ok(()));

            // Small changes do nothing.
            let size = heap.usable_size(a);
            assert_eq!(heap.realloc(a, size - 4), a);
            assert_eq!(heap.usable_size(a), size);
        }
    }

    #[test]
    fn test_realloc_move() {
        let mut heap = heap(INITIAL);

        unsafe {
            let a = heap.alloc(64);
            let _b = heap.alloc(64);
            for i in 0..64 {
                *a.add(i) = i as u8;
            }

            let c = heap.realloc(a, 500);
            assert!(!c.is_null());
            assert_ne!(c, a);
            for i in 0..64 {
                assert_eq!(*c.add(i), i as u8);
            }
            assert_eq!(heap.check(), Ok(()));

            // Null and zero.
            let d = heap.realloc(ptr::null_mut(), 10);
            assert!(!d.is_null());
            assert!(heap.realloc(d, 0).is_null());
            assert_eq!(heap.check(), Ok(()));
        }
    }

    #[test]
    fn test_realloc_failure() {
        let mut heap = heap(INITIAL);

        unsafe {
            let a = heap.alloc(64);
            let _b = heap.alloc(64);
            ptr::write_bytes(a, 0x5A, 64);

            assert!(heap.realloc(a, 2 * GROWTH).is_null());
            assert!(core::slice::from_raw_parts(a, 64).iter().all(|&x| x == 0x5A));
            assert_eq!(heap.stats().allocated_blocks, 2);
            assert_eq!(heap.check(), Ok(()));
        }
    }

    #[test]
    fn test_contains() {
        let mut heap = heap(INITIAL);

        let a = heap.alloc(8);
        assert!(heap.contains(a));
        assert!(!heap.contains(heap.region.end()));
        assert!(!heap.contains(&heap as *const _ as *const u8));
    }

    #[test]
    fn test_check_detects() {
        let mut heap = heap(INITIAL);

        let a = heap.alloc(16);
        let b = heap.alloc(16);
        let _c = heap.alloc(16);
        unsafe { heap.free(b); }
        assert_eq!(heap.check(), Ok(()));

        let block = Block::at(offset(&heap, b) - HEADER);
        let tag = block.tag(&heap.region);

        // Footer.
        let footer = block.offset() + tag.size() - HEADER;
        heap.region.write(footer, 0);
        assert_eq!(heap.check(), Err(Corruption::Footer { offset: block.offset() }));
        heap.region.write(footer, tag.word());

        // Unindexed free block.
        heap.free.remove(&mut heap.region, block);
        assert_eq!(heap.check(), Err(Corruption::Count { listed: 1, free: 2 }));
        heap.free.insert(&mut heap.region, block);

        // Predecessor flag.
        let a = Block::at(offset(&heap, a) - HEADER);
        let word = heap.region.read(a.offset());
        heap.region.write(a.offset(), a.tag(&heap.region).with_prev_allocated(false).word());
        assert_eq!(heap.check(), Err(Corruption::PrevFlag { offset: a.offset() }));
        heap.region.write(a.offset(), word);

        // Prologue.
        heap.region.write(PAD, 0);
        assert_eq!(heap.check(), Err(Corruption::Prologue));
    }

    /// A growth source which wastes some memory before handing out the rest.
    struct Skewed {
        arena: Arena,
        skews: [usize; 2],
        calls: usize,
    }

    impl Break for Skewed {
        fn sbrk(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
            if let Some(&skew) = self.skews.get(self.calls) {
                self.arena.sbrk(skew)?;
            }
            self.calls += 1;

            self.arena.sbrk(size)
        }
    }

    #[test]
    fn test_misaligned_source() {
        let brk = Skewed { arena: Arena::new(4 * INITIAL).unwrap(), skews: [8, 0], calls: 0 };
        let mut heap = Heap::with_growth(brk, GROWTH).unwrap();

        assert_eq!(heap.region.ptr_at(0) as usize % ALIGN, 0);
        let a = heap.alloc(100);
        assert_eq!(a as usize % ALIGN, 0);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_foreign_gap() {
        let brk = Skewed { arena: Arena::new(4 * INITIAL).unwrap(), skews: [0, 16], calls: 0 };
        let mut heap = Heap::with_growth(brk, GROWTH).unwrap();

        let a = heap.alloc(GROWTH / 2);
        let b = heap.alloc(GROWTH);
        assert!(!a.is_null() && !b.is_null());
        assert_eq!(heap.check(), Ok(()));

        // The first extension came out short of the request, so the second one made up for it.
        assert_eq!(heap.stats().grows, 2);
        assert_eq!(heap.stats().allocated_blocks, 3);

        // The old epilogue became a hole over the 16 foreign bytes.
        let hole = BlockInfo {
            offset: INITIAL - HEADER,
            size: MIN_BLOCK_SIZE,
            allocated: true,
        };
        assert!(heap.blocks().any(|info| info == hole));
        assert!(offset(&heap, b) > INITIAL + 16);

        unsafe {
            heap.free(a);
            heap.free(b);
        }
        assert_eq!(heap.stats().allocated_blocks, 1);
        assert_eq!(heap.check(), Ok(()));
    }

    #[test]
    fn test_alloc_aligned() {
        let mut heap = heap(1 << 16);
        let mut ptrs = Vec::new();

        for &align in &[32, 128, 4096, 32, 128, 4096] {
            let a = heap.alloc_aligned(100, align);
            assert!(!a.is_null());
            assert_eq!(a as usize % align, 0);
            unsafe { ptr::write_bytes(a, 0xAB, 100); }
            assert_eq!(heap.check(), Ok(()));

            ptrs.push(a);
            ptrs.push(heap.alloc(24));
        }

        assert!(heap.alloc_aligned(8, 48).is_null());
        assert_eq!(heap.alloc_aligned(8, 8) as usize % ALIGN, 0);

        for ptr in ptrs {
            unsafe { heap.free(ptr); }
        }

        assert_eq!(heap.check(), Ok(()));
        assert_eq!(heap.stats().allocated_blocks, 1);
    }

    #[test]
    fn test_realloc_aligned() {
        let mut heap = heap(1 << 16);

        unsafe {
            let a = heap.alloc_aligned(64, 128);
            let _b = heap.alloc(64);
            for i in 0..64 {
                *a.add(i) = i as u8;
            }

            // In place.
            assert_eq!(heap.realloc_aligned(a, 32, 128), a);

            let c = heap.realloc_aligned(a, 3000, 128);
            assert!(!c.is_null());
            assert_eq!(c as usize % 128, 0);
            for i in 0..32 {
                assert_eq!(*c.add(i), i as u8);
            }
            assert_eq!(heap.check(), Ok(()));

            let d = heap.realloc_aligned(ptr::null_mut(), 10, 256);
            assert_eq!(d as usize % 256, 0);
            assert_eq!(heap.check(), Ok(()));
        }
    }

    /// The words of a free block between its links and its footer.
    #[cfg(feature = "security")]
    fn free_body(heap: &Heap<Arena>, block: Block) -> Vec<usize> {
        let size = block.size(&heap.region);
        let start = block.offset() + HEADER + 2 * block::WORD;

        (start..block.offset() + size - HEADER).step_by(block::WORD)
            .map(|offset| heap.region.read(offset))
            .collect()
    }

    #[cfg(feature = "security")]
    #[test]
    fn test_free_zeroes() {
        let mut heap = heap(INITIAL);

        unsafe {
            let a = heap.alloc(200);
            let _b = heap.alloc(8);
            ptr::write_bytes(a, 0xFF, 200);
            heap.free(a);
        }

        let body = free_body(&heap, Block::at(FIRST));
        assert!(!body.is_empty());
        assert!(body.iter().all(|&word| word == 0));
    }

    #[cfg(feature = "security")]
    #[test]
    fn test_trim_zeroes() {
        let mut heap = heap(INITIAL);

        unsafe {
            let a = heap.alloc(200);
            let _b = heap.alloc(8);
            ptr::write_bytes(a, 0xFF, 200);

            assert_eq!(heap.realloc(a, 40), a);
            assert!(core::slice::from_raw_parts(a, 40).iter().all(|&x| x == 0xFF));
        }

        let rest = Block::at(FIRST + 48);
        assert!(!rest.is_allocated(&heap.region));
        let body = free_body(&heap, rest);
        assert!(!body.is_empty());
        assert!(body.iter().all(|&word| word == 0));
    }

    #[test]
    fn test_dump() {
        let mut heap = heap(INITIAL);
        heap.alloc(10);

        let dump = format!("{:?}", heap);
        assert!(dump.contains("prologue"));
        assert!(dump.contains(&format!("@0x{:x} 0x20 allocated", FIRST)));
        assert!(dump.contains(&format!("@0x{:x} 0x{:x} free", FIRST + 32, GROWTH - 32)));
        assert!(dump.ends_with("epilogue"));
    }
}
