//! The managed region.
//!
//! The region is the contiguous span of memory the heap carves its blocks out of. Blocks are
//! addressed by byte offsets from the region's base, and all word reads and writes go through the
//! accessors here, so bounds and alignment are checked in one place.

use core::ptr::{self, NonNull};
use core::{fmt, mem};

use crate::block::WORD;

/// A contiguous, growable span of memory.
///
/// The region never moves: growing it only moves its end. It does not own the memory in the
/// sense of releasing it; that is the business of the growth source it came from.
pub struct Region {
    /// The first byte of the region.
    base: NonNull<u8>,
    /// The number of bytes currently in the region.
    len: usize,
}

impl Region {
    /// Construct a region from its raw parts (base pointer and length).
    ///
    /// # Safety
    ///
    /// `len` bytes starting at `base` must be valid for reads and writes and exclusively owned by
    /// this region.
    #[inline]
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Region {
        Region { base, len }
    }

    /// The number of bytes in the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The address one past the last byte of the region.
    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.len)
    }

    /// Take `size` bytes, which must directly follow the current end, into the region.
    ///
    /// # Safety
    ///
    /// The caller must have acquired the bytes (they must be valid and exclusively owned), or
    /// never access the ones it did not.
    #[inline]
    pub unsafe fn extend(&mut self, size: usize) {
        self.len += size;
    }

    /// Convert an offset into an address.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "Offset {} out of bound (region is {} bytes).", offset,
                self.len);

        self.base.as_ptr().wrapping_add(offset)
    }

    /// Convert an address inside the region into an offset.
    ///
    /// Returns `None` if the address lies outside the region.
    #[inline]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let base = self.base.as_ptr() as usize;

        if addr >= base && addr - base < self.len {
            Some(addr - base)
        } else {
            None
        }
    }

    /// Read the word at `offset`.
    #[inline]
    pub fn read(&self, offset: usize) -> usize {
        self.check_word(offset);

        unsafe {
            // The word is in bound and aligned (checked above).
            ptr::read(self.base.as_ptr().add(offset) as *const usize)
        }
    }

    /// Write the word at `offset`.
    #[inline]
    pub fn write(&mut self, offset: usize, word: usize) {
        self.check_word(offset);

        unsafe {
            ptr::write(self.base.as_ptr().add(offset) as *mut usize, word);
        }
    }

    /// memcpy `size` bytes from `from` to `to`.
    ///
    /// # Panics
    ///
    /// This will panic if either range is out of bound or the two ranges overlap.
    #[inline]
    pub fn copy(&mut self, from: usize, to: usize, size: usize) {
        self.check_range(from, size);
        self.check_range(to, size);
        assert!(from + size <= to || to + size <= from, "Overlapping copy.");

        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(from), self.base.as_ptr().add(to),
                                     size);
        }
    }

    /// Set `size` bytes starting at `offset` to `byte`.
    #[inline]
    pub fn fill(&mut self, offset: usize, size: usize, byte: u8) {
        self.check_range(offset, size);

        unsafe {
            ptr::write_bytes(self.base.as_ptr().add(offset), byte, size);
        }
    }

    /// Bound and alignment check for a word access.
    #[inline]
    fn check_word(&self, offset: usize) {
        debug_assert!(offset % mem::align_of::<usize>() == 0, "Unaligned word access at {}.",
                      offset);
        self.check_range(offset, WORD);
    }

    /// Bound check for a byte range.
    #[inline]
    fn check_range(&self, offset: usize, size: usize) {
        assert!(offset.checked_add(size).map_or(false, |end| end <= self.len),
                "Access [{}, {}+{}) out of bound (region is {} bytes).", offset, offset, size,
                self.len);
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}[0x{:x}]", self.base.as_ptr() as usize, self.len)
    }
}
