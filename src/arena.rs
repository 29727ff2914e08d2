//! In-memory growth source.
//!
//! An arena reserves a fixed amount of memory up front and hands it out through the `Break`
//! primitive, like a private program break with a hard ceiling. This gives independent heaps
//! which can be exhausted on purpose.

use alloc::alloc::{self as platform, Layout};
use core::ptr::NonNull;
use core::fmt;

use crate::block::ALIGN;
use crate::brk::Break;

/// A fixed-capacity memory segment with a movable break.
pub struct Arena {
    /// The start of the reserved memory.
    ptr: NonNull<u8>,
    /// The reserved size.
    capacity: usize,
    /// The number of bytes handed out so far.
    brk: usize,
}

impl Arena {
    /// Reserve `capacity` bytes (rounded up to the alignment unit) from the platform allocator.
    ///
    /// Fails if the platform allocator does.
    pub fn new(capacity: usize) -> Result<Arena, ()> {
        let capacity = capacity.checked_add(ALIGN - 1).ok_or(())? & !(ALIGN - 1);
        let layout = Layout::from_size_align(capacity.max(ALIGN), ALIGN).map_err(|_| ())?;

        let ptr = unsafe {
            // The layout has a non-zero size.
            platform::alloc(layout)
        };

        log!(DEBUG, "Reserved an arena of {} bytes at {:?}.", capacity, ptr);

        Ok(Arena {
            ptr: NonNull::new(ptr).ok_or(())?,
            capacity,
            brk: 0,
        })
    }

    /// The number of bytes reserved.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bytes handed out.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// The layout the memory was reserved with.
    #[inline]
    fn layout(&self) -> Layout {
        unsafe {
            // Validated when the arena was created.
            Layout::from_size_align_unchecked(self.capacity.max(ALIGN), ALIGN)
        }
    }
}

impl Break for Arena {
    fn sbrk(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        if size > self.capacity - self.brk {
            log!(DEBUG, "Arena exhausted ({} of {} bytes used, {} requested).", self.brk,
                 self.capacity, size);

            return Err(());
        }

        let old = unsafe {
            // `brk <= capacity`, so this stays inside (or one past) the reservation.
            NonNull::new_unchecked(self.ptr.as_ptr().add(self.brk))
        };
        self.brk += size;

        Ok(old)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            platform::dealloc(self.ptr.as_ptr(), self.layout());
        }
    }
}

// The arena owns its reservation exclusively.
unsafe impl Send for Arena {}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Arena(0x{:x}[0x{:x}/0x{:x}])", self.ptr.as_ptr() as usize, self.brk,
               self.capacity)
    }
}
