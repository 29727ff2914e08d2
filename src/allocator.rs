//! The global allocator.
//!
//! This contains primitives for the cross-thread allocator: a heap behind a lock, and the
//! process-wide heap on the program break.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::Mutex;

use crate::block::ALIGN;
use crate::bookkeeper::Heap;
use crate::brk::{Break, Sbrk};
use crate::lazy_init::LazyInit;
use crate::log::Mute;

/// The constructor of a lazily initialized heap.
pub type Init<B> = fn() -> Result<Heap<B>, ()>;

/// A heap behind a lock.
///
/// Every operation takes the lock for its whole duration. The heap is constructed on first use;
/// if that fails, the operation fails, and the next one tries again.
///
/// The heap may be the global allocator, which the logger allocates from, so no log records are
/// emitted while the lock is held.
pub struct LockedHeap<B: Break> {
    /// The inner heap.
    inner: Mutex<LazyInit<Init<B>, Heap<B>>>,
}

impl<B: Break> LockedHeap<B> {
    /// Create a heap which will be constructed by `init` on first use.
    #[inline]
    pub const fn new(init: Init<B>) -> LockedHeap<B> {
        LockedHeap {
            inner: Mutex::new(LazyInit::new(init)),
        }
    }

    /// Put an existing heap behind a lock.
    #[inline]
    pub const fn from_heap(heap: Heap<B>) -> LockedHeap<B> {
        LockedHeap {
            inner: Mutex::new(LazyInit::initialized(heap)),
        }
    }

    /// Run `f` on the locked heap, initializing it if needed.
    ///
    /// This fails only if the heap could not be initialized.
    pub fn with<F: FnOnce(&mut Heap<B>) -> R, R>(&self, f: F) -> Result<R, ()> {
        let mute = Mute::new();
        let res = self.inner.lock().get().map(f);
        drop(mute);

        if res.is_err() {
            log!(WARNING, "Heap initialization failed.");
        }

        res
    }

    /// Allocate a chunk of memory.
    ///
    /// See `Heap::alloc`.
    #[inline]
    pub fn alloc(&self, size: usize) -> *mut u8 {
        self.with(|heap| heap.alloc(size)).unwrap_or(ptr::null_mut())
    }

    /// Allocate a chunk of memory aligned to `align`.
    ///
    /// See `Heap::alloc_aligned`.
    #[inline]
    pub fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8 {
        self.with(|heap| heap.alloc_aligned(size, align)).unwrap_or(ptr::null_mut())
    }

    /// Allocate a zeroed chunk of `count * size` bytes.
    ///
    /// See `Heap::calloc`.
    #[inline]
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        self.with(|heap| heap.calloc(count, size)).unwrap_or(ptr::null_mut())
    }

    /// Free a chunk of memory.
    ///
    /// See `Heap::free`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap.
    #[inline]
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let _mute = Mute::new();
        // A live allocation implies an initialized heap.
        if let Some(heap) = self.inner.lock().get_initialized() {
            heap.free(ptr);
        }
    }

    /// Reallocate memory.
    ///
    /// See `Heap::realloc`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap.
    #[inline]
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        self.with(|heap| heap.realloc(ptr, size)).unwrap_or(ptr::null_mut())
    }

    /// Reallocate memory aligned to `align`.
    ///
    /// See `Heap::realloc_aligned`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap, aligned to `align`.
    #[inline]
    pub unsafe fn realloc_aligned(&self, ptr: *mut u8, size: usize, align: usize) -> *mut u8 {
        self.with(|heap| heap.realloc_aligned(ptr, size, align)).unwrap_or(ptr::null_mut())
    }
}

unsafe impl<B: Break + Send> GlobalAlloc for LockedHeap<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        LockedHeap::alloc_aligned(self, layout.size(), layout.align())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        LockedHeap::free(self, ptr);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= ALIGN {
            return LockedHeap::calloc(self, 1, layout.size());
        }

        let ptr = LockedHeap::alloc_aligned(self, layout.size(), layout.align());
        if !ptr.is_null() {
            ptr::write_bytes(ptr, 0, layout.size());
        }

        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        LockedHeap::realloc_aligned(self, ptr, new_size, layout.align())
    }
}

/// The process-wide heap.
static HEAP: LockedHeap<Sbrk> = LockedHeap::new(global_heap);

/// Set up the process-wide heap on the program break.
fn global_heap() -> Result<Heap<Sbrk>, ()> {
    Heap::new(Sbrk::new())
}

/// Allocate a chunk of memory from the process-wide heap.
///
/// Returns null if `size` is zero or the program break cannot be moved.
#[inline]
pub fn alloc(size: usize) -> *mut u8 {
    HEAP.alloc(size)
}

/// Allocate a zeroed chunk of `count * size` bytes from the process-wide heap.
#[inline]
pub fn calloc(count: usize, size: usize) -> *mut u8 {
    HEAP.calloc(count, size)
}

/// Free a buffer of the process-wide heap.
///
/// Freeing null does nothing.
///
/// # Safety
///
/// `ptr` must be null or a live allocation of the process-wide heap.
#[inline]
pub unsafe fn free(ptr: *mut u8) {
    HEAP.free(ptr);
}

/// Reallocate memory of the process-wide heap.
///
/// # Safety
///
/// `ptr` must be null or a live allocation of the process-wide heap.
#[inline]
pub unsafe fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    HEAP.realloc(ptr, size)
}

/// The process-wide heap, as a Rust allocator.
///
/// Any alignment is supported. The heap lives on the program break, and shares it with whatever
/// else moves it (such as the C allocator). Memory taken by someone else between two growths is
/// skipped over and stays lost to the heap, but does not keep it from growing.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: tagalloc::Allocator = tagalloc::Allocator;
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Allocator;

unsafe impl GlobalAlloc for Allocator {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        GlobalAlloc::alloc(&HEAP, layout)
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        GlobalAlloc::dealloc(&HEAP, ptr, layout);
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        GlobalAlloc::alloc_zeroed(&HEAP, layout)
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        GlobalAlloc::realloc(&HEAP, ptr, layout, new_size)
    }
}
