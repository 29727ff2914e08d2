//! Out-of-memory reporting.
//!
//! Exhaustion is not fatal here: allocation simply returns null. The hook only gives the program
//! a chance to hear about it (to log, to release caches, or to abort if it prefers).

use core::mem;
use core::sync::atomic::{self, AtomicPtr};

static OOM_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_oom_handler as *mut ());

/// The default OOM handler.
///
/// This will simply log the failure.
#[cold]
fn default_oom_handler(size: usize) {
    log!(WARNING, "Out of memory: the heap could not grow by {} bytes.", size);
}

/// Call the OOM handler.
///
/// `size` is the number of bytes the heap failed to grow by.
///
/// # An important note
///
/// This is for OOM conditions, not malformed or too big requests, but when the growth source is
/// unable to provide memory for the allocation (SBRK fails).
#[cold]
pub fn oom(size: usize) {
    unsafe {
        // Only ever stored from a `fn(usize)`.
        (mem::transmute::<*mut (), fn(usize)>(OOM_HANDLER.load(atomic::Ordering::SeqCst)))(size)
    }
}

/// Set the OOM handler.
///
/// This is called when the heap fails to grow. The handler must not allocate from the heap which
/// failed, as that heap is locked while the handler runs.
#[inline]
pub fn set_oom_handler(handler: fn(usize)) {
    OOM_HANDLER.store(handler as *mut (), atomic::Ordering::SeqCst);
}
