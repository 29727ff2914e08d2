//! BRK abstractions.
//!
//! The heap grows through a single primitive: extend the segment, and tell me where the old end
//! was. This module defines that primitive and provides it on top of the program break.

use core::ptr::NonNull;

use shim::syscalls;
use spin::Mutex;

/// A source of contiguous memory.
///
/// Every successful call must hand out the bytes directly following the ones handed out by the
/// previous call. A source which cannot satisfy a request must fail without growing at all.
pub trait Break {
    /// Extend the segment by `size` bytes, and return the old end.
    fn sbrk(&mut self, size: usize) -> Result<NonNull<u8>, ()>;
}

impl<'a, B: Break + ?Sized> Break for &'a mut B {
    #[inline]
    fn sbrk(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        (**self).sbrk(size)
    }
}

/// The BRK mutex.
///
/// Moving the program break is a read-modify-write of process-wide state, so it is serialized.
static BRK_MUTEX: Mutex<()> = Mutex::new(());

/// The program break.
///
/// Only one heap should grow the program break. Something else in the process may still move it
/// (the platform `malloc` does); the heap then skips the foreign bytes with a hole block, which is
/// never handed out or touched.
#[derive(Debug, Default)]
pub struct Sbrk {
    _private: (),
}

impl Sbrk {
    /// The program break.
    pub const fn new() -> Sbrk {
        Sbrk { _private: () }
    }
}

impl Break for Sbrk {
    fn sbrk(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        // Important! The conversion is failable to avoid arithmetic overflow-based attacks.
        if size > isize::MAX as usize {
            return Err(());
        }

        let _guard = BRK_MUTEX.lock();

        log!(NOTE, "Incrementing the program break by {} bytes.", size);

        let old = unsafe {
            // Growing only; nothing above the old break is touched.
            syscalls::sbrk(size as isize)
        };

        if old as usize == usize::MAX {
            log!(WARNING, "The program break could not be moved by {} bytes.", size);

            Err(())
        } else {
            NonNull::new(old).ok_or(())
        }
    }
}
