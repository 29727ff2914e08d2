//! Configuration.
//!
//! This module contains anything which can be tweaked and customized to the users preferences.

use core::cmp;

/// The alignment unit.
///
/// Every payload handed out is aligned to this, and every block size is a multiple of it.
pub const ALIGNMENT: usize = 16;

/// The default growth increment.
///
/// Extending the region is a system call, so the heap always asks for at least this many bytes
/// at a time. This is also the size of the initial free block.
pub const GROWTH_INCREMENT: usize = 1 << 20;

/// The smallest growth increment a heap accepts.
///
/// Configured increments below this are raised to it.
pub const MIN_GROWTH: usize = 4096;

/// Canonicalize a growth request.
///
/// Given the minimum number of bytes the heap needs and the configured increment, this yields the
/// number of bytes to extend the region by, rounded up to the alignment unit. `None` is returned
/// on arithmetic overflow.
#[inline]
pub fn extend_size(min: usize, increment: usize) -> Option<usize> {
    let size = cmp::max(min, increment);

    size.checked_add(ALIGNMENT - 1).map(|x| x & !(ALIGNMENT - 1))
}
