//! System calls.

/// Move the program break by `increment` bytes. See `man sbrk`.
///
/// On success, the previous program break is returned. On failure, `usize::MAX` (as a pointer) is returned.
///
/// # Safety
///
/// Shrinking the break (negative `increment`) invalidates whatever lived above the new break.
#[cfg(unix)]
pub unsafe fn sbrk(increment: isize) -> *mut u8 {
    libc::sbrk(increment as libc::intptr_t) as *mut u8
}

/// Move the program break by `increment` bytes.
///
/// There is no program break on this platform, so this always fails.
#[cfg(not(unix))]
pub unsafe fn sbrk(_increment: isize) -> *mut u8 {
    usize::MAX as *mut u8
}
