//! Allocator logging.
//!
//! This allows for detailed logging for `tagalloc`, routed through the `log` facade.
//!
//! A logger is free to allocate, and may well allocate from the very heap that is logging. So
//! nothing is emitted while any heap lock is held (see `Mute`).

use core::sync::atomic::{AtomicUsize, Ordering};

/// The number of live `Mute` guards.
static MUTED: AtomicUsize = AtomicUsize::new(0);

/// A guard silencing the allocator's log records until dropped.
///
/// The count is process-wide: records of unlocked heaps on other threads are silenced too while
/// a guard lives.
pub struct Mute(());

impl Mute {
    /// Silence the log records.
    #[inline]
    pub fn new() -> Mute {
        MUTED.fetch_add(1, Ordering::SeqCst);

        Mute(())
    }
}

impl Drop for Mute {
    #[inline]
    fn drop(&mut self) {
        MUTED.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Are the log records silenced?
#[inline]
#[cfg_attr(not(feature = "log"), allow(dead_code))]
pub fn is_muted() -> bool {
    MUTED.load(Ordering::SeqCst) != 0
}

/// Log to the appropriate source.
///
/// The first argument is the level, one of `INTERNAL`, `DEBUG`, `NOTE`, `WARNING` or `ERROR`. The
/// rest of the arguments are just normal formatters.
///
/// Without the `log` feature, this expands to nothing (the arguments are still type checked).
macro_rules! log {
    (INTERNAL, $( $arg:tt )*) => { log!(@emit Trace, $( $arg )*) };
    (DEBUG, $( $arg:tt )*) => { log!(@emit Debug, $( $arg )*) };
    (NOTE, $( $arg:tt )*) => { log!(@emit Info, $( $arg )*) };
    (WARNING, $( $arg:tt )*) => { log!(@emit Warn, $( $arg )*) };
    (ERROR, $( $arg:tt )*) => { log!(@emit Error, $( $arg )*) };
    (@emit $lv:ident, $( $arg:tt )*) => {{
        #[cfg(feature = "log")]
        {
            if !$crate::log::is_muted() {
                ::log::log!(target: "tagalloc", ::log::Level::$lv, $( $arg )*);
            }
        }

        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($( $arg )*);
        }
    }};
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mute() {
        let outer = Mute::new();
        let inner = Mute::new();
        assert!(is_muted());

        drop(inner);
        assert!(is_muted());
        drop(outer);
    }
}
