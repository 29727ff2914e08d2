//! **tagalloc:** a boundary-tag allocator.
//!
//! This crate defines a user space allocator managing one contiguous, growable region. Blocks
//! carry boundary tags, free blocks are kept in size-segregated explicit free lists, and freed
//! blocks are merged with their free neighbors immediately.
//!
//! The allocator comes in three layers:
//!
//! 1. `Heap`, a single-threaded heap over any `Break` (growth source).
//! 2. `LockedHeap`, a heap behind a lock, usable as a `GlobalAlloc`.
//! 3. The process-wide heap on the program break (`alloc`, `free`, `realloc`, `calloc`, and the
//!    `Allocator` type).

#![cfg_attr(not(test), no_std)]

#![warn(missing_docs)]

extern crate alloc;
extern crate tagalloc_shim as shim;

#[macro_use]
mod log;

mod allocator;
mod arena;
mod block;
mod bookkeeper;
mod brk;
mod free_list;
mod lazy_init;
mod region;
pub mod fail;

pub use allocator::{alloc, calloc, free, realloc, Allocator, Init, LockedHeap};
pub use arena::Arena;
pub use block::{ALIGN, MIN_BLOCK_SIZE};
pub use bookkeeper::{BlockInfo, Blocks, Corruption, Heap, Stats};
pub use brk::{Break, Sbrk};
pub use fail::set_oom_handler;
