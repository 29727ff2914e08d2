//! Symbols and externs that `tagalloc` depends on.
//!
//! This crate provides the tunables and the program break primitive on Unix-like systems.

#![no_std]
#![warn(missing_docs)]

#[cfg(unix)]
extern crate libc;

pub mod config;
pub mod syscalls;
