//! Test automation.

#![allow(dead_code)]

use std::thread;

use tagalloc::{Arena, Heap};

/// The growth increment of test heaps.
pub const GROWTH: usize = 4096;

/// A heap over a private arena of `capacity` bytes, growing by `GROWTH` bytes at a time.
pub fn heap(capacity: usize) -> Heap<Arena> {
    Heap::with_growth(Arena::new(capacity).unwrap(), GROWTH).unwrap()
}

/// Fill `len` bytes at `ptr` with a pattern derived from `seed`.
pub unsafe fn fill(ptr: *mut u8, len: usize, seed: u8) {
    for i in 0..len {
        *ptr.add(i) = pattern(i, seed);
    }
}

/// Assert that `len` bytes at `ptr` hold the pattern written by `fill`.
pub unsafe fn verify(ptr: *const u8, len: usize, seed: u8) {
    for i in 0..len {
        assert_eq!(*ptr.add(i), pattern(i, seed), "byte {} of {:?} (seed {})", i, ptr, seed);
    }
}

/// The byte at `i` of the pattern for `seed`.
fn pattern(i: usize, seed: u8) -> u8 {
    (i as u8).wrapping_mul(31).wrapping_add(seed)
}

/// A tiny deterministic generator, for reproducible allocation patterns.
pub struct Rng(u64);

impl Rng {
    /// Seed a generator.
    pub fn new(seed: u64) -> Rng {
        Rng(seed | 1)
    }

    /// The next number below `max`.
    pub fn below(&mut self, max: usize) -> usize {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;

        (self.0 % max as u64) as usize
    }
}

/// Assert that the live spans `[ptr, ptr + len)` are pairwise disjoint.
pub fn assert_disjoint(spans: &[(*mut u8, usize)]) {
    let mut spans: Vec<_> = spans.iter().map(|&(ptr, len)| (ptr as usize, len)).collect();
    spans.sort();

    for pair in spans.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{:x?} overlaps {:x?}", pair[0], pair[1]);
    }
}

/// Spawn a thread and run `func` on both threads, then `join`.
fn spawn_double<F: Fn() + Sync>(func: F) {
    thread::scope(|s| {
        let handle = s.spawn(&func);

        func();

        handle.join().unwrap();
    });
}

/// "Multiply" a closure, by running it in multiple threads at the same time.
///
/// This will test for memory leaks, as well as acid wrapping.
pub fn multiply<F: Fn() + Sync>(func: F) {
    spawn_double(|| spawn_double(|| acid(&func)));
}

/// Wrap a block in acid tests.
///
/// This performs a number of temporary allocations to try to detect
/// inconsistency.
///
/// The basic idea is that if the allocator is broken, it might allocate the
/// same memory twice, or corrupt when allocating. Thus, we allocate some
/// temporary segment and override it. This way we might be able to detect
/// memory corruption through asserting memory consistency after the closure is
/// completed.
pub fn acid<F: FnOnce()>(func: F) {
    let mut vec = vec!["something", "yep", "yup"];
    let mut _v = vec![Box::new(2), Box::new(5)];
    let mut bx = Box::new(2389);
    let abc = Box::new("abc");

    vec.shrink_to_fit();
    vec.extend(["lol", "lulz"].iter());
    vec.shrink_to_fit();
    vec.extend(["we", "are"].iter());

    func();

    *bx = 500;
    vec.push("heyaya");
    *bx = 55;

    assert_eq!(
        vec,
        [
            "something",
            "yep",
            "yup",
            "lol",
            "lulz",
            "we",
            "are",
            "heyaya"
        ]
    );
    assert_eq!(*bx, 55);
    assert_eq!(*abc, "abc");
}
