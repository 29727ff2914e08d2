//! Walk through a few heap operations, dumping the block list after each.

extern crate tagalloc;

use tagalloc::{Arena, Heap};

fn main() {
    let mut heap = Heap::with_growth(Arena::new(1 << 16).expect("arena"), 4096)
        .expect("heap");
    println!("{:?}\n", heap);

    let a = heap.alloc(32);
    let b = heap.alloc(64);
    let c = heap.alloc(32);
    println!("After three allocations:\n{:?}\n", heap);

    unsafe {
        heap.free(b);
        heap.free(c);
    }
    println!("After freeing the last two:\n{:?}\n", heap);

    let d = unsafe { heap.realloc(a, 10_000) };
    println!("After growing the first past the region:\n{:?}\n", heap);
    println!("{:#?}", heap.stats());

    unsafe { heap.free(d); }
    heap.check().expect("consistent heap");
}
