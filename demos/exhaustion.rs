//! Fills a small heap with 64 byte requests until it runs out of memory.

use firstfit::{Error, Heap, LocalMemory};

fn main() -> Result<(), Error> {
    let mut heap = Heap::with_memory(LocalMemory, 0x400)?;

    let mut count = 0;
    loop {
        match heap.try_allocate(64) {
            Ok(addr) => {
                count += 1;
                println!("Allocation {count} at {addr:p}, {:#x} bytes still free", heap.free_capacity());
            }
            Err(err) => {
                println!("Allocation {} failed: {err}", count + 1);
                break;
            }
        }
    }

    // Smaller requests may still fit in what is left.
    match heap.allocate(8) {
        Some(addr) => println!("8 more bytes at {addr:p}"),
        None => println!("not even 8 bytes left"),
    }

    println!();
    for block in &heap {
        println!("{block}");
    }

    heap.check_invariants()
}
