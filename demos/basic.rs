//! Maps a 64 KiB heap, stores two integers in it and prints the block
//! directory after every step.

use firstfit::{Heap, PlatformMemory};

fn print_heap<M: PlatformMemory>(heap: &Heap<M>) {
    for block in heap.inspect_directory() {
        println!("{block}");
    }
    println!();
}

fn main() -> Result<(), firstfit::Error> {
    let mut heap = Heap::init_heap(0x10000)?;
    print_heap(&heap);

    let some_int = heap.try_allocate(size_of::<i32>())?.cast::<i32>();
    let another_int = heap.try_allocate(size_of::<i32>())?.cast::<i32>();

    unsafe {
        some_int.write_unaligned(3);
        print_heap(&heap);
        another_int.write_unaligned(7);

        println!("{}, {}\n", some_int.read_unaligned(), another_int.read_unaligned());
    }
    print_heap(&heap);

    Ok(())
}
