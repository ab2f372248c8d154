use log::trace;

use crate::{
    arena::Arena,
    kernel::PlatformMemory,
    list::{BlockInfo, Directory},
};

/// Returns the first block in directory order that is free and can hold
/// `size` bytes.
///
/// This is first-fit: the earliest block that is big enough wins even if a
/// later one would fit more tightly. The walk does not modify anything.
pub(crate) fn find_free_block<M: PlatformMemory>(arena: &Arena<M>, size: usize) -> Option<BlockInfo> {
    let found = Directory::new(arena).find(|block| block.is_free() && block.capacity >= size);

    match found {
        Some(block) => trace!("first fit for {size:#x} bytes: block at {:#x} ({:#x} bytes)", block.offset, block.capacity),
        None => trace!("no free block holds {size:#x} bytes"),
    }

    found
}
