use log::trace;

use crate::{
    arena::Arena,
    block::{Block, BlockState, HEADER_SIZE, MIN_BLOCK_SIZE},
    kernel::PlatformMemory,
};

/// Tells whether a free block of `capacity` bytes has room for `requested`
/// bytes plus a whole new block behind them. Anything smaller than
/// [`MIN_BLOCK_SIZE`] left over is not worth a header: it would sit in the
/// directory forever without fitting any request.
#[inline]
pub(crate) fn should_split(capacity: usize, requested: usize) -> bool {
    requested
        .checked_add(HEADER_SIZE + MIN_BLOCK_SIZE)
        .is_some_and(|needed| capacity >= needed)
}

/// Shrinks the block at `offset` to exactly `requested` bytes and turns the
/// rest into a new free block linked right after it. Returns the offset of
/// the new block.
///
/// ```text
/// Before:
/// +--------+-------------------------------------------+
/// | Header |                 size                      | --> next
/// +--------+-------------------------------------------+
///
/// After:
/// +--------+-----------+--------+----------------------+
/// | Header | requested | Header |  size - H - requested | --> next
/// +--------+-----------+--------+----------------------+
/// ```
///
/// Only the two headers involved are written; the rest of the directory is
/// untouched and keeps its order because the new block physically follows
/// the block it was cut from.
pub(crate) fn split_block<M: PlatformMemory>(arena: &mut Arena<M>, offset: usize, requested: usize) -> usize {
    let mut block = Block::load(arena, offset);

    debug_assert!(block.is_free(), "splitting a used block at {offset:#x}");
    debug_assert!(should_split(block.size, requested), "block at {offset:#x} too small to split");

    let remainder_offset = Block::payload(offset) + requested;
    let remainder = Block {
        size: block.size - HEADER_SIZE - requested,
        state: BlockState::Free,
        next: block.next,
    };
    remainder.store(arena, remainder_offset);

    block.size = requested;
    block.next = Some(remainder_offset);
    block.store(arena, offset);

    trace!(
        "split block at {offset:#x}: {requested:#x} bytes kept, {:#x} bytes free at {remainder_offset:#x}",
        remainder.size
    );

    remainder_offset
}
