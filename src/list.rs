use std::{fmt, iter::FusedIterator, ptr::NonNull};

use crate::{
    arena::Arena,
    block::{Block, BlockState, HEADER_SIZE},
    kernel::PlatformMemory,
};

/// What the directory reports about one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub state: BlockState,
    /// Payload capacity in bytes, header excluded.
    pub capacity: usize,
    /// Offset of the block header from the start of the arena.
    pub offset: usize,
    /// Address of the block header.
    pub address: NonNull<u8>,
}

impl BlockInfo {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// Address of the first payload byte.
    #[inline]
    pub fn payload(&self) -> NonNull<u8> {
        unsafe { self.address.add(HEADER_SIZE) }
    }
}

/// One line per block, e.g. `FREE start: 0x7F3A2C000000, size: 0xFFE8`.
impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            BlockState::Free => "FREE",
            BlockState::Used => "BUSY",
        };

        write!(
            f,
            "{state} start: 0x{:X}, size: 0x{:X}",
            self.address.as_ptr() as usize,
            self.capacity
        )
    }
}

/// In-order traversal of the block directory, starting at the arena origin.
///
/// The walk follows the `next` words stored in the headers. It stops early
/// if a link leaves the arena or if it has visited more blocks than the
/// arena could possibly hold, so a corrupted directory cannot make it loop
/// forever. Use [`crate::Heap::check_invariants`] to find out why.
pub struct Directory<'a, M: PlatformMemory> {
    arena: &'a Arena<M>,
    current: Option<usize>,
    remaining: usize,
}

impl<'a, M: PlatformMemory> Directory<'a, M> {
    pub(crate) fn new(arena: &'a Arena<M>) -> Self {
        Self {
            arena,
            current: Some(0),
            remaining: arena.size() / HEADER_SIZE,
        }
    }
}

impl<M: PlatformMemory> Iterator for Directory<'_, M> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;

        if self.remaining == 0 || !self.arena.contains(offset, HEADER_SIZE) {
            self.current = None;
            return None;
        }

        let block = Block::load(self.arena, offset);

        self.current = block.next;
        self.remaining -= 1;

        Some(BlockInfo {
            state: block.state,
            capacity: block.size,
            offset,
            address: self.arena.pointer_at(offset),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.current {
            Some(_) => (0, Some(self.remaining)),
            None => (0, Some(0)),
        }
    }
}

impl<M: PlatformMemory> FusedIterator for Directory<'_, M> {}
