use crate::{
    arena::{Arena, WORD},
    kernel::PlatformMemory,
};

/// Bytes taken by a block header inside the arena.
pub const HEADER_SIZE: usize = 3 * WORD;

/// Smallest capacity a block created by splitting may have.
pub const MIN_BLOCK_SIZE: usize = WORD;

// Word offsets of the header fields.
const SIZE: usize = 0;
const STATE: usize = WORD;
const NEXT: usize = 2 * WORD;

/// Stored in the `next` word of the last block.
const NO_NEXT: usize = usize::MAX;

/// Whether a block can be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    Free,
    Used,
}

/// This is the structure of a block header. It is never kept anywhere but
/// inside the arena; [`Block::load`] and [`Block::store`] copy it in and out
/// of the bytes at a given offset.
///
/// ```text
/// +---------------------+ <------+ offset
/// |        size         |        |
/// +---------------------+        |
/// |        state        |        | -> Header (HEADER_SIZE bytes)
/// +---------------------+        |
/// |        next         |        |
/// +---------------------+ <------+ offset + HEADER_SIZE
/// |       Payload       |        |
/// |         ...         |        | -> `size` bytes handed to the client
/// |         ...         |        |
/// +---------------------+ <------+ offset + HEADER_SIZE + size == next
/// ```
///
/// Blocks are contiguous, so `next` is redundant with `offset + HEADER_SIZE +
/// size`. It is kept anyway: it marks the last block and lets the directory
/// be checked for corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    /// Payload capacity, header excluded.
    pub size: usize,
    pub state: BlockState,
    /// Offset of the successor's header, `None` for the last block.
    pub next: Option<usize>,
}

impl Block {
    /// Reads the header stored at `offset`.
    pub fn load<M: PlatformMemory>(arena: &Arena<M>, offset: usize) -> Self {
        let state = match arena.read_word(offset + STATE) {
            0 => BlockState::Used,
            _ => BlockState::Free,
        };

        let next = match arena.read_word(offset + NEXT) {
            NO_NEXT => None,
            next => Some(next),
        };

        Self {
            size: arena.read_word(offset + SIZE),
            state,
            next,
        }
    }

    /// Writes this header at `offset`.
    pub fn store<M: PlatformMemory>(&self, arena: &mut Arena<M>, offset: usize) {
        let state = match self.state {
            BlockState::Used => 0,
            BlockState::Free => 1,
        };

        arena.write_word(offset + SIZE, self.size);
        arena.write_word(offset + STATE, state);
        arena.write_word(offset + NEXT, self.next.unwrap_or(NO_NEXT));
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// Offset of the first payload byte of the block whose header is at `offset`.
    #[inline]
    pub fn payload(offset: usize) -> usize {
        offset + HEADER_SIZE
    }
}
