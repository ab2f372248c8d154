use std::{mem, ptr::NonNull};

use log::debug;

use crate::{error::Error, kernel::PlatformMemory};

/// Size of a machine word, the unit every header field is stored in.
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// The one contiguous range `[base, base + size)` all blocks are carved
/// from.
///
/// Nothing outside the arena holds allocator metadata: block headers live
/// inside these bytes and are read and written through the word accessors
/// below. Every accessor checks its offset against the arena size, so a
/// corrupted header can make the allocator panic but never touch memory it
/// does not own.
pub(crate) struct Arena<M: PlatformMemory> {
    /// First byte of the range returned by the memory source.
    base: NonNull<u8>,
    /// Length of the range in bytes.
    size: usize,
    /// Where the range came from and where it goes back to.
    memory: M,
}

impl<M: PlatformMemory> Arena<M> {
    /// Acquires `size` bytes from `memory`.
    pub fn new(memory: M, size: usize) -> Result<Self, Error> {
        let base = memory
            .request_memory(size)
            .ok_or(Error::ArenaAcquisition { size })?;

        debug!("arena of {size:#x} bytes acquired at {:p}", base.as_ptr());

        Ok(Self { base, size, memory })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tells whether `len` bytes starting at `offset` lie inside the arena.
    #[inline]
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size)
    }

    /// Pointer to the byte at `offset`. `offset == size` is allowed and
    /// yields the one-past-the-end pointer.
    pub fn pointer_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.size, "offset {offset:#x} outside arena of {:#x} bytes", self.size);

        unsafe { self.base.add(offset) }
    }

    /// Reads the word stored at `offset`. Headers sit right after payloads
    /// of any length, so the word may be unaligned.
    pub fn read_word(&self, offset: usize) -> usize {
        assert!(self.contains(offset, WORD), "word at {offset:#x} outside arena of {:#x} bytes", self.size);

        unsafe { self.base.add(offset).cast::<usize>().read_unaligned() }
    }

    /// Writes `value` at `offset`, see [`Arena::read_word`].
    pub fn write_word(&mut self, offset: usize, value: usize) {
        assert!(self.contains(offset, WORD), "word at {offset:#x} outside arena of {:#x} bytes", self.size);

        unsafe { self.base.add(offset).cast::<usize>().write_unaligned(value) }
    }
}

impl<M: PlatformMemory> Drop for Arena<M> {
    fn drop(&mut self) {
        debug!("returning arena of {:#x} bytes at {:p}", self.size, self.base.as_ptr());

        unsafe { self.memory.return_memory(self.base, self.size) }
    }
}
