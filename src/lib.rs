//! First-fit allocator over a single arena.
//!
//! A [`Heap`] asks its [`PlatformMemory`] source for one contiguous range of
//! bytes and never asks again. Every block handed out is carved from that
//! range, and the only bookkeeping is a header written in front of each
//! block:
//!
//! ```text
//! base                                                             base + size
//! +--------+---------+--------+---------+--------+-------------------------+
//! | Header | Payload | Header | Payload | Header |         Payload         |
//! |  used  |         |  used  |         |  free  |                         |
//! +--------+---------+--------+---------+--------+-------------------------+
//!     |                  ^  |                ^
//!     +------ next ------+  +----- next -----+
//! ```
//!
//! The headers form the block directory: a singly linked list in address
//! order that covers the arena without gaps. Allocation walks it from the
//! start, takes the first free block big enough, splits off whatever is left
//! when the leftover can still hold a block, and marks the block used.
//!
//! Blocks are never released. Once the free blocks run out every further
//! request for that size fails.

mod arena;
mod block;
mod error;
pub mod kernel;
mod list;
mod search;
mod split;

use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{arena::Arena, block::Block};

pub use crate::{
    block::{BlockState, HEADER_SIZE, MIN_BLOCK_SIZE},
    error::Error,
    kernel::{Kernel, LocalMemory, PlatformMemory},
    list::{BlockInfo, Directory},
};

/// The allocator. Owns its arena and returns it to the memory source when
/// dropped, which invalidates every pointer it handed out.
pub struct Heap<M: PlatformMemory = Kernel> {
    arena: Arena<M>,
}

impl Heap<Kernel> {
    /// Maps `total_size` bytes from the operating system and sets them up as
    /// one free block.
    pub fn init_heap(total_size: usize) -> Result<Self, Error> {
        Self::with_memory(Kernel, total_size)
    }
}

impl<M: PlatformMemory> Heap<M> {
    /// Smallest arena that still leaves a usable first block.
    pub const MIN_SIZE: usize = HEADER_SIZE + MIN_BLOCK_SIZE;

    /// Like [`Heap::init_heap`] but takes the arena from `memory`.
    pub fn with_memory(memory: M, total_size: usize) -> Result<Self, Error> {
        if total_size < Self::MIN_SIZE {
            return Err(Error::ArenaTooSmall {
                size: total_size,
                minimum: Self::MIN_SIZE,
            });
        }

        let mut arena = Arena::new(memory, total_size)?;

        // The first block spans the whole arena minus its own header.
        let first = Block {
            size: total_size - HEADER_SIZE,
            state: BlockState::Free,
            next: None,
        };
        first.store(&mut arena, 0);

        debug!("heap initialized: {total_size:#x} bytes, {:#x} free", first.size);

        Ok(Self { arena })
    }

    /// Returns a pointer to at least `size` bytes, or `None` when no free
    /// block is big enough or `size` is zero.
    ///
    /// The bytes are not cleared: they are zero only if nothing used them
    /// since the arena was mapped. There is no alignment guarantee, read and
    /// write through the pointer with unaligned accesses unless `size` and
    /// the allocation history make alignment obvious.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size).ok()
    }

    /// Same as [`Heap::allocate`] but tells why nothing was allocated.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        if size == 0 {
            warn!("rejected zero sized allocation");
            return Err(Error::ZeroSizedRequest);
        }

        let Some(found) = search::find_free_block(&self.arena, size) else {
            warn!("out of memory: {size:#x} bytes requested, {:#x} free", self.free_capacity());
            return Err(Error::OutOfMemory { requested: size });
        };

        if split::should_split(found.capacity, size) {
            split::split_block(&mut self.arena, found.offset, size);
        }

        let mut block = Block::load(&self.arena, found.offset);
        block.state = BlockState::Used;
        block.store(&mut self.arena, found.offset);

        debug_assert_eq!(self.check_invariants(), Ok(()));

        let payload = self.arena.pointer_at(Block::payload(found.offset));

        trace!("allocated {size:#x} bytes at {:p} ({:#x} byte block)", payload.as_ptr(), block.size);

        Ok(payload)
    }

    /// Every block in directory order. The walk only reads headers and can
    /// be restarted at any time.
    pub fn inspect_directory(&self) -> Directory<'_, M> {
        Directory::new(&self.arena)
    }

    /// Walks the directory and verifies that it is well formed:
    ///
    /// - every header and payload lies inside the arena,
    /// - every `next` points right after its block's payload,
    /// - the last block ends exactly at the end of the arena,
    /// - no free block is smaller than [`MIN_BLOCK_SIZE`].
    ///
    /// Because `next` must move strictly forward the walk always ends.
    pub fn check_invariants(&self) -> Result<(), Error> {
        let size = self.arena.size();
        let mut offset = 0;

        loop {
            let violation = move |reason: &'static str| Err(Error::InvariantViolation { offset, reason });

            if !self.arena.contains(offset, HEADER_SIZE) {
                return violation("header outside the arena");
            }

            let block = Block::load(&self.arena, offset);

            let end = match Block::payload(offset).checked_add(block.size) {
                Some(end) if end <= size => end,
                _ => return violation("payload runs past the end of the arena"),
            };

            if block.is_free() && block.size < MIN_BLOCK_SIZE {
                return violation("free block smaller than the minimum block size");
            }

            match block.next {
                None if end == size => return Ok(()),
                None => return violation("last block does not reach the end of the arena"),
                Some(next) if next != end => {
                    return violation("next block does not follow the payload");
                }
                Some(next) => offset = next,
            }
        }
    }

    /// Total arena size in bytes, headers included.
    #[inline]
    pub fn size(&self) -> usize {
        self.arena.size()
    }

    /// Sum of the capacities of all free blocks.
    pub fn free_capacity(&self) -> usize {
        self.inspect_directory()
            .filter(BlockInfo::is_free)
            .map(|block| block.capacity)
            .sum()
    }

    pub fn block_count(&self) -> usize {
        self.inspect_directory().count()
    }
}

impl<'a, M: PlatformMemory> IntoIterator for &'a Heap<M> {
    type Item = BlockInfo;
    type IntoIter = Directory<'a, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.inspect_directory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::tests::NoMemory;

    const ARENA: usize = 0x10000;

    fn shape<M: PlatformMemory>(heap: &Heap<M>) -> Vec<(BlockState, usize)> {
        heap.inspect_directory()
            .map(|block| (block.state, block.capacity))
            .collect()
    }

    fn assert_contiguous_and_covering<M: PlatformMemory>(heap: &Heap<M>) {
        let blocks: Vec<_> = heap.inspect_directory().collect();

        for pair in blocks.windows(2) {
            assert_eq!(pair[1].offset, pair[0].offset + HEADER_SIZE + pair[0].capacity);
        }

        let covered: usize = blocks.iter().map(|block| HEADER_SIZE + block.capacity).sum();
        assert_eq!(covered, heap.size());
        assert_eq!(heap.check_invariants(), Ok(()));
    }

    #[test]
    fn fresh_heap_is_one_free_block() {
        let heap = Heap::with_memory(LocalMemory, ARENA).unwrap();

        assert_eq!(shape(&heap), vec![(BlockState::Free, ARENA - HEADER_SIZE)]);
        assert_eq!(heap.free_capacity(), ARENA - HEADER_SIZE);
        assert_contiguous_and_covering(&heap);
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn kernel_backed_heap_starts_with_one_free_block() {
        let mut heap = Heap::init_heap(ARENA).unwrap();

        assert_eq!(shape(&heap), vec![(BlockState::Free, ARENA - HEADER_SIZE)]);

        let value = heap.allocate(8).unwrap().cast::<u64>();
        unsafe {
            value.write_unaligned(0xDEAD_BEEF);
            assert_eq!(value.read_unaligned(), 0xDEAD_BEEF);
        }
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn small_allocation_splits_the_first_block() {
        let mut heap = Heap::with_memory(LocalMemory, ARENA).unwrap();

        let ptr = heap.allocate(size_of::<i32>()).unwrap();

        assert_eq!(
            shape(&heap),
            vec![
                (BlockState::Used, 4),
                (BlockState::Free, ARENA - HEADER_SIZE - HEADER_SIZE - 4),
            ]
        );
        assert_eq!(ptr, heap.inspect_directory().next().unwrap().payload());
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn allocations_do_not_alias() {
        let mut heap = Heap::with_memory(LocalMemory, ARENA).unwrap();

        let some_int = heap.allocate(size_of::<i32>()).unwrap().cast::<i32>();
        let another_int = heap.allocate(size_of::<i32>()).unwrap().cast::<i32>();

        unsafe {
            some_int.write_unaligned(3);
            another_int.write_unaligned(7);

            assert_eq!(some_int.read_unaligned(), 3);
            assert_eq!(another_int.read_unaligned(), 7);
        }

        let distance = another_int.as_ptr() as usize - some_int.as_ptr() as usize;
        assert_eq!(distance, 4 + HEADER_SIZE);
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn headers_survive_payload_writes() {
        let mut heap = Heap::with_memory(LocalMemory, 0x400).unwrap();

        let sizes = [1, 7, 8, 13, 64];
        for size in sizes {
            let ptr = heap.allocate(size).unwrap();
            unsafe { ptr.as_ptr().write_bytes(0xFF, size) };
        }

        let used: Vec<_> = heap
            .inspect_directory()
            .filter(|block| !block.is_free())
            .map(|block| block.capacity)
            .collect();
        assert_eq!(used, sizes);
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn exhaustion_is_terminal_for_that_size() {
        let mut heap = Heap::with_memory(LocalMemory, 0x1000).unwrap();

        let mut allocated = 0;
        while heap.allocate(4).is_some() {
            allocated += 1;
            assert_contiguous_and_covering(&heap);
        }

        // Every allocation but the last one took a header and four bytes.
        assert_eq!(allocated, (0x1000 - HEADER_SIZE - MIN_BLOCK_SIZE) / (HEADER_SIZE + 4) + 1);
        assert!(heap.free_capacity() < 4);

        for size in [4, 5, 0x100, 0x1000, usize::MAX] {
            for _ in 0..3 {
                assert_eq!(heap.try_allocate(size), Err(Error::OutOfMemory { requested: size }));
            }
        }
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn failed_allocation_leaves_room_for_smaller_ones() {
        let mut heap = Heap::with_memory(LocalMemory, 0x100).unwrap();

        assert!(heap.allocate(0x100).is_none());
        assert_eq!(shape(&heap), vec![(BlockState::Free, 0x100 - HEADER_SIZE)]);

        assert!(heap.allocate(0x10).is_some());
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn tight_fit_takes_the_whole_block() {
        let mut heap = Heap::with_memory(LocalMemory, 0x100).unwrap();
        let capacity = 0x100 - HEADER_SIZE;

        // One byte short of leaving a minimum block behind: no split.
        let size = capacity - HEADER_SIZE - MIN_BLOCK_SIZE + 1;
        heap.allocate(size).unwrap();

        assert_eq!(shape(&heap), vec![(BlockState::Used, capacity)]);
        assert!(heap.allocate(1).is_none());
    }

    #[test]
    fn exact_fit_leaves_a_minimum_block() {
        let mut heap = Heap::with_memory(LocalMemory, 0x100).unwrap();
        let capacity = 0x100 - HEADER_SIZE;

        let size = capacity - HEADER_SIZE - MIN_BLOCK_SIZE;
        heap.allocate(size).unwrap();

        assert_eq!(
            shape(&heap),
            vec![(BlockState::Used, size), (BlockState::Free, MIN_BLOCK_SIZE)]
        );

        heap.allocate(MIN_BLOCK_SIZE).unwrap();
        assert_eq!(heap.free_capacity(), 0);
        assert_contiguous_and_covering(&heap);
    }

    #[test]
    fn zero_sized_requests_are_rejected() {
        let mut heap = Heap::with_memory(LocalMemory, 0x100).unwrap();

        assert_eq!(heap.try_allocate(0), Err(Error::ZeroSizedRequest));
        assert!(heap.allocate(0).is_none());
        assert_eq!(heap.block_count(), 1);
    }

    #[test]
    fn arena_must_hold_one_block() {
        let minimum = HEADER_SIZE + MIN_BLOCK_SIZE;

        for size in [0, HEADER_SIZE, minimum - 1] {
            assert!(matches!(
                Heap::with_memory(LocalMemory, size),
                Err(Error::ArenaTooSmall { minimum: m, .. }) if m == minimum
            ));
        }

        let mut heap = Heap::with_memory(LocalMemory, minimum).unwrap();
        assert_eq!(shape(&heap), vec![(BlockState::Free, MIN_BLOCK_SIZE)]);
        assert!(heap.allocate(MIN_BLOCK_SIZE).is_some());
    }

    #[test]
    fn acquisition_failure_is_reported() {
        let result = Heap::with_memory(NoMemory, ARENA);
        assert!(matches!(result, Err(Error::ArenaAcquisition { size: ARENA })));
    }

    #[test]
    fn heap_reference_iterates_the_directory() {
        let mut heap = Heap::with_memory(LocalMemory, 0x200).unwrap();
        heap.allocate(0x20).unwrap();

        let mut states = Vec::new();
        for block in &heap {
            states.push(block.state);
        }

        assert_eq!(states, vec![BlockState::Used, BlockState::Free]);
    }

    #[test]
    fn independent_heaps_do_not_share_state() {
        let mut first = Heap::with_memory(LocalMemory, 0x200).unwrap();
        let second = Heap::with_memory(LocalMemory, 0x200).unwrap();

        first.allocate(0x10).unwrap();

        assert_eq!(first.block_count(), 2);
        assert_eq!(second.block_count(), 1);
    }

    #[test]
    fn corrupted_links_are_detected() {
        let mut heap = Heap::with_memory(LocalMemory, 0x200).unwrap();
        heap.allocate(0x10).unwrap();

        let mut first = Block::load(&heap.arena, 0);
        first.next = Some(HEADER_SIZE + 0x18);
        first.store(&mut heap.arena, 0);

        assert_eq!(
            heap.check_invariants(),
            Err(Error::InvariantViolation {
                offset: 0,
                reason: "next block does not follow the payload",
            })
        );
    }

    #[test]
    fn truncated_directory_is_detected() {
        let mut heap = Heap::with_memory(LocalMemory, 0x200).unwrap();

        let mut first = Block::load(&heap.arena, 0);
        first.size -= 0x10;
        first.store(&mut heap.arena, 0);

        assert!(matches!(
            heap.check_invariants(),
            Err(Error::InvariantViolation { offset: 0, .. })
        ));
    }
}
