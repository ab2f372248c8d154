//! Sources of raw memory for the allocator arena.
//!
//! The allocator only ever crosses the operating system boundary once: when
//! the arena is created. That boundary is modelled by [`PlatformMemory`] so
//! the allocator can run on top of a real mapping ([`Kernel`]) or on top of
//! memory borrowed from the Rust global allocator ([`LocalMemory`]).

use std::{alloc::Layout, mem, ptr::NonNull};

/// This trait provides an abstraction to handle low level memory requests.
/// The allocator has nothing to do with the concrete APIs offered by each
/// kernel, it only needs one contiguous range of bytes.
///
/// # Safety
///
/// Implementors must guarantee that a range returned by
/// [`PlatformMemory::request_memory`] is exactly `len` bytes long, readable,
/// writable, initialized (zero-filled or not) and not aliased by anything
/// else until it is handed back through [`PlatformMemory::return_memory`].
pub unsafe trait PlatformMemory {
    /// Request a memory region of size `len`. Returns a pointer to the start
    /// of the region or `None` if the underlying source cannot provide it.
    fn request_memory(&self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the source.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe a range previously returned by
    /// `request_memory` on this same source, and nothing may use it afterwards.
    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize);
}

/// Anonymous private mappings straight from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    unsafe impl PlatformMemory for Kernel {
        fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            if len == 0 {
                return None;
            }

            // Anonymous mappings are zero-filled by the kernel.
            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

            if addr == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::Memory;

    unsafe impl PlatformMemory for Kernel {
        fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            if len == 0 {
                return None;
            }

            // Committed pages are zero-filled.
            let addr = unsafe { Memory::VirtualAlloc(None, len, flags, protection) };

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn return_memory(&self, addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}

/// Zero-filled memory taken from the Rust global allocator.
///
/// Behaves like an anonymous mapping without a system call per arena, which
/// makes it the source of choice for tests and short lived heaps.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMemory;

impl LocalMemory {
    fn layout(len: usize) -> Option<Layout> {
        Layout::from_size_align(len, mem::align_of::<usize>()).ok()
    }
}

unsafe impl PlatformMemory for LocalMemory {
    fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }

        let layout = Self::layout(len)?;

        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
        // A layout that could not be built was never handed out.
        if let Some(layout) = Self::layout(len) {
            unsafe { std::alloc::dealloc(addr.as_ptr(), layout) }
        }
    }
}
