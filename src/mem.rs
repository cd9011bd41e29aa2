//! Memory services: segment translation, the heap, and uncached buffers.
//!
//! DMA engines on this machine see physical RDRAM, not the CPU's cache.
//! Buffers the hardware reads asynchronously (audio rings, framebuffers)
//! are therefore handed out through the uncached segment, so producer
//! stores reach RDRAM without any cache maintenance. The cached address is
//! kept privately for deallocation.

use core::alloc::Layout;

use alloc::alloc::{alloc, dealloc};

use crate::vr4300;

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use linked_list_allocator::LockedHeap;

        #[global_allocator]
        static ALLOCATOR: LockedHeap = LockedHeap::empty();

        /// Hands the allocator its arena. The application calls this once at
        /// boot with the RDRAM range between the end of the loaded image and
        /// the top of memory.
        ///
        /// # Safety
        ///
        /// The range must be unused RAM and must not be given out twice.
        pub unsafe fn init_heap(bottom: *mut u8, size: usize) {
            ALLOCATOR.lock().init(bottom, size);
        }

        /// Translates a cached (KSEG0) CPU address to its uncached (KSEG1)
        /// alias.
        pub fn uncached_of(addr: usize) -> usize {
            addr | 0x2000_0000
        }

        /// Strips the segment bits, leaving the physical address the RCP
        /// register files want.
        pub fn physical_of(addr: usize) -> u32 {
            addr as u32 & 0x1FFF_FFFF
        }
    } else {
        /// Hosted stand-in: there is no uncached alias, so the translation
        /// is the identity.
        pub fn uncached_of(addr: usize) -> usize {
            addr
        }

        /// Hosted stand-in: register files hold the low 32 bits of the host
        /// address; tests compare like for like.
        pub fn physical_of(addr: usize) -> u32 {
            addr as u32
        }
    }
}

/// An owned byte buffer whose handed-out address bypasses the data cache.
///
/// Dropping it returns the original (cached) allocation to the heap, which
/// is the only place the cached alias is ever used.
pub struct UncachedBytes {
    base: *mut u8,
    len: usize,
    original: *mut u8,
    layout: Layout,
}

// Safety: sole owner of the allocation; the raw pointers are not shared.
unsafe impl Send for UncachedBytes {}

impl UncachedBytes {
    /// Allocates `len` bytes at `align` and returns the uncached view.
    ///
    /// # Panics
    ///
    /// On allocation failure; running out of RDRAM during subsystem init is
    /// a fatal condition on this machine.
    pub fn alloc(len: usize, align: usize) -> UncachedBytes {
        let layout = Layout::from_size_align(len, align)
            .expect("bad uncached buffer layout");
        let original = unsafe { alloc(layout) };
        assert!(!original.is_null(), "out of RDRAM for uncached buffer");
        // Flush anything the allocator's bookkeeping left in the cache for
        // this range, then alias it uncached.
        vr4300::data_cache_writeback_invalidate(original as usize, len);
        UncachedBytes {
            base: uncached_of(original as usize) as *mut u8,
            len,
            original,
            layout,
        }
    }

    /// The uncached address of the buffer.
    pub fn addr(&self) -> usize {
        self.base as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for UncachedBytes {
    fn drop(&mut self) {
        unsafe { dealloc(self.original, self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncached_alloc_is_usable_memory() {
        let buf = UncachedBytes::alloc(64, 8);
        assert_eq!(buf.len(), 64);
        assert_eq!(buf.addr() % 8, 0);
        unsafe {
            core::ptr::write_bytes(buf.as_mut_ptr(), 0xA5, 64);
            assert_eq!(*buf.as_mut_ptr().add(63), 0xA5);
        }
    }
}
