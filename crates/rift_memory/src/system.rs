//! System allocator - the global allocator behind `AllocatorKind::Default`

use std::alloc::{self, Layout};
use std::collections::HashMap;
use core::any::Any;
use core::ptr::NonNull;

use crate::{effective_alignment, AllocError, AllocResult, Allocator};

/// Pass-through to the global allocator.
///
/// Has no capacity limit of its own. The only bookkeeping is the layout of
/// each live allocation, which `dealloc` needs back and which lets `free`
/// reject pointers it never handed out.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    live: HashMap<usize, Layout>,
    allocated: usize,
}

impl SystemAllocator {
    /// Create an empty system allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn release_all(&mut self) {
        for (addr, layout) in self.live.drain() {
            // Safety: every entry came from alloc with this layout and is still live
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
        self.allocated = 0;
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align = effective_alignment(align)?;
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| AllocError::SystemOutOfMemory { size, align })?;

        // Safety: layout has a non-zero size
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::SystemOutOfMemory { size, align })?;

        self.live.insert(ptr.as_ptr() as usize, layout);
        self.allocated += size;
        Ok(ptr)
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> AllocResult<()> {
        let layout = self
            .live
            .remove(&(ptr.as_ptr() as usize))
            .ok_or(AllocError::ForeignPointer)?;

        // ptr was returned by alloc with this layout and was still live
        alloc::dealloc(ptr.as_ptr(), layout);
        self.allocated -= layout.size();
        Ok(())
    }

    fn reset(&mut self) {
        self.release_all();
    }

    fn allocated_size(&self) -> usize {
        self.allocated
    }

    /// Memory reserved from the system equals memory in use
    fn total_size(&self) -> usize {
        self.allocated
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for SystemAllocator {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            log::debug!("Releasing {} outstanding system allocation(s)", self.live.len());
        }
        self.release_all();
    }
}
