//! Linear allocator - bump allocation with bulk reset

use core::any::Any;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::region::{Region, REGION_ALIGNMENT};
use crate::{align_up, effective_alignment, AllocError, AllocResult, Allocator};

/// Linear allocator - extremely fast for temporary allocations
///
/// Allocations are served linearly from a contiguous buffer: each call is a
/// pointer add and a bounds check. Individual frees are accepted and ignored;
/// only [`Allocator::reset`] reclaims space.
#[derive(Debug)]
pub struct LinearAllocator {
    region: Region,
    /// Current allocation offset, `0 <= offset <= region.len()`
    offset: usize,
}

impl LinearAllocator {
    /// Create a linear allocator owning `capacity` bytes
    pub fn new(capacity: usize) -> AllocResult<Self> {
        let region = Region::new(capacity)?;
        log::debug!("Created linear allocator with {} bytes", capacity);
        Ok(Self::from_region(region))
    }

    /// Create a linear allocator with the given capacity in KB
    pub fn with_capacity_kb(kb: usize) -> AllocResult<Self> {
        let capacity = kb.checked_mul(1024).ok_or(AllocError::SystemOutOfMemory {
            size: usize::MAX,
            align: REGION_ALIGNMENT,
        })?;
        Self::new(capacity)
    }

    /// Create a linear allocator over an existing region
    pub fn from_region(region: Region) -> Self {
        Self { region, offset: 0 }
    }

    /// Allocate room for `count` values of `T`
    pub fn alloc_aligned<T>(&mut self, count: usize) -> AllocResult<NonNull<T>> {
        let size = core::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(AllocError::OutOfMemory {
                requested: usize::MAX,
                available: self.available(),
            })?;
        self.allocate(size, core::mem::align_of::<T>()).map(NonNull::cast)
    }

    /// Get the current offset
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Open a scope that rewinds every allocation made inside it on drop
    pub fn scope(&mut self) -> LinearScope<'_> {
        LinearScope {
            saved: self.offset,
            allocator: self,
        }
    }
}

impl Allocator for LinearAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align = effective_alignment(align)?;

        let base = self.region.base().as_ptr() as usize;
        let aligned_offset = align_up(base + self.offset, align) - base;
        let new_offset = aligned_offset
            .checked_add(size)
            .filter(|end| *end <= self.region.len())
            .ok_or(AllocError::OutOfMemory {
                requested: size,
                available: self.region.len() - self.offset,
            })?;

        self.offset = new_offset;
        Ok(self.region.at(aligned_offset))
    }

    unsafe fn free(&mut self, _ptr: NonNull<u8>) -> AllocResult<()> {
        // Linear allocator doesn't support individual deallocation
        Ok(())
    }

    fn reset(&mut self) {
        self.offset = 0;
    }

    fn allocated_size(&self) -> usize {
        self.offset
    }

    fn total_size(&self) -> usize {
        self.region.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Scoped linear allocation guard
///
/// Derefs to the allocator; on drop the offset returns to where it was when
/// the scope opened.
pub struct LinearScope<'a> {
    allocator: &'a mut LinearAllocator,
    saved: usize,
}

impl Deref for LinearScope<'_> {
    type Target = LinearAllocator;

    fn deref(&self) -> &LinearAllocator {
        self.allocator
    }
}

impl DerefMut for LinearScope<'_> {
    fn deref_mut(&mut self) -> &mut LinearAllocator {
        self.allocator
    }
}

impl Drop for LinearScope<'_> {
    fn drop(&mut self) {
        self.allocator.offset = self.saved;
    }
}
