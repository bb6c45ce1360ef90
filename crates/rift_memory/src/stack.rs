//! Stack allocator - LIFO allocation

use core::any::Any;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::region::{Region, REGION_ALIGNMENT};
use crate::{align_up, effective_alignment, AllocError, AllocResult, Allocator};

/// Bookkeeping for one live allocation
#[derive(Clone, Copy, Debug)]
struct Frame {
    /// Stack top before this allocation
    previous_top: usize,
    /// Padding inserted to align `start`
    adjustment: usize,
    /// Offset of the returned pointer
    start: usize,
}

/// Stack allocator - LIFO allocation with markers
///
/// Fast allocator for temporary data that follows a stack pattern.
/// Supports both individual deallocation (LIFO order) and bulk rollback via
/// markers. Frames are recorded beside the buffer, so a free can be checked
/// against the most recent allocation before the top moves.
#[derive(Debug)]
pub struct StackAllocator {
    region: Region,
    /// Current top of stack
    top: usize,
    /// Live allocations, most recent last
    frames: Vec<Frame>,
}

impl StackAllocator {
    /// Create a new stack allocator
    pub fn new(capacity: usize) -> AllocResult<Self> {
        let region = Region::new(capacity)?;
        log::debug!("Created stack allocator with {} bytes", capacity);
        Ok(Self::from_region(region))
    }

    /// Create with capacity in KB
    pub fn with_capacity_kb(kb: usize) -> AllocResult<Self> {
        let capacity = kb.checked_mul(1024).ok_or(AllocError::SystemOutOfMemory {
            size: usize::MAX,
            align: REGION_ALIGNMENT,
        })?;
        Self::new(capacity)
    }

    /// Create a stack allocator over an existing region
    pub fn from_region(region: Region) -> Self {
        Self {
            region,
            top: 0,
            frames: Vec::new(),
        }
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

    /// Get a marker for the current stack position
    pub fn marker(&self) -> StackMarker {
        StackMarker {
            offset: self.top,
            adjustment: self.frames.last().map_or(0, |f| f.adjustment),
            depth: self.frames.len(),
        }
    }

    /// Free everything allocated since `marker` was taken.
    ///
    /// Fails without touching the stack if the marker no longer describes a
    /// position on it (it was taken above a point the stack has since been
    /// rolled back past).
    pub fn free_to_marker(&mut self, marker: StackMarker) -> AllocResult<()> {
        let expected = match self.frames.get(marker.depth) {
            Some(frame) => frame.previous_top,
            None if marker.depth == self.frames.len() => self.top,
            None => usize::MAX,
        };
        if marker.offset > self.top || expected != marker.offset {
            return Err(AllocError::StaleMarker {
                marker: marker.offset,
                current: self.top,
            });
        }

        self.frames.truncate(marker.depth);
        self.top = marker.offset;
        Ok(())
    }

    /// Get the current top position
    #[inline]
    pub fn current_position(&self) -> usize {
        self.top
    }

    /// Number of live allocations
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a scope that rolls back to the current marker on drop
    pub fn scope(&mut self) -> StackScope<'_> {
        StackScope {
            marker: self.marker(),
            stack: self,
        }
    }
}

impl Allocator for StackAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align = effective_alignment(align)?;

        let base = self.region.base().as_ptr() as usize;
        let start = align_up(base + self.top, align) - base;
        let new_top = start
            .checked_add(size)
            .filter(|end| *end <= self.region.len())
            .ok_or(AllocError::OutOfMemory {
                requested: size,
                available: self.region.len() - self.top,
            })?;

        self.frames.push(Frame {
            previous_top: self.top,
            adjustment: start - self.top,
            start,
        });
        self.top = new_top;

        Ok(self.region.at(start))
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> AllocResult<()> {
        let offset = self.region.offset_of(ptr).ok_or(AllocError::ForeignPointer)?;

        match self.frames.last() {
            Some(frame) if frame.start == offset => {
                self.top = frame.previous_top;
                self.frames.pop();
                Ok(())
            }
            _ if self.frames.iter().any(|f| f.start == offset) => Err(AllocError::OutOfOrderFree),
            _ if offset >= self.top => Err(AllocError::DoubleFree),
            _ => Err(AllocError::ForeignPointer),
        }
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.top = 0;
    }

    fn allocated_size(&self) -> usize {
        self.top
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

/// Marker for stack position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackMarker {
    offset: usize,
    adjustment: usize,
    depth: usize,
}

impl StackMarker {
    /// Stack top when the marker was taken
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Alignment padding of the allocation just below the marker
    pub fn adjustment(&self) -> usize {
        self.adjustment
    }
}

/// Scoped stack allocator guard
pub struct StackScope<'a> {
    stack: &'a mut StackAllocator,
    marker: StackMarker,
}

impl StackScope<'_> {
    /// The marker this scope rolls back to
    pub fn marker(&self) -> StackMarker {
        self.marker
    }
}

impl Deref for StackScope<'_> {
    type Target = StackAllocator;

    fn deref(&self) -> &StackAllocator {
        self.stack
    }
}

impl DerefMut for StackScope<'_> {
    fn deref_mut(&mut self) -> &mut StackAllocator {
        self.stack
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.stack.free_to_marker(self.marker) {
            log::debug!("Stack scope already rolled back past its marker: {}", e);
        }
    }
}
