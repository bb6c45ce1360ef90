//! Backing memory for the fixed-capacity allocators

use std::alloc::{self, Layout};
use core::ptr::NonNull;

use crate::{effective_alignment, AllocError, AllocResult};

/// Alignment of regions the allocators reserve for themselves
pub const REGION_ALIGNMENT: usize = 16;

/// A contiguous byte buffer.
///
/// Either owned (reserved from the global allocator at construction and
/// released exactly once on drop) or external (the caller keeps ownership
/// and the region never releases it).
pub struct Region {
    base: NonNull<u8>,
    len: usize,
    /// Layout to release with, `None` for external memory
    owned: Option<Layout>,
}

// Safety: Region is a unique handle to its buffer; nothing else aliases it
// through the region itself.
unsafe impl Send for Region {}

impl Region {
    /// Reserve a zeroed region of `len` bytes
    pub fn new(len: usize) -> AllocResult<Self> {
        Self::with_alignment(len, REGION_ALIGNMENT)
    }

    /// Reserve a zeroed region of `len` bytes with the base aligned to `align`
    pub fn with_alignment(len: usize, align: usize) -> AllocResult<Self> {
        if len == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align = effective_alignment(align)?;
        // A valid alignment leaves only a size past isize::MAX
        let layout = Layout::from_size_align(len, align)
            .map_err(|_| AllocError::SystemOutOfMemory { size: len, align })?;

        // Safety: layout has a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(AllocError::SystemOutOfMemory { size: len, align })?;

        log::trace!("Reserved region of {} bytes at {:p}", len, base);

        Ok(Self {
            base,
            len,
            owned: Some(layout),
        })
    }

    /// Wrap caller-owned memory.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `len` bytes for the
    /// whole lifetime of the region, and nothing else may access that
    /// memory while the region is alive.
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> AllocResult<Self> {
        if len == 0 {
            return Err(AllocError::ZeroSize);
        }
        Ok(Self {
            base,
            len,
            owned: None,
        })
    }

    /// Start of the buffer
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: empty regions cannot be constructed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the region releases its memory on drop
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    /// Byte offset of `ptr` from the base, if it lies inside the region
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        (addr >= base && addr < base + self.len).then(|| addr - base)
    }

    /// Pointer at `offset` bytes from the base
    ///
    /// `offset` must be at most `len`.
    #[inline]
    pub fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.len);
        // Safety: offset stays within (or one past) the region, and base is non-null
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Some(layout) = self.owned {
            log::trace!("Releasing region of {} bytes at {:p}", self.len, self.base);
            // Safety: base was returned by alloc_zeroed with this exact layout
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}

impl core::fmt::Debug for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("owned", &self.is_owned())
            .finish()
    }
}
