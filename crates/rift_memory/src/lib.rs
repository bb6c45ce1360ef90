//! # rift_memory - Custom Memory Allocators
//!
//! Fixed-capacity allocators for game engine use cases, plus a registry that
//! routes requests to them by kind:
//! - Linear: bump allocation, bulk reset only
//! - Pool: fixed-size blocks with an index free list
//! - Stack: LIFO allocation with markers
//! - System: the global allocator, used for [`AllocatorKind::Default`]
//!
//! [`MemoryManager`] owns one allocator per kind and serializes every call
//! through a single lock. [`AllocatedPtr`] ties a constructed value to the
//! storage it was placed in, releasing both together.
//!
//! The strategies themselves are not synchronized; share them through the
//! manager or keep one per thread.

pub mod allocated;
pub mod config;
pub mod error;
pub mod kind;
pub mod linear;
pub mod manager;
pub mod pool;
pub mod region;
pub mod stack;
pub mod system;

use core::any::Any;
use core::ptr::NonNull;

pub use allocated::AllocatedPtr;
pub use config::MemoryConfig;
pub use error::{AllocError, AllocResult, ConfigError};
pub use kind::{AllocatorKind, BoundKind};
pub use linear::{LinearAllocator, LinearScope};
pub use manager::{MemoryManager, MemoryStats};
pub use pool::{PoolAllocator, PoolStats};
pub use region::Region;
pub use stack::{StackAllocator, StackMarker, StackScope};
pub use system::SystemAllocator;

/// Alignment used when a caller passes `0`: the platform word size.
pub const DEFAULT_ALIGNMENT: usize = core::mem::align_of::<usize>();

/// Common trait for all allocators
///
/// Every strategy hands out raw byte ranges and never looks inside them.
/// Implementations must validate pointers passed to [`Allocator::free`]
/// and report misuse as an error instead of corrupting their bookkeeping.
pub trait Allocator: Send + Any {
    /// Reserve `size` bytes aligned to `align` (`0` selects [`DEFAULT_ALIGNMENT`]).
    fn allocate(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>>;

    /// Return a pointer previously handed out by [`Allocator::allocate`].
    ///
    /// # Safety
    /// Nothing may access the memory behind `ptr` after this call, including
    /// an `AllocatedPtr` that still owns it.
    unsafe fn free(&mut self, ptr: NonNull<u8>) -> AllocResult<()>;

    /// Release every allocation at once.
    ///
    /// All pointers handed out before the reset become dangling.
    fn reset(&mut self);

    /// Bytes currently in use, including alignment padding.
    fn allocated_size(&self) -> usize;

    /// Total capacity in bytes.
    fn total_size(&self) -> usize;

    /// Bytes still available
    fn available(&self) -> usize {
        self.total_size() - self.allocated_size()
    }

    /// Upcast for typed access through the registry
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access through the registry
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Resolve a requested alignment: `0` maps to [`DEFAULT_ALIGNMENT`],
/// anything else must be a power of two.
#[inline]
pub fn effective_alignment(align: usize) -> AllocResult<usize> {
    match align {
        0 => Ok(DEFAULT_ALIGNMENT),
        a if a.is_power_of_two() => Ok(a),
        a => Err(AllocError::InvalidAlignment(a)),
    }
}

/// Align a value up to the given alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if a pointer is aligned
#[inline]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    (ptr as usize) & (align - 1) == 0
}

pub mod prelude {
    pub use crate::{
        AllocatedPtr, Allocator, AllocatorKind, AllocError, AllocResult, LinearAllocator,
        MemoryConfig, MemoryManager, MemoryStats, PoolAllocator, StackAllocator, StackMarker,
        SystemAllocator,
    };
    pub use crate::{align_down, align_up, effective_alignment, is_aligned};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_down(15, 8), 8);
        assert!(is_aligned(64 as *const u8, 64));
        assert!(!is_aligned(65 as *const u8, 2));
    }

    #[test]
    fn test_effective_alignment() {
        assert_eq!(effective_alignment(0).unwrap(), DEFAULT_ALIGNMENT);
        assert_eq!(effective_alignment(32).unwrap(), 32);
        assert_eq!(effective_alignment(24), Err(AllocError::InvalidAlignment(24)));
    }
}
