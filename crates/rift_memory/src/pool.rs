//! Pool allocator - fixed-size block allocation

use core::any::Any;
use core::ptr::NonNull;

use crate::region::{Region, REGION_ALIGNMENT};
use crate::{align_up, effective_alignment, AllocError, AllocResult, Allocator, DEFAULT_ALIGNMENT};

/// Pool allocator for fixed-size blocks
///
/// Extremely fast for allocating objects of the same size. Every request
/// receives one whole block. The free list is a stack of block indices kept
/// outside the blocks themselves; frees are checked against an occupancy
/// table.
pub struct PoolAllocator {
    region: Region,
    /// Block size (a multiple of the word size)
    block_size: usize,
    /// Number of blocks
    block_count: usize,
    /// Largest alignment every block satisfies
    block_align: usize,
    /// Indices of free blocks, next allocation at the top
    free_list: Vec<u32>,
    /// Which blocks are handed out
    occupied: Vec<bool>,
}

impl PoolAllocator {
    /// Create a pool of `block_count` blocks of `block_size` bytes.
    ///
    /// `block_size` is rounded up to a multiple of the word size, and
    /// requests are served up to the rounded size ([`block_size`]).
    ///
    /// [`block_size`]: PoolAllocator::block_size
    pub fn new(block_size: usize, block_count: usize) -> AllocResult<Self> {
        Self::with_alignment(block_size, DEFAULT_ALIGNMENT, block_count)
    }

    /// Create a pool whose blocks are all aligned to at least `block_align`
    pub fn with_alignment(
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> AllocResult<Self> {
        let block_align = effective_alignment(block_align)?.max(DEFAULT_ALIGNMENT);
        let block_size = Self::normalize_block_size(block_size)?;
        let block_size = align_up(block_size, block_align);
        let len = block_size
            .checked_mul(block_count)
            .ok_or(AllocError::SystemOutOfMemory { size: usize::MAX, align: block_align })?;

        let region = Region::with_alignment(len, block_align.max(REGION_ALIGNMENT))?;
        Self::from_region(region, block_size)
    }

    /// Create a pool for a specific type
    pub fn for_type<T>(count: usize) -> AllocResult<Self> {
        Self::with_alignment(
            core::mem::size_of::<T>().max(1),
            core::mem::align_of::<T>(),
            count,
        )
    }

    /// Carve an existing region into blocks of `block_size` bytes.
    ///
    /// `block_size` is rounded up to a multiple of the word size, as in
    /// [`PoolAllocator::new`]. Trailing bytes that do not fill a whole block are left unused.
    pub fn from_region(region: Region, block_size: usize) -> AllocResult<Self> {
        let block_size = Self::normalize_block_size(block_size)?;
        let block_count = region.len() / block_size;
        if block_count == 0 {
            return Err(AllocError::OutOfMemory {
                requested: block_size,
                available: region.len(),
            });
        }
        if block_count > u32::MAX as usize {
            return Err(AllocError::OutOfMemory {
                requested: block_count,
                available: u32::MAX as usize,
            });
        }

        let base = region.base().as_ptr() as usize;
        let block_align = lowest_bit(base).min(lowest_bit(block_size));

        let mut pool = Self {
            region,
            block_size,
            block_count,
            block_align,
            free_list: Vec::with_capacity(block_count),
            occupied: vec![false; block_count],
        };
        pool.initialize_free_list();

        log::debug!(
            "Created pool allocator: {} blocks of {} bytes (aligned to {})",
            block_count,
            block_size,
            block_align
        );
        Ok(pool)
    }

    fn normalize_block_size(block_size: usize) -> AllocResult<usize> {
        if block_size == 0 {
            return Err(AllocError::ZeroSize);
        }
        Ok(align_up(block_size, DEFAULT_ALIGNMENT))
    }

    fn initialize_free_list(&mut self) {
        self.free_list.clear();
        // Build from end to start so allocation returns from start
        self.free_list.extend((0..self.block_count as u32).rev());
        self.occupied.iter_mut().for_each(|slot| *slot = false);
    }

    /// Allocate a block
    pub fn alloc_block(&mut self) -> Option<NonNull<u8>> {
        let index = self.free_list.pop()? as usize;
        self.occupied[index] = true;
        Some(self.region.at(index * self.block_size))
    }

    /// Free a block, checking that it was handed out by this pool
    ///
    /// # Safety
    /// The block must not be accessed after it is freed
    pub unsafe fn free_block(&mut self, ptr: NonNull<u8>) -> AllocResult<()> {
        let index = self.block_index(ptr).ok_or(AllocError::ForeignPointer)?;
        if !self.occupied[index] {
            return Err(AllocError::DoubleFree);
        }

        self.occupied[index] = false;
        self.free_list.push(index as u32);
        Ok(())
    }

    /// Index of the block starting at `ptr`
    pub fn block_index(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = self.region.offset_of(ptr)?;
        if offset % self.block_size != 0 {
            return None;
        }
        Some(offset / self.block_size).filter(|index| *index < self.block_count)
    }

    /// Get the block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Get the alignment every block satisfies
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    /// Get the total number of blocks
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Get the number of allocated blocks
    pub fn allocated_count(&self) -> usize {
        self.block_count - self.free_list.len()
    }

    /// Get the number of free blocks
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.block_size,
            total_blocks: self.block_count,
            allocated_blocks: self.allocated_count(),
            free_blocks: self.free_count(),
        }
    }
}

#[inline]
fn lowest_bit(value: usize) -> usize {
    if value == 0 {
        usize::MAX
    } else {
        value & value.wrapping_neg()
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align = effective_alignment(align)?;

        // Check that the requested allocation fits in a block
        if size > self.block_size {
            return Err(AllocError::BlockTooSmall {
                requested: size,
                block_size: self.block_size,
            });
        }
        if align > self.block_align {
            return Err(AllocError::AlignmentUnsupported {
                requested: align,
                supported: self.block_align,
            });
        }

        self.alloc_block().ok_or(AllocError::OutOfMemory {
            requested: self.block_size,
            available: 0,
        })
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> AllocResult<()> {
        self.free_block(ptr)
    }

    fn reset(&mut self) {
        self.initialize_free_list();
    }

    fn allocated_size(&self) -> usize {
        self.allocated_count() * self.block_size
    }

    fn total_size(&self) -> usize {
        self.block_count * self.block_size
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl core::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("region", &self.region)
            .field("block_align", &self.block_align)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pool statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub block_size: usize,
    pub total_blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_aligned;

    #[test]
    fn test_pool_scenario() {
        let mut pool = PoolAllocator::new(64, 4).unwrap();

        let blocks: Vec<_> = (0..4).map(|_| pool.allocate(64, 0).unwrap()).collect();
        for (i, a) in blocks.iter().enumerate() {
            assert!(is_aligned(a.as_ptr(), 16));
            for b in &blocks[i + 1..] {
                assert_ne!(a, b);
            }
        }

        assert!(matches!(pool.allocate(64, 0), Err(AllocError::OutOfMemory { .. })));

        unsafe { pool.free(blocks[0]).unwrap() };
        assert_eq!(pool.allocate(64, 0).unwrap(), blocks[0]);
    }

    #[test]
    fn test_pool_accounting() {
        let mut pool = PoolAllocator::new(32, 8).unwrap();

        let a = pool.allocate(1, 0).unwrap();
        let _b = pool.allocate(32, 0).unwrap();

        // Small requests still take a whole block
        assert_eq!(pool.allocated_size(), 64);
        assert_eq!(pool.allocated_size() + pool.free_count() * pool.block_size(), pool.total_size());

        unsafe { pool.free(a).unwrap() };
        assert_eq!(pool.allocated_count(), 1);
        assert_eq!(pool.stats().free_blocks, 7);
    }

    #[test]
    fn test_pool_rejects_oversized() {
        let mut pool = PoolAllocator::new(16, 2).unwrap();
        assert_eq!(
            pool.allocate(17, 0).unwrap_err(),
            AllocError::BlockTooSmall { requested: 17, block_size: 16 }
        );
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_pool_block_size_rounds_to_word() {
        let mut pool = PoolAllocator::new(20, 4).unwrap();
        let word = crate::DEFAULT_ALIGNMENT;
        let rounded = (20 + word - 1) / word * word;

        assert_eq!(pool.block_size(), rounded);
        assert_eq!(pool.total_size(), rounded * 4);
        assert!(pool.allocate(rounded, 0).is_ok());
        assert!(matches!(
            pool.allocate(rounded + 1, 0),
            Err(AllocError::BlockTooSmall { .. })
        ));
        assert_eq!(PoolAllocator::new(0, 4).unwrap_err(), AllocError::ZeroSize);
    }

    #[test]
    fn test_pool_alignment_limits() {
        let mut pool = PoolAllocator::with_alignment(64, 64, 2).unwrap();
        let p = pool.allocate(8, 64).unwrap();
        assert!(is_aligned(p.as_ptr(), 64));

        let mut small = PoolAllocator::new(24, 2).unwrap();
        assert!(matches!(
            small.allocate(8, 64),
            Err(AllocError::AlignmentUnsupported { .. })
        ));
    }

    #[test]
    fn test_pool_detects_bad_frees() {
        let mut pool = PoolAllocator::new(32, 2).unwrap();
        let a = pool.allocate(8, 0).unwrap();

        let mut outside = 0u64;
        let foreign = NonNull::from(&mut outside).cast::<u8>();
        let interior = unsafe { NonNull::new_unchecked(a.as_ptr().add(8)) };

        unsafe {
            assert_eq!(pool.free(foreign).unwrap_err(), AllocError::ForeignPointer);
            assert_eq!(pool.free(interior).unwrap_err(), AllocError::ForeignPointer);

            pool.free(a).unwrap();
            assert_eq!(pool.free(a).unwrap_err(), AllocError::DoubleFree);
        }
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_pool_reset() {
        let mut pool = PoolAllocator::new(16, 3).unwrap();
        for _ in 0..3 {
            pool.allocate(16, 0).unwrap();
        }
        pool.reset();
        assert_eq!(pool.allocated_size(), 0);
        assert!(pool.allocate(16, 0).is_ok());
    }

    #[test]
    fn test_pool_for_type() {
        let mut pool = PoolAllocator::for_type::<[u64; 3]>(10).unwrap();
        assert_eq!(pool.block_size(), 24);

        let p = pool.allocate(24, 8).unwrap().cast::<[u64; 3]>();
        unsafe {
            p.as_ptr().write([1, 2, 3]);
            assert_eq!(*p.as_ptr(), [1, 2, 3]);
        }
    }

    #[test]
    fn test_pool_external_region() {
        let mut buffer = vec![0u64; 16];
        let base = NonNull::new(buffer.as_mut_ptr() as *mut u8).unwrap();
        let region = unsafe { Region::from_raw(base, 128).unwrap() };
        let mut pool = PoolAllocator::from_region(region, 32).unwrap();

        assert_eq!(pool.block_count(), 4);
        assert_eq!(pool.allocate(32, 0).unwrap(), base);
        drop(pool);

        buffer[15] = 9;
        assert_eq!(buffer[15], 9);
    }
}
