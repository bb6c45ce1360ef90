//! Typed ownership over allocator-provided storage

use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crate::kind::{AllocatorKind, BoundKind, DefaultKind};
use crate::manager::MemoryManager;
use crate::{AllocError, AllocResult};

/// Releases reserved storage unless disarmed.
///
/// Covers a failed or panicking constructor, and a panicking destructor.
struct StorageGuard<'m> {
    manager: &'m MemoryManager,
    kind: AllocatorKind,
    ptr: NonNull<u8>,
    armed: bool,
}

impl StorageGuard<'_> {
    fn disarm(mut self) -> NonNull<u8> {
        self.armed = false;
        self.ptr
    }
}

impl Drop for StorageGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.manager.release_pinned(self.kind, self.ptr) {
                log::error!("Failed to release {} storage at {:p}: {}", self.kind, self.ptr, e);
            }
        }
    }
}

/// A value constructed in storage from the allocator bound to `K`.
///
/// Exactly one wrapper owns the value. Releasing it (by [`reset`], by
/// assignment over it, or by drop) first drops the value, then returns the
/// storage to the allocator. The value's destructor runs outside the
/// registry lock, so it may itself release other wrappers.
///
/// While any wrapper is live, the manager refuses operations that would
/// pull its storage out from under it (reset, replacement, shutdown).
///
/// [`reset`]: AllocatedPtr::reset
///
/// ```rust
/// use rift_memory::kind::PoolKind;
/// use rift_memory::{AllocatedPtr, MemoryManager};
///
/// let manager = MemoryManager::default();
/// manager.initialize().unwrap();
///
/// let mut hp: AllocatedPtr<'_, u32, PoolKind> = AllocatedPtr::new(&manager, 100).unwrap();
/// *hp.get_mut().unwrap() -= 30;
/// assert_eq!(hp.get(), Some(&70));
/// ```
pub struct AllocatedPtr<'m, T, K: BoundKind = DefaultKind> {
    manager: &'m MemoryManager,
    ptr: Option<NonNull<T>>,
    _owns: PhantomData<T>,
    _kind: PhantomData<fn() -> K>,
}

// Safety: the wrapper uniquely owns its T; the manager is Sync
unsafe impl<T: Send, K: BoundKind> Send for AllocatedPtr<'_, T, K> {}
unsafe impl<T: Sync, K: BoundKind> Sync for AllocatedPtr<'_, T, K> {}

impl<'m, T, K: BoundKind> AllocatedPtr<'m, T, K> {
    /// Bytes requested for one `T`; zero-sized types still take one byte
    const SIZE: usize = if core::mem::size_of::<T>() == 0 { 1 } else { core::mem::size_of::<T>() };

    /// An empty wrapper
    pub fn empty(manager: &'m MemoryManager) -> Self {
        Self::holding(manager, None)
    }

    fn holding(manager: &'m MemoryManager, ptr: Option<NonNull<T>>) -> Self {
        Self {
            manager,
            ptr,
            _owns: PhantomData,
            _kind: PhantomData,
        }
    }

    /// Move `value` into storage from `K`'s allocator
    pub fn new(manager: &'m MemoryManager, value: T) -> AllocResult<Self> {
        let guard = Self::reserve(manager)?;
        let ptr = guard.disarm().cast::<T>();
        // Safety: fresh storage, sized and aligned for T
        unsafe { ptr.as_ptr().write(value) };

        Ok(Self::holding(manager, Some(ptr)))
    }

    /// Reserve storage, then build the value in it.
    ///
    /// If `init` fails (or panics) the storage is released before the error
    /// propagates.
    pub fn try_new_with<E, F>(manager: &'m MemoryManager, init: F) -> Result<Self, E>
    where
        E: From<AllocError>,
        F: FnOnce() -> Result<T, E>,
    {
        let guard = Self::reserve(manager)?;
        let value = init()?;
        let ptr = guard.disarm().cast::<T>();
        // Safety: fresh storage, sized and aligned for T
        unsafe { ptr.as_ptr().write(value) };

        Ok(Self::holding(manager, Some(ptr)))
    }

    fn reserve(manager: &'m MemoryManager) -> AllocResult<StorageGuard<'m>> {
        let ptr = manager.acquire_pinned(K::KIND, Self::SIZE, core::mem::align_of::<T>())?;
        Ok(StorageGuard {
            manager,
            kind: K::KIND,
            ptr,
            armed: true,
        })
    }

    /// Drop the held value (if any) and return its storage
    pub fn reset(&mut self) -> AllocResult<()> {
        match self.ptr.take() {
            Some(ptr) => self.release(ptr),
            None => Ok(()),
        }
    }

    /// Release the held value, then construct `value` in fresh storage
    pub fn reset_with(&mut self, value: T) -> AllocResult<()> {
        self.reset()?;
        let guard = Self::reserve(self.manager)?;
        let ptr = guard.disarm().cast::<T>();
        // Safety: fresh storage, sized and aligned for T
        unsafe { ptr.as_ptr().write(value) };
        self.ptr = Some(ptr);
        Ok(())
    }

    fn release(&self, ptr: NonNull<T>) -> AllocResult<()> {
        let guard = StorageGuard {
            manager: self.manager,
            kind: K::KIND,
            ptr: ptr.cast(),
            armed: true,
        };
        // Safety: ptr holds a live T that nothing else owns
        unsafe { ptr::drop_in_place(ptr.as_ptr()) };

        let storage = guard.disarm();
        self.manager.release_pinned(K::KIND, storage)
    }

    /// Move ownership out, leaving this wrapper empty
    pub fn take(&mut self) -> Self {
        Self::holding(self.manager, self.ptr.take())
    }

    /// Shared access to the value
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // Safety: a held pointer always refers to a live T owned by self
        self.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    /// Exclusive access to the value
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // Safety: a held pointer always refers to a live T owned by self
        self.ptr.map(|p| unsafe { &mut *p.as_ptr() })
    }

    /// Raw address of the value
    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Check if a value is held
    #[inline]
    pub fn is_some(&self) -> bool {
        self.ptr.is_some()
    }

    /// Check if the wrapper is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// The kind storage is taken from
    #[inline]
    pub const fn kind(&self) -> AllocatorKind {
        K::KIND
    }
}

impl<T, K: BoundKind> Drop for AllocatedPtr<'_, T, K> {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            log::error!("Failed to release {} value: {}", K::KIND, e);
        }
    }
}

impl<T: fmt::Debug, K: BoundKind> fmt::Debug for AllocatedPtr<'_, T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatedPtr")
            .field("kind", &K::KIND)
            .field("value", &self.get())
            .finish()
    }
}
