//! Memory manager - the allocator registry
//!
//! Owns one allocator per kind and routes every request to it. All calls
//! serialize on one (non-reentrant) lock; allocators must never call back
//! into the manager.

use std::collections::{BTreeMap, HashMap};
use core::ptr::NonNull;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MemoryConfig;
use crate::kind::AllocatorKind;
use crate::{
    AllocError, AllocResult, Allocator, LinearAllocator, PoolAllocator, StackAllocator,
    SystemAllocator,
};

/// Registered allocator with metadata
struct Entry {
    allocator: Box<dyn Allocator>,
    /// Registration order (for ordered shutdown)
    order: usize,
}

struct ManagerState {
    entries: HashMap<AllocatorKind, Entry>,
    /// Backs `AllocatorKind::Default`, outside the registry table
    system: SystemAllocator,
    /// Live `AllocatedPtr`s per kind
    pinned: HashMap<AllocatorKind, usize>,
    next_order: usize,
    initialized: bool,
}

impl ManagerState {
    fn allocator_mut(&mut self, kind: AllocatorKind) -> AllocResult<&mut (dyn Allocator + 'static)> {
        if kind.is_default() {
            return Ok(&mut self.system);
        }
        match self.entries.get_mut(&kind) {
            Some(entry) => Ok(entry.allocator.as_mut()),
            None => Err(AllocError::UnknownKind(kind)),
        }
    }

    fn allocator(&self, kind: AllocatorKind) -> AllocResult<&(dyn Allocator + 'static)> {
        if kind.is_default() {
            return Ok(&self.system);
        }
        match self.entries.get(&kind) {
            Some(entry) => Ok(entry.allocator.as_ref()),
            None => Err(AllocError::UnknownKind(kind)),
        }
    }

    fn ensure_unpinned(&self, kind: AllocatorKind) -> AllocResult<()> {
        match self.pinned.get(&kind).copied().unwrap_or(0) {
            0 => Ok(()),
            live => Err(AllocError::AllocatorInUse { kind, live }),
        }
    }

    /// Remove every registered allocator, newest first
    fn drain_ordered(&mut self) -> Vec<(AllocatorKind, Box<dyn Allocator>)> {
        let mut drained: Vec<_> = self
            .entries
            .drain()
            .map(|(kind, entry)| (entry.order, kind, entry.allocator))
            .collect();
        drained.sort_by(|a, b| b.0.cmp(&a.0));
        drained.into_iter().map(|(_, kind, allocator)| (kind, allocator)).collect()
    }
}

/// Memory usage snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Bytes in use across all allocators
    pub total_allocated: usize,
    /// Capacity reserved across all allocators
    pub total_reserved: usize,
    /// Bytes in use per kind
    pub per_kind: BTreeMap<AllocatorKind, usize>,
}

/// Memory manager - allocator registry and dispatch surface
///
/// Construct one explicitly and share it by reference; it is `Sync`.
///
/// ```rust
/// use rift_memory::{AllocatorKind, MemoryManager};
///
/// let manager = MemoryManager::default();
/// manager.initialize().unwrap();
///
/// let ptr = manager.allocate(AllocatorKind::Pool, 48, 0).unwrap();
/// unsafe { manager.free(AllocatorKind::Pool, ptr).unwrap() };
/// ```
pub struct MemoryManager {
    config: MemoryConfig,
    state: Mutex<ManagerState>,
}

impl MemoryManager {
    /// Create a manager with no builtin allocators yet
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState {
                entries: HashMap::new(),
                system: SystemAllocator::new(),
                pinned: HashMap::new(),
                next_order: 0,
                initialized: false,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Build the builtin Linear, Pool and Stack allocators from the config.
    ///
    /// Kinds that already have a registered allocator keep it. Nothing is
    /// registered unless every builtin could be built.
    pub fn initialize(&self) -> AllocResult<()> {
        let mut state = self.state.lock();
        if state.initialized {
            return Err(AllocError::AlreadyInitialized);
        }

        let mut built = Vec::with_capacity(AllocatorKind::BUILTIN.len());
        for kind in AllocatorKind::BUILTIN {
            if state.entries.contains_key(&kind) {
                log::debug!("Keeping registered {} allocator", kind);
                continue;
            }
            built.push((kind, self.build_builtin(kind)?));
        }

        for (kind, allocator) in built {
            let order = state.next_order;
            state.next_order += 1;
            state.entries.insert(kind, Entry { allocator, order });
        }
        state.initialized = true;

        log::info!(
            "Memory manager initialized: linear {} bytes, pool {}x{} bytes, stack {} bytes",
            self.config.linear_capacity,
            self.config.pool_block_count,
            self.config.pool_block_size,
            self.config.stack_capacity
        );
        Ok(())
    }

    fn build_builtin(&self, kind: AllocatorKind) -> AllocResult<Box<dyn Allocator>> {
        Ok(match kind {
            AllocatorKind::Linear => Box::new(LinearAllocator::new(self.config.linear_capacity)?),
            AllocatorKind::Pool => Box::new(PoolAllocator::new(
                self.config.pool_block_size,
                self.config.pool_block_count,
            )?),
            AllocatorKind::Stack => Box::new(StackAllocator::new(self.config.stack_capacity)?),
            other => return Err(AllocError::UnknownKind(other)),
        })
    }

    /// Destroy every registered allocator in reverse registration order.
    ///
    /// Fails, leaving everything in place, while any `AllocatedPtr` still
    /// holds storage from a registered allocator.
    pub fn shutdown(&self) -> AllocResult<()> {
        let drained = {
            let mut state = self.state.lock();
            let kinds: Vec<_> = state.entries.keys().copied().collect();
            for kind in kinds {
                state.ensure_unpinned(kind)?;
            }
            state.initialized = false;
            state.drain_ordered()
        };

        let count = drained.len();
        for (kind, allocator) in drained {
            log::debug!(
                "Destroying {} allocator ({} of {} bytes in use)",
                kind,
                allocator.allocated_size(),
                allocator.total_size()
            );
            drop(allocator);
        }

        log::info!("Memory manager shut down, released {} allocator(s)", count);
        Ok(())
    }

    /// Check if `initialize` has run since the last `shutdown`
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Allocate memory using a specific allocator
    pub fn allocate(&self, kind: AllocatorKind, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        let mut state = self.state.lock();
        state.allocator_mut(kind)?.allocate(size, align)
    }

    /// Free memory allocated with a specific allocator
    ///
    /// # Safety
    /// Nothing may access the memory behind `ptr` after this call. Storage
    /// owned by an `AllocatedPtr` is released by the wrapper, never here.
    pub unsafe fn free(&self, kind: AllocatorKind, ptr: NonNull<u8>) -> AllocResult<()> {
        let result = {
            let mut state = self.state.lock();
            state.allocator_mut(kind)?.free(ptr)
        };

        if let Err(e) = &result {
            if e.is_contract_violation() {
                log::warn!("Rejected free of {:p} on {} allocator: {}", ptr, kind, e);
            }
        }
        result
    }

    /// Release every allocation of one kind
    pub fn reset(&self, kind: AllocatorKind) -> AllocResult<()> {
        let mut state = self.state.lock();
        state.ensure_unpinned(kind)?;
        state.allocator_mut(kind)?.reset();
        Ok(())
    }

    /// Register a custom allocator, replacing and destroying any previous
    /// allocator for the kind
    pub fn register_allocator(
        &self,
        kind: AllocatorKind,
        allocator: Box<dyn Allocator>,
    ) -> AllocResult<()> {
        if kind.is_default() {
            return Err(AllocError::ReservedKind(kind));
        }

        let replaced = {
            let mut state = self.state.lock();
            state.ensure_unpinned(kind)?;
            let order = state.next_order;
            state.next_order += 1;
            state.entries.insert(kind, Entry { allocator, order })
        };

        match replaced {
            Some(previous) => {
                log::debug!("Replaced {} allocator ({} bytes)", kind, previous.allocator.total_size());
                drop(previous);
            }
            None => log::debug!("Registered {} allocator", kind),
        }
        Ok(())
    }

    /// Read-only access to the allocator behind a kind.
    ///
    /// The closure runs under the registry lock and must not call back into
    /// the manager.
    pub fn inspect<R>(&self, kind: AllocatorKind, f: impl FnOnce(&dyn Allocator) -> R) -> AllocResult<R> {
        let state = self.state.lock();
        Ok(f(state.allocator(kind)?))
    }

    /// Typed mutable access to the allocator behind a kind, e.g. to take a
    /// stack marker.
    ///
    /// Refused while any `AllocatedPtr` holds storage from the allocator.
    /// The closure runs under the registry lock and must not call back into
    /// the manager.
    pub fn with_allocator<A: Allocator, R>(
        &self,
        kind: AllocatorKind,
        f: impl FnOnce(&mut A) -> R,
    ) -> AllocResult<R> {
        let mut state = self.state.lock();
        state.ensure_unpinned(kind)?;
        let allocator = state
            .allocator_mut(kind)?
            .as_any_mut()
            .downcast_mut::<A>()
            .ok_or(AllocError::TypeMismatch {
                kind,
                expected: core::any::type_name::<A>(),
            })?;
        Ok(f(allocator))
    }

    /// Registered kinds, `Default` included
    pub fn kinds(&self) -> Vec<AllocatorKind> {
        let state = self.state.lock();
        let mut kinds: Vec<_> = state.entries.keys().copied().collect();
        kinds.push(AllocatorKind::Default);
        kinds.sort();
        kinds
    }

    /// Get memory usage statistics
    pub fn memory_stats(&self) -> MemoryStats {
        let state = self.state.lock();

        let mut stats = MemoryStats::default();
        let mut record = |kind: AllocatorKind, allocator: &dyn Allocator| {
            let used = allocator.allocated_size();
            stats.total_allocated += used;
            stats.total_reserved += allocator.total_size();
            stats.per_kind.insert(kind, used);
        };

        record(AllocatorKind::Default, &state.system);
        for (kind, entry) in &state.entries {
            record(*kind, entry.allocator.as_ref());
        }
        stats
    }

    /// Allocate storage for a typed wrapper and pin the kind
    pub(crate) fn acquire_pinned(
        &self,
        kind: AllocatorKind,
        size: usize,
        align: usize,
    ) -> AllocResult<NonNull<u8>> {
        let mut state = self.state.lock();
        let ptr = state.allocator_mut(kind)?.allocate(size, align)?;
        *state.pinned.entry(kind).or_insert(0) += 1;
        Ok(ptr)
    }

    /// Return a typed wrapper's storage and unpin the kind
    pub(crate) fn release_pinned(&self, kind: AllocatorKind, ptr: NonNull<u8>) -> AllocResult<()> {
        let mut state = self.state.lock();
        if let Some(live) = state.pinned.get_mut(&kind) {
            *live = live.saturating_sub(1);
        }
        // Safety: the wrapper has already dropped its value and forgets ptr
        unsafe { state.allocator_mut(kind)?.free(ptr) }
    }

    /// Live typed wrappers for a kind
    pub fn pinned_count(&self, kind: AllocatorKind) -> usize {
        self.state.lock().pinned.get(&kind).copied().unwrap_or(0)
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (kind, allocator) in state.drain_ordered() {
            log::trace!("Dropping {} allocator", kind);
            drop(allocator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> MemoryConfig {
        MemoryConfig {
            linear_capacity: 1024,
            pool_block_size: 64,
            pool_block_count: 4,
            stack_capacity: 256,
        }
    }

    #[test]
    fn test_initialize_twice() {
        let manager = MemoryManager::new(small_config());
        manager.initialize().unwrap();
        assert_eq!(manager.initialize(), Err(AllocError::AlreadyInitialized));

        manager.shutdown().unwrap();
        assert!(!manager.is_initialized());
        manager.initialize().unwrap();
    }

    #[test]
    fn test_failed_initialize_registers_nothing() {
        let manager = MemoryManager::new(MemoryConfig {
            pool_block_count: 0,
            ..small_config()
        });

        assert_eq!(manager.initialize(), Err(AllocError::ZeroSize));
        assert!(!manager.is_initialized());
        assert_eq!(manager.kinds(), vec![AllocatorKind::Default]);
        assert_eq!(manager.memory_stats().total_reserved, 0);
    }

    #[test]
    fn test_dispatch_by_kind() {
        let manager = MemoryManager::new(small_config());
        manager.initialize().unwrap();

        manager.allocate(AllocatorKind::Linear, 100, 0).unwrap();
        let block = manager.allocate(AllocatorKind::Pool, 10, 0).unwrap();
        manager.allocate(AllocatorKind::Stack, 32, 0).unwrap();

        let stats = manager.memory_stats();
        assert_eq!(stats.per_kind[&AllocatorKind::Linear], 100);
        assert_eq!(stats.per_kind[&AllocatorKind::Pool], 64);
        assert_eq!(stats.per_kind[&AllocatorKind::Stack], 32);
        assert_eq!(stats.total_reserved, 1024 + 256 + 256);

        unsafe { manager.free(AllocatorKind::Pool, block).unwrap() };
        assert_eq!(manager.memory_stats().per_kind[&AllocatorKind::Pool], 0);
    }

    #[test]
    fn test_default_kind_without_initialize() {
        let manager = MemoryManager::default();

        let p = manager.allocate(AllocatorKind::Default, 40, 0).unwrap();
        assert_eq!(manager.memory_stats().per_kind[&AllocatorKind::Default], 40);
        unsafe { manager.free(AllocatorKind::Default, p).unwrap() };

        assert_eq!(
            manager.allocate(AllocatorKind::Pool, 8, 0).unwrap_err(),
            AllocError::UnknownKind(AllocatorKind::Pool)
        );
    }

    #[test]
    fn test_default_kind_is_reserved() {
        let manager = MemoryManager::default();
        let err = manager
            .register_allocator(AllocatorKind::Default, Box::new(SystemAllocator::new()))
            .unwrap_err();
        assert_eq!(err, AllocError::ReservedKind(AllocatorKind::Default));
    }

    #[test]
    fn test_custom_kind() {
        let manager = MemoryManager::default();
        let kind = AllocatorKind::Custom(7);
        manager
            .register_allocator(kind, Box::new(LinearAllocator::new(128).unwrap()))
            .unwrap();

        manager.allocate(kind, 16, 0).unwrap();
        assert_eq!(manager.memory_stats().per_kind[&kind], 16);
        assert!(manager.kinds().contains(&kind));
    }

    #[test]
    fn test_registered_before_initialize_is_kept() {
        let manager = MemoryManager::new(small_config());
        manager
            .register_allocator(AllocatorKind::Stack, Box::new(StackAllocator::new(64).unwrap()))
            .unwrap();
        manager.initialize().unwrap();

        let total = manager.inspect(AllocatorKind::Stack, |a| a.total_size()).unwrap();
        assert_eq!(total, 64);
    }

    #[test]
    fn test_with_allocator_typed() {
        let manager = MemoryManager::new(small_config());
        manager.initialize().unwrap();

        let marker = manager
            .with_allocator(AllocatorKind::Stack, |s: &mut StackAllocator| s.marker())
            .unwrap();
        manager.allocate(AllocatorKind::Stack, 100, 0).unwrap();
        manager
            .with_allocator(AllocatorKind::Stack, |s: &mut StackAllocator| s.free_to_marker(marker))
            .unwrap()
            .unwrap();
        assert_eq!(manager.memory_stats().per_kind[&AllocatorKind::Stack], 0);

        let err = manager
            .with_allocator(AllocatorKind::Stack, |_: &mut PoolAllocator| ())
            .unwrap_err();
        assert!(matches!(err, AllocError::TypeMismatch { kind: AllocatorKind::Stack, .. }));
    }

    #[test]
    fn test_reset_kind() {
        let manager = MemoryManager::new(small_config());
        manager.initialize().unwrap();

        manager.allocate(AllocatorKind::Linear, 1000, 0).unwrap();
        assert!(manager.allocate(AllocatorKind::Linear, 100, 0).is_err());

        manager.reset(AllocatorKind::Linear).unwrap();
        assert!(manager.allocate(AllocatorKind::Linear, 100, 0).is_ok());
    }

    #[test]
    fn test_bad_free_is_reported() {
        let manager = MemoryManager::new(small_config());
        manager.initialize().unwrap();

        let p = manager.allocate(AllocatorKind::Pool, 8, 0).unwrap();
        unsafe {
            manager.free(AllocatorKind::Pool, p).unwrap();
            assert_eq!(manager.free(AllocatorKind::Pool, p), Err(AllocError::DoubleFree));
        }
    }

    #[test]
    fn test_stats_sum() {
        let manager = MemoryManager::new(small_config());
        manager.initialize().unwrap();
        manager.allocate(AllocatorKind::Stack, 24, 0).unwrap();
        manager.allocate(AllocatorKind::Default, 24, 0).unwrap();

        let stats = manager.memory_stats();
        let sum: usize = stats.per_kind.values().sum();
        assert_eq!(stats.total_allocated, sum);
        assert_eq!(stats.total_allocated, 48);
    }
}
