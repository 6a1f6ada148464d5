//! Reuse lists for allocations the GPU may still be reading.
//!
//! A [`ReusableAllocationList`] holds released allocations in release order. Taking an
//! allocation out checks it against the completion fence of an [`Engine`]: an allocation
//! whose last task count has not completed yet is skipped and stays in the list until a
//! later call finds it idle. Nothing here ever waits on the GPU.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{
    alloc::MemoryManager,
    allocation::{Allocation, AllocationType},
    sync::Engine,
};

/// A thread-safe list of released allocations.
///
/// The list does not own the engines it is checked against. A process-wide list is
/// usually shared between command lists through an `Arc`.
#[derive(Default)]
pub struct ReusableAllocationList {
    allocations: Mutex<VecDeque<Allocation>>,
}

impl std::fmt::Debug for ReusableAllocationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.allocations.lock().iter()).finish()
    }
}

impl ReusableAllocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tail_one(&self, allocation: Allocation) {
        self.allocations.lock().push_back(allocation);
    }

    pub fn push_front_one(&self, allocation: Allocation) {
        self.allocations.lock().push_front(allocation);
    }

    /// Takes the first allocation that has the requested type and placement, is at least
    /// `required_min_size` bytes large, and is idle on `engine`.
    ///
    /// An allocation is idle when `engine`'s context never used it or its last task count
    /// has completed. Without an engine only type, size, and placement are checked; the
    /// caller guarantees the GPU is done with everything in the list.
    pub fn detach_allocation(
        &self,
        required_min_size: usize,
        allocation_type: AllocationType,
        force_system_memory: bool,
        engine: Option<&Engine>,
    ) -> Option<Allocation> {
        let mut allocations = self.allocations.lock();
        let index = allocations.iter().position(|allocation| {
            allocation.allocation_type() == allocation_type
                && allocation.size() >= required_min_size
                && allocation.is_system_memory_forced() == force_system_memory
                && engine.is_none_or(|engine| engine.is_idle(allocation))
        })?;
        allocations.remove(index)
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn contains(&self, allocation: &Allocation) -> bool {
        self.allocations.lock().iter().any(|a| a == allocation)
    }

    /// The allocation that would be checked first.
    pub fn head(&self) -> Option<Allocation> {
        self.allocations.lock().front().cloned()
    }

    /// Moves every allocation of `other` to the tail of this list.
    pub fn splice(&self, other: &ReusableAllocationList) {
        if std::ptr::eq(self, other) {
            return;
        }
        let moved = std::mem::take(&mut *other.allocations.lock());
        self.allocations.lock().extend(moved);
    }

    /// Frees every allocation in the list through `memory_manager`.
    pub fn free_all(&self, memory_manager: &dyn MemoryManager) {
        let allocations = std::mem::take(&mut *self.allocations.lock());
        if !allocations.is_empty() {
            tracing::debug!(count = allocations.len(), "free reusable allocations");
        }
        for allocation in allocations {
            memory_manager.free(allocation);
        }
    }
}
