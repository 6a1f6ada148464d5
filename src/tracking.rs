//! Heap dirtiness and residency tracking.
//!
//! [`DirtyHeaps`] remembers which heaps moved to a new backing allocation since the
//! encoder last programmed their base addresses. [`ResidencyContainer`] collects the
//! allocations that must be resident when the command list executes.

use std::collections::HashSet;

use crate::{allocation::Allocation, heap::HeapType};

/// One bit per [`HeapType`]. Starts with every bit set: nothing has been bound yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyHeaps(u32);

impl Default for DirtyHeaps {
    fn default() -> Self {
        Self(u32::MAX)
    }
}

impl DirtyHeaps {
    pub fn set_heap_dirty(&mut self, heap_type: HeapType) {
        self.0 |= 1 << heap_type.index();
    }

    /// Marks every heap dirty or clean.
    pub fn set_dirty_state_for_all_heaps(&mut self, dirty: bool) {
        self.0 = if dirty { u32::MAX } else { 0 };
    }

    pub fn is_heap_dirty(&self, heap_type: HeapType) -> bool {
        self.0 & (1 << heap_type.index()) != 0
    }

    pub fn is_any_heap_dirty(&self) -> bool {
        self.0 != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// The allocations a submission must make resident.
///
/// Entries keep their insertion order. Duplicates are allowed until
/// [`remove_duplicates`](Self::remove_duplicates) runs, which keeps the first occurrence
/// of every allocation.
#[derive(Debug, Default)]
pub struct ResidencyContainer(Vec<Allocation>);

impl ResidencyContainer {
    pub fn push(&mut self, allocation: Allocation) {
        self.0.push(allocation);
    }

    pub fn remove_duplicates(&mut self) {
        let mut seen = HashSet::with_capacity(self.0.len());
        self.0.retain(|allocation| seen.insert(allocation.clone()));
    }

    pub fn contains(&self, allocation: &Allocation) -> bool {
        self.0.contains(allocation)
    }

    /// Number of entries equal to `allocation`.
    pub fn count(&self, allocation: &Allocation) -> usize {
        self.0.iter().filter(|a| *a == allocation).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Allocation> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Allocation] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a ResidencyContainer {
    type Item = &'a Allocation;
    type IntoIter = std::slice::Iter<'a, Allocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
