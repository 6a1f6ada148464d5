//! GPU memory management.
//!
//! Containers never allocate memory themselves. They describe what they need with
//! [`AllocationProperties`] and hand the request to the device's [`MemoryManager`].
//! A driver plugs in its own manager; [`HostMemoryManager`] backs every allocation with
//! host memory and hands out synthetic GPU addresses, which is enough to drive the
//! containers on systems where host memory is GPU-visible, and in tests.
//!
//! # GPU address layout
//!
//! [`HostMemoryManager`] carves a private 1 TiB window per root device:
//!
//! ```text
//! (root + 1) << 40                standard heap: command buffers, state heaps
//! (root + 1) << 40 | 1 << 38      internal heap (system memory)
//! (root + 1) << 40 | 3 << 37      internal heap (local memory)
//! ```
//!
//! The first 64 KiB of each heap are never handed out, so heap-relative offsets of
//! internal-heap allocations are never zero.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{
    allocation::{Allocation, AllocationInfo, AllocationType, HostMemory},
    error::{Error, Result},
    utils::{
        align_up,
        memory::{PAGE_SIZE, PAGE_SIZE_64K},
    },
};

/// Describes an allocation request.
#[derive(Debug, Clone)]
pub struct AllocationProperties {
    pub root_device_index: u32,
    pub size: usize,
    pub allocation_type: AllocationType,
    /// The allocation will be used by more than one engine context (e.g. on devices with
    /// multiple sub-devices).
    pub multi_os_context_capable: bool,
    /// Minimum alignment of the CPU and GPU addresses. Zero means page alignment.
    pub alignment: usize,
    /// Place the allocation in host memory even if the device has local memory.
    pub force_system_memory: bool,
}

impl AllocationProperties {
    pub fn new(root_device_index: u32, size: usize, allocation_type: AllocationType) -> Self {
        Self {
            root_device_index,
            size,
            allocation_type,
            multi_os_context_capable: false,
            alignment: 0,
            force_system_memory: false,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_multi_os_context(mut self, capable: bool) -> Self {
        self.multi_os_context_capable = capable;
        self
    }

    pub fn with_system_memory(mut self, force: bool) -> Self {
        self.force_system_memory = force;
        self
    }
}

/// Allocates and frees GPU-visible memory.
pub trait MemoryManager: Send + Sync {
    /// Allocates memory described by `properties`.
    ///
    /// Fails with [`Error::OutOfDeviceMemory`] when the request cannot be satisfied.
    fn allocate(&self, properties: &AllocationProperties) -> Result<Allocation>;

    /// Releases an allocation. The backing memory is reclaimed once the last handle drops.
    fn free(&self, allocation: Allocation);

    /// Base GPU address of the internal heap of a root device.
    fn internal_heap_base_address(&self, root_device_index: u32, use_local_memory: bool) -> u64;

    /// Called for command buffers released on reset or destruction when the
    /// `RemoveUserFenceInCmdlistResetAndDestroy` knob is `0`. Managers that track user
    /// fences wait for or retire them here.
    fn handle_fence_completion(&self, _allocation: &Allocation) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GpuHeap {
    Standard,
    InternalSystem,
    InternalLocal,
}

impl GpuHeap {
    fn base(self, root_device_index: u32) -> u64 {
        let window = (root_device_index as u64 + 1) << 40;
        match self {
            GpuHeap::Standard => window,
            GpuHeap::InternalSystem => window | 1 << 38,
            GpuHeap::InternalLocal => window | 3 << 37,
        }
    }
}

/// A [`MemoryManager`] backed by host memory.
///
/// An optional byte budget makes allocations fail with [`Error::OutOfDeviceMemory`] once
/// the live allocations would exceed it.
pub struct HostMemoryManager {
    local_memory: bool,
    budget: Option<usize>,
    state: Mutex<HostMemoryState>,
}

#[derive(Default)]
struct HostMemoryState {
    next_id: u64,
    allocated_bytes: usize,
    live_allocations: usize,
    freed_allocations: usize,
    fence_completions: usize,
    gpu_cursors: BTreeMap<(u32, GpuHeap), u64>,
}

impl Default for HostMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemoryManager {
    pub fn new() -> Self {
        Self {
            local_memory: false,
            budget: None,
            state: Mutex::new(HostMemoryState::default()),
        }
    }

    /// Reports allocations as local memory unless system memory is forced.
    pub fn with_local_memory(mut self, local_memory: bool) -> Self {
        self.local_memory = local_memory;
        self
    }

    /// Limits the total size of live allocations.
    pub fn with_budget(mut self, bytes: usize) -> Self {
        self.budget = Some(bytes);
        self
    }

    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated_bytes
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().live_allocations
    }

    pub fn freed_allocations(&self) -> usize {
        self.state.lock().freed_allocations
    }

    /// Number of times [`MemoryManager::handle_fence_completion`] was called.
    pub fn fence_completions(&self) -> usize {
        self.state.lock().fence_completions
    }

    fn heap_for(&self, properties: &AllocationProperties) -> GpuHeap {
        match properties.allocation_type {
            AllocationType::InternalHeap | AllocationType::KernelIsa => {
                if self.is_local(properties) {
                    GpuHeap::InternalLocal
                } else {
                    GpuHeap::InternalSystem
                }
            }
            _ => GpuHeap::Standard,
        }
    }

    fn is_local(&self, properties: &AllocationProperties) -> bool {
        self.local_memory && !properties.force_system_memory
    }
}

impl MemoryManager for HostMemoryManager {
    fn allocate(&self, properties: &AllocationProperties) -> Result<Allocation> {
        let size = align_up(properties.size.max(1), PAGE_SIZE);
        let alignment = properties.alignment.max(PAGE_SIZE);
        let out_of_memory = || Error::OutOfDeviceMemory {
            requested: size,
            allocation_type: properties.allocation_type,
            root_device_index: properties.root_device_index,
        };

        let mut state = self.state.lock();
        if let Some(budget) = self.budget
            && state.allocated_bytes + size > budget
        {
            tracing::warn!(
                size,
                budget,
                allocated = state.allocated_bytes,
                allocation_type = ?properties.allocation_type,
                "allocation exceeds memory budget"
            );
            return Err(out_of_memory());
        }
        let memory = HostMemory::new(size, alignment).ok_or_else(out_of_memory)?;

        let heap = self.heap_for(properties);
        let heap_base = heap.base(properties.root_device_index);
        let cursor = state
            .gpu_cursors
            .entry((properties.root_device_index, heap))
            .or_insert(heap_base + PAGE_SIZE_64K as u64);
        let gpu_address = cursor.next_multiple_of(alignment as u64);
        *cursor = gpu_address + size as u64;

        let id = state.next_id;
        state.next_id += 1;
        state.allocated_bytes += size;
        state.live_allocations += 1;
        drop(state);

        let gpu_base_address = match heap {
            GpuHeap::Standard => gpu_address,
            _ => heap_base,
        };
        tracing::trace!(
            id,
            size,
            allocation_type = ?properties.allocation_type,
            gpu_address = format_args!("{gpu_address:#x}"),
            "allocate"
        );
        Ok(Allocation::new(
            id,
            AllocationInfo {
                allocation_type: properties.allocation_type,
                root_device_index: properties.root_device_index,
                size,
                gpu_address,
                gpu_base_address,
                local_memory: self.is_local(properties),
                system_memory_forced: properties.force_system_memory,
            },
            memory,
        ))
    }

    fn free(&self, allocation: Allocation) {
        tracing::trace!(id = allocation.id(), "free");
        let mut state = self.state.lock();
        state.allocated_bytes = state.allocated_bytes.saturating_sub(allocation.size());
        state.live_allocations = state.live_allocations.saturating_sub(1);
        state.freed_allocations += 1;
    }

    fn internal_heap_base_address(&self, root_device_index: u32, use_local_memory: bool) -> u64 {
        let heap = if use_local_memory && self.local_memory {
            GpuHeap::InternalLocal
        } else {
            GpuHeap::InternalSystem
        };
        heap.base(root_device_index)
    }

    fn handle_fence_completion(&self, _allocation: &Allocation) {
        self.state.lock().fence_completions += 1;
    }
}
