//! GPU-visible allocations.
//!
//! An [`Allocation`] is a cheap, reference-counted handle to a region of memory that is
//! visible to both the host (through [`Allocation::cpu_ptr`]) and the GPU (through
//! [`Allocation::gpu_address`]). Handles compare by identity: two clones of the same
//! handle are equal, two allocations with identical attributes are not.
//!
//! Allocations remember, per engine context, the last task count that used them and the
//! last task count they were made resident for. Reuse pools compare these against an
//! engine's completed task count to decide whether the GPU is done with an allocation.

use std::{
    alloc::Layout,
    fmt::Debug,
    hash::{Hash, Hasher},
    ptr::NonNull,
    sync::Arc,
};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Task count reported for contexts that never used an allocation.
pub const OBJECT_NOT_USED: u64 = u64::MAX;

/// What an allocation is used for. Reuse pools only hand out allocations of the
/// requested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationType {
    /// Backing store of a command stream.
    CommandBuffer,
    /// Backing store of a surface-state or dynamic-state heap.
    LinearStream,
    /// Backing store of the indirect-object heap. Placed inside the internal heap so it
    /// can be addressed relative to the internal heap base.
    InternalHeap,
    KernelIsa,
}

impl AllocationType {
    /// Heap allocations are recycled through the engine's heap storage instead of the
    /// command buffer lists.
    pub fn is_heap(self) -> bool {
        matches!(self, AllocationType::LinearStream | AllocationType::InternalHeap)
    }
}

/// Host memory backing an allocation.
pub struct HostMemory {
    ptr: NonNull<u8>,
    /// `None` for memory that is owned by someone else (e.g. a driver mapping).
    layout: Option<Layout>,
}
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    /// Allocates `size` zeroed bytes aligned to `alignment`. Returns `None` when the host
    /// allocator fails.
    pub fn new(size: usize, alignment: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size.max(1), alignment.max(1)).ok()?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        Some(Self {
            ptr: NonNull::new(ptr)?,
            layout: Some(layout),
        })
    }

    /// Wraps memory owned elsewhere.
    ///
    /// # Safety
    /// `ptr` must stay valid for reads and writes of the allocation size for as long as
    /// any handle to the allocation exists.
    pub unsafe fn from_raw(ptr: NonNull<u8>) -> Self {
        Self { ptr, layout: None }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

/// Placement and addressing attributes of an allocation, filled in by the memory manager.
#[derive(Debug, Clone)]
pub struct AllocationInfo {
    pub allocation_type: AllocationType,
    pub root_device_index: u32,
    pub size: usize,
    pub gpu_address: u64,
    /// Base of the GPU heap the allocation lives in. Equal to `gpu_address` for
    /// allocations that are not heap-relative.
    pub gpu_base_address: u64,
    pub local_memory: bool,
    /// Allocated in host memory even though the device has local memory.
    pub system_memory_forced: bool,
}

#[derive(Debug, Clone, Copy)]
struct ContextUsage {
    context_id: u32,
    task_count: u64,
    residency_task_count: u64,
}

/// A reference-counted handle to a GPU-visible memory region.
#[derive(Clone)]
pub struct Allocation(Arc<AllocationInner>);

struct AllocationInner {
    id: u64,
    info: AllocationInfo,
    memory: HostMemory,
    usage: Mutex<SmallVec<[ContextUsage; 2]>>,
}

impl PartialEq for Allocation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Allocation {}

impl Hash for Allocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.0.id)
            .field("type", &self.0.info.allocation_type)
            .field("size", &self.0.info.size)
            .field("gpu_address", &format_args!("{:#x}", self.0.info.gpu_address))
            .finish()
    }
}

impl Allocation {
    /// # Panics
    /// If `info.size` is zero.
    pub fn new(id: u64, info: AllocationInfo, memory: HostMemory) -> Self {
        assert!(info.size > 0, "Allocations cannot be empty");
        Self(Arc::new(AllocationInner {
            id,
            info,
            memory,
            usage: Mutex::new(SmallVec::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn allocation_type(&self) -> AllocationType {
        self.0.info.allocation_type
    }

    pub fn root_device_index(&self) -> u32 {
        self.0.info.root_device_index
    }

    /// Size of the underlying buffer in bytes.
    pub fn size(&self) -> usize {
        self.0.info.size
    }

    pub fn cpu_ptr(&self) -> *mut u8 {
        self.0.memory.as_ptr()
    }

    pub fn gpu_address(&self) -> u64 {
        self.0.info.gpu_address
    }

    pub fn gpu_base_address(&self) -> u64 {
        self.0.info.gpu_base_address
    }

    pub fn is_local_memory(&self) -> bool {
        self.0.info.local_memory
    }

    pub fn is_system_memory_forced(&self) -> bool {
        self.0.info.system_memory_forced
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Last task count that used this allocation on `context_id`, or [`OBJECT_NOT_USED`].
    pub fn task_count(&self, context_id: u32) -> u64 {
        self.usage(context_id)
            .map(|u| u.task_count)
            .unwrap_or(OBJECT_NOT_USED)
    }

    pub fn update_task_count(&self, task_count: u64, context_id: u32) {
        self.update_usage(context_id, |usage| usage.task_count = task_count);
    }

    pub fn is_used_by_context(&self, context_id: u32) -> bool {
        self.task_count(context_id) != OBJECT_NOT_USED
    }

    pub fn residency_task_count(&self, context_id: u32) -> u64 {
        self.usage(context_id)
            .map(|u| u.residency_task_count)
            .unwrap_or(OBJECT_NOT_USED)
    }

    pub fn update_residency_task_count(&self, task_count: u64, context_id: u32) {
        self.update_usage(context_id, |usage| usage.residency_task_count = task_count);
    }

    fn usage(&self, context_id: u32) -> Option<ContextUsage> {
        self.0
            .usage
            .lock()
            .iter()
            .find(|u| u.context_id == context_id)
            .copied()
    }

    fn update_usage(&self, context_id: u32, f: impl FnOnce(&mut ContextUsage)) {
        let mut usage = self.0.usage.lock();
        if let Some(entry) = usage.iter_mut().find(|u| u.context_id == context_id) {
            f(entry);
            return;
        }
        let mut entry = ContextUsage {
            context_id,
            task_count: OBJECT_NOT_USED,
            residency_task_count: OBJECT_NOT_USED,
        };
        f(&mut entry);
        usage.push(entry);
    }
}

#[cfg(test)]
pub(crate) fn test_allocation(allocation_type: AllocationType, size: usize) -> Allocation {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT_ID: AtomicU64 = AtomicU64::new(1 << 32);
    let memory = HostMemory::new(size, crate::utils::memory::PAGE_SIZE).unwrap();
    let gpu_address = memory.as_ptr() as u64;
    Allocation::new(
        NEXT_ID.fetch_add(1, Ordering::Relaxed),
        AllocationInfo {
            allocation_type,
            root_device_index: 0,
            size,
            gpu_address,
            gpu_base_address: gpu_address,
            local_memory: false,
            system_memory_forced: false,
        },
        memory,
    )
}
