//! Engines and completion fences.
//!
//! An [`Engine`] stands for one hardware engine context as seen by the host. It keeps two
//! monotonically increasing counters:
//!
//! - the **task count**: the number of submissions made to the engine so far, and
//! - the **completed task count** (the "tag"): the task count of the last submission the
//!   GPU has finished. Whoever observes GPU progress (an interrupt handler, a polling
//!   thread, a test) publishes it with [`Engine::signal`].
//!
//! Allocations are tagged with the task count of the last submission that used them;
//! once the completed task count catches up, the allocation is idle and may be reused.
//!
//! The engine also owns state shared by every immediate command list submitting to it:
//! the surface-state and dynamic-state heaps used when heap sharing is enabled, and a
//! reuse list for heap allocations. Both are guarded by the engine's reentrant
//! "unique ownership" lock, see [`Engine::obtain_unique_ownership`].

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::{
    alloc::{AllocationProperties, MemoryManager},
    allocation::Allocation,
    error::Result,
    heap::{HeapType, IndirectHeap},
    pool::ReusableAllocationList,
    utils::{align_up, memory::PAGE_SIZE},
};

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(0);

/// A hardware engine context with its completion fence.
///
/// Cloning is cheap and yields a handle to the same engine.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

struct EngineInner {
    context_id: u32,
    root_device_index: u32,
    multi_os_context_capable: bool,
    memory_manager: Arc<dyn MemoryManager>,
    task_count: AtomicU64,
    completed_task_count: AtomicU64,
    ownership: ReentrantMutex<()>,
    ownership_acquisitions: AtomicU64,
    allocations_for_reuse: ReusableAllocationList,
    shared_heaps: [Mutex<Option<IndirectHeap>>; HeapType::COUNT],
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Engine {}

impl Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("context_id", &self.0.context_id)
            .field("root_device_index", &self.0.root_device_index)
            .field("task_count", &self.task_count())
            .field("completed_task_count", &self.completed_task_count())
            .finish()
    }
}

impl Engine {
    /// Creates an engine context on `root_device_index`. Context ids are unique within the
    /// process.
    pub fn new(root_device_index: u32, memory_manager: Arc<dyn MemoryManager>) -> Self {
        Self::with_multi_os_context(root_device_index, memory_manager, false)
    }

    pub fn with_multi_os_context(
        root_device_index: u32,
        memory_manager: Arc<dyn MemoryManager>,
        multi_os_context_capable: bool,
    ) -> Self {
        let context_id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context_id, root_device_index, "create engine");
        Self(Arc::new(EngineInner {
            context_id,
            root_device_index,
            multi_os_context_capable,
            memory_manager,
            task_count: AtomicU64::new(0),
            completed_task_count: AtomicU64::new(0),
            ownership: ReentrantMutex::new(()),
            ownership_acquisitions: AtomicU64::new(0),
            allocations_for_reuse: ReusableAllocationList::new(),
            shared_heaps: std::array::from_fn(|_| Mutex::new(None)),
        }))
    }

    pub fn context_id(&self) -> u32 {
        self.0.context_id
    }

    pub fn root_device_index(&self) -> u32 {
        self.0.root_device_index
    }

    pub fn memory_manager(&self) -> &Arc<dyn MemoryManager> {
        &self.0.memory_manager
    }

    /// Task count of the last submission.
    pub fn task_count(&self) -> u64 {
        self.0.task_count.load(Ordering::Acquire)
    }

    /// Task count of the last submission the GPU finished.
    pub fn completed_task_count(&self) -> u64 {
        self.0.completed_task_count.load(Ordering::Acquire)
    }

    pub fn is_signaled(&self, task_count: u64) -> bool {
        self.completed_task_count() >= task_count
    }

    /// Publishes GPU progress. The completed task count never moves backwards.
    pub fn signal(&self, task_count: u64) {
        self.0
            .completed_task_count
            .fetch_max(task_count, Ordering::AcqRel);
    }

    /// Records a submission and returns its task count.
    pub fn submit(&self) -> u64 {
        self.0.task_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Submits a tag update so the completed task count keeps moving even without further
    /// work from the caller.
    pub fn flush_tag_update(&self) -> u64 {
        let task_count = self.submit();
        tracing::trace!(context_id = self.context_id(), task_count, "flush tag update");
        task_count
    }

    /// Marks `allocation` resident for the next submission.
    pub fn make_resident(&self, allocation: &Allocation) {
        allocation.update_residency_task_count(self.task_count() + 1, self.context_id());
    }

    /// Whether the GPU is done with `allocation` on this engine.
    pub fn is_idle(&self, allocation: &Allocation) -> bool {
        !allocation.is_used_by_context(self.context_id())
            || self.is_signaled(allocation.task_count(self.context_id()))
    }

    /// Takes the engine's reentrant lock.
    ///
    /// The lock serializes heap reservations and tagged releases of every command list
    /// submitting to this engine. A thread that already holds the lock may take it again,
    /// which happens when encoding one dispatch nests another reservation.
    pub fn obtain_unique_ownership(&self) -> ReentrantMutexGuard<'_, ()> {
        self.0.ownership_acquisitions.fetch_add(1, Ordering::Relaxed);
        self.0.ownership.lock()
    }

    /// Number of times [`obtain_unique_ownership`](Self::obtain_unique_ownership) was
    /// called.
    pub fn ownership_acquisitions(&self) -> u64 {
        self.0.ownership_acquisitions.load(Ordering::Relaxed)
    }

    /// Reuse list for heap allocations released on this engine.
    pub fn allocations_for_reuse(&self) -> &ReusableAllocationList {
        &self.0.allocations_for_reuse
    }

    /// Stores `allocation` for reuse, tagged with the current task count.
    pub fn store_reusable_allocation(&self, allocation: Allocation) {
        allocation.update_task_count(self.task_count(), self.context_id());
        self.0.allocations_for_reuse.push_tail_one(allocation);
    }

    /// Stores `allocation` in `list`, tagged with the task count of the next submission,
    /// and flushes a tag update so the tag is eventually reached.
    pub fn store_allocation_and_flush_tag_update(
        &self,
        allocation: Allocation,
        list: &ReusableAllocationList,
    ) {
        let _ownership = self.obtain_unique_ownership();
        self.tag_and_store(allocation, list);
    }

    fn tag_and_store(&self, allocation: Allocation, list: &ReusableAllocationList) {
        let task_count = self.task_count() + 1;
        allocation.update_task_count(task_count, self.context_id());
        allocation.update_residency_task_count(task_count, self.context_id());
        list.push_tail_one(allocation);
        self.flush_tag_update();
    }

    /// Takes an idle allocation of at least `size` bytes from the heap reuse list, or
    /// allocates a new one.
    pub fn obtain_heap_allocation(
        &self,
        heap_type: HeapType,
        size: usize,
        alignment: usize,
    ) -> Result<Allocation> {
        let allocation_type = heap_type.allocation_type();
        if let Some(allocation) = self.0.allocations_for_reuse.detach_allocation(
            size,
            allocation_type,
            false,
            Some(self),
        ) {
            tracing::trace!(id = allocation.id(), ?heap_type, "reuse heap allocation");
            return Ok(allocation);
        }
        self.allocate_heap(heap_type, size, alignment)
    }

    /// Allocates a new heap allocation, bypassing the reuse list.
    pub fn allocate_heap(
        &self,
        heap_type: HeapType,
        size: usize,
        alignment: usize,
    ) -> Result<Allocation> {
        let properties =
            AllocationProperties::new(self.root_device_index(), size, heap_type.allocation_type())
                .with_alignment(alignment)
                .with_multi_os_context(self.0.multi_os_context_capable);
        self.0.memory_manager.allocate(&properties)
    }

    pub(crate) fn shared_heap(&self, heap_type: HeapType) -> &Mutex<Option<IndirectHeap>> {
        &self.0.shared_heaps[heap_type.index()]
    }

    /// Makes sure the shared heap of `heap_type` exists and has `required` bytes available,
    /// moving it to a larger allocation if needed. The caller holds the ownership lock.
    pub(crate) fn ensure_shared_heap(
        &self,
        heap_type: HeapType,
        required: usize,
        default_size: usize,
    ) -> Result<()> {
        let mut slot = self.shared_heap(heap_type).lock();
        if let Some(heap) = slot.as_ref()
            && heap.available_space() >= required
        {
            return Ok(());
        }
        let current = slot.as_ref().map_or(0, |heap| heap.max_available_space());
        let size = align_up(default_size.max(current).max(required), PAGE_SIZE);
        let allocation = self.obtain_heap_allocation(heap_type, size, PAGE_SIZE)?;
        match slot.as_mut() {
            Some(heap) => {
                tracing::debug!(?heap_type, size, "grow shared heap");
                let old = heap.replace_allocation(allocation);
                self.tag_and_store(old, &self.0.allocations_for_reuse);
            }
            None => {
                tracing::debug!(?heap_type, size, "create shared heap");
                *slot = Some(IndirectHeap::new(heap_type, allocation));
            }
        }
        Ok(())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for slot in &mut self.shared_heaps {
            if let Some(heap) = slot.get_mut().take() {
                self.memory_manager.free(heap.allocation().clone());
            }
        }
        self.allocations_for_reuse.free_all(&*self.memory_manager);
    }
}
