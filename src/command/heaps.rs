//! Heap access and growth.
//!
//! This module extends [`CommandContainer`] with methods for reaching the indirect heaps
//! and for making room in them.

use std::ops::{Deref, DerefMut};

use parking_lot::{MappedMutexGuard, MutexGuard};

use crate::{
    HasDevice,
    allocation::Allocation,
    error::Result,
    heap::{HeapAddressModel, HeapType, IndirectHeap},
    utils::{align_padding, align_up, memory::PAGE_SIZE},
};

use super::{CommandContainer, HeapSlot};

/// Access to one of a container's heaps.
///
/// A shared heap stays locked while the guard is alive.
pub enum HeapGuard<'a> {
    Private(&'a mut IndirectHeap),
    Shared(MappedMutexGuard<'a, IndirectHeap>),
}

impl Deref for HeapGuard<'_> {
    type Target = IndirectHeap;

    fn deref(&self) -> &IndirectHeap {
        match self {
            HeapGuard::Private(heap) => heap,
            HeapGuard::Shared(heap) => heap,
        }
    }
}

impl DerefMut for HeapGuard<'_> {
    fn deref_mut(&mut self) -> &mut IndirectHeap {
        match self {
            HeapGuard::Private(heap) => heap,
            HeapGuard::Shared(heap) => heap,
        }
    }
}

impl CommandContainer {
    /// The heap of `heap_type`, or `None` if this container does not use one.
    pub fn indirect_heap(&mut self, heap_type: HeapType) -> Option<HeapGuard<'_>> {
        match self.heaps[heap_type.index()].as_mut()? {
            HeapSlot::Private(heap) => Some(HeapGuard::Private(heap)),
            HeapSlot::Shared => {
                let engine = self.immediate_engine.as_ref()?;
                MutexGuard::try_map(engine.shared_heap(heap_type).lock(), Option::as_mut)
                    .ok()
                    .map(HeapGuard::Shared)
            }
        }
    }

    /// Backing allocation of the heap of `heap_type` as last seen by this container.
    pub fn indirect_heap_allocation(&self, heap_type: HeapType) -> Option<&Allocation> {
        self.allocation_indirect_heaps[heap_type.index()].as_ref()
    }

    pub fn set_indirect_heap_allocation(&mut self, heap_type: HeapType, allocation: Allocation) {
        self.allocation_indirect_heaps[heap_type.index()] = Some(allocation);
    }

    /// Heap sharing covers the surface-state and dynamic-state heaps only.
    pub fn immediate_cmd_list_shared_heap(&self, heap_type: HeapType) -> bool {
        self.heap_sharing_enabled && heap_type != HeapType::IndirectObject
    }

    pub fn is_heap_sharing_enabled(&self) -> bool {
        self.heap_sharing_enabled
    }

    /// Makes sure the heap of `heap_type` has `size_required` bytes available after
    /// aligning its cursor to `alignment`, then aligns the cursor.
    ///
    /// A private heap that is too small moves to a new, larger allocation. The previous
    /// allocation stays valid until the GPU is done with it: it is queued in the
    /// deallocation container, or handed to the immediate engine's heap storage with a
    /// tag update. The heap is marked dirty if its base address changed.
    ///
    /// # Errors
    /// [`Error::OutOfDeviceMemory`](crate::Error::OutOfDeviceMemory) if the heap has to
    /// grow and the allocation fails. The heap is left unchanged.
    ///
    /// # Panics
    /// - If the container has no heap of `heap_type`.
    /// - If `heap_type` is shared and the request does not fit the current reservation.
    ///   Shared heaps only grow in
    ///   [`reserve_space_for_dispatch`](Self::reserve_space_for_dispatch).
    pub fn heap_with_required_size_and_alignment(
        &mut self,
        heap_type: HeapType,
        size_required: usize,
        alignment: usize,
    ) -> Result<HeapGuard<'_>> {
        if self.immediate_cmd_list_shared_heap(heap_type) {
            let Some(mut heap) = self.indirect_heap(heap_type) else {
                panic!("{heap_type:?} heap is not provisioned for this container!");
            };
            let required = size_required + align_padding(heap.used(), alignment);
            assert!(
                heap.available_space() >= required,
                "Shared {heap_type:?} heap needs {required} bytes but only {} are reserved!",
                heap.available_space()
            );
            heap.align(alignment);
            return Ok(heap);
        }

        let heap = self.private_heap_mut(heap_type);
        let required = size_required + align_padding(heap.used(), alignment);
        if heap.available_space() < required {
            self.grow_heap(heap_type, required)?;
        }
        let heap = self.private_heap_mut(heap_type);
        heap.align(alignment);
        Ok(HeapGuard::Private(heap))
    }

    /// Returns `size` bytes of the heap of `heap_type`, growing it if needed.
    pub fn heap_space_allow_grow(&mut self, heap_type: HeapType, size: usize) -> Result<*mut u8> {
        let mut heap = self.heap_with_required_size_and_alignment(heap_type, size, 0)?;
        Ok(heap.get_space(size))
    }

    fn private_heap_mut(&mut self, heap_type: HeapType) -> &mut IndirectHeap {
        match &mut self.heaps[heap_type.index()] {
            Some(HeapSlot::Private(heap)) => heap,
            _ => panic!("{heap_type:?} heap is not provisioned for this container!"),
        }
    }

    fn grow_heap(&mut self, heap_type: HeapType, required: usize) -> Result<()> {
        let storage = self.heap_storage().clone();
        let default_size = self.heap_size(heap_type);
        let heap = self.private_heap_mut(heap_type);
        let size = align_up(
            heap.max_available_space()
                .max(default_size)
                .max(heap.reserved_size() + required),
            PAGE_SIZE,
        );
        let allocation = storage.obtain_heap_allocation(heap_type, size, PAGE_SIZE)?;

        let heap = self.private_heap_mut(heap_type);
        let old_base = heap.heap_gpu_base();
        let old = heap.replace_allocation(allocation.clone());
        let base_changed = heap.heap_gpu_base() != old_base;
        tracing::debug!(
            ?heap_type,
            size,
            old = old.id(),
            new = allocation.id(),
            "grow heap"
        );

        self.residency_container.push(allocation.clone());
        self.allocation_indirect_heaps[heap_type.index()] = Some(allocation);
        if heap_type == HeapType::SurfaceState {
            self.ssh_allocations.push(old.clone());
        }
        if self.immediate_engine.is_some() {
            storage.store_allocation_and_flush_tag_update(old, storage.allocations_for_reuse());
        } else {
            self.deallocation_container.push(old);
        }
        if base_changed {
            self.dirty_heaps.set_heap_dirty(heap_type);
        }
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) leaves out the heap of `heap_type`.
    pub(super) fn skip_heap_allocation_creation(&self, heap_type: HeapType) -> bool {
        if heap_type == HeapType::IndirectObject {
            return false;
        }
        self.bindless_mode
            || self.immediate_cmd_list_shared_heap(heap_type)
            || (heap_type == HeapType::DynamicState && !self.device().capabilities().supports_images)
            || self.heap_address_model != HeapAddressModel::PrivateHeaps
    }

    /// Size of a new heap of `heap_type`.
    pub(super) fn heap_size(&self, heap_type: HeapType) -> usize {
        let device = self.device();
        let capabilities = device.capabilities();
        let default_size = match heap_type {
            HeapType::SurfaceState => capabilities.default_ssh_size,
            _ => capabilities.default_heap_size,
        };
        device
            .debug_settings()
            .default_heap_size_override()
            .unwrap_or(default_size)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        HardwareCapabilities,
        allocation::AllocationType,
        command::tests::{container, device, device_with},
        config::DebugSettings,
        heap::HeapType,
        utils::memory::{KILO_BYTE, PAGE_SIZE, PAGE_SIZE_64K},
    };

    #[test]
    fn test_force_default_heap_size() {
        let (device, _) = device_with(
            DebugSettings {
                force_default_heap_size: 32,
                ..Default::default()
            },
            HardwareCapabilities::default(),
        );
        let mut container = container(&device);
        for heap_type in HeapType::ALL {
            let heap = container.indirect_heap(heap_type).unwrap();
            assert_eq!(heap.max_available_space(), 32 * KILO_BYTE);
        }
    }

    #[test]
    fn test_enough_space_keeps_allocation() {
        let (device, _) = device();
        let mut container = container(&device);
        container.set_dirty_state_for_all_heaps(false);
        let before = container
            .indirect_heap_allocation(HeapType::DynamicState)
            .unwrap()
            .clone();

        let heap = container
            .heap_with_required_size_and_alignment(HeapType::DynamicState, 1024, 0)
            .unwrap();
        assert_eq!(heap.allocation(), &before);
        drop(heap);
        assert!(!container.is_any_heap_dirty());
        assert!(container.deallocation_container().is_empty());
    }

    #[test]
    fn test_alignment_padding() {
        let (device, _) = device();
        let mut container = container(&device);
        let mut heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        heap.get_space(16);
        let available = heap.available_space();
        drop(heap);

        let heap = container
            .heap_with_required_size_and_alignment(HeapType::SurfaceState, 64, 32)
            .unwrap();
        assert_eq!(heap.used(), 32);
        assert_eq!(heap.available_space(), available - 16);
    }

    #[test]
    fn test_padding_counts_towards_required_size() {
        let (device, _) = device();
        let mut container = container(&device);
        let mut heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        let available = heap.available_space();
        heap.get_space(available - 80);
        let allocation = heap.allocation().clone();
        drop(heap);

        // 16 bytes of padding plus 64 bytes fit exactly.
        let heap = container
            .heap_with_required_size_and_alignment(HeapType::SurfaceState, 64, 32)
            .unwrap();
        assert_eq!(heap.allocation(), &allocation);
        assert_eq!(heap.available_space(), 64);
        drop(heap);

        let heap = container
            .heap_with_required_size_and_alignment(HeapType::SurfaceState, 64, 128)
            .unwrap();
        assert_ne!(heap.allocation(), &allocation);
    }

    #[test]
    fn test_growth_moves_heap_to_new_allocation() {
        let (device, _) = device();
        let mut container = container(&device);
        container.set_dirty_state_for_all_heaps(false);

        let mut heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        let identity = &*heap as *const _;
        let available = heap.available_space();
        heap.get_space(available);
        let old = heap.allocation().clone();
        drop(heap);

        let heap = container
            .heap_with_required_size_and_alignment(HeapType::SurfaceState, 64, 0)
            .unwrap();
        assert_eq!(&*heap as *const _, identity);
        let new = heap.allocation().clone();
        assert_ne!(new, old);
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.max_available_space(), PAGE_SIZE_64K);
        drop(heap);

        assert!(container.is_heap_dirty(HeapType::SurfaceState));
        assert!(!container.is_heap_dirty(HeapType::DynamicState));
        assert_eq!(container.indirect_heap_allocation(HeapType::SurfaceState), Some(&new));
        assert_eq!(container.deallocation_container(), &[old.clone()]);
        assert_eq!(container.ssh_allocations(), &[old]);
        assert!(container.residency_container().contains(&new));
    }

    #[test]
    fn test_growth_beyond_default_size() {
        let (device, _) = device();
        let mut container = container(&device);
        let before = container
            .indirect_heap(HeapType::DynamicState)
            .unwrap()
            .max_available_space();

        let mut heap = container
            .heap_with_required_size_and_alignment(HeapType::DynamicState, before + 1, 0)
            .unwrap();
        assert!(heap.max_available_space() > before);
        assert_eq!(heap.max_available_space() % PAGE_SIZE, 0);
        heap.get_space(before + 1);
    }

    #[test]
    fn test_indirect_object_heap_growth_keeps_base() {
        let (device, _) = device();
        let mut container = container(&device);
        container.set_dirty_state_for_all_heaps(false);
        let mut heap = container.indirect_heap(HeapType::IndirectObject).unwrap();
        let base = heap.heap_gpu_base();
        let available = heap.available_space();
        heap.get_space(available);
        drop(heap);

        let heap = container
            .heap_with_required_size_and_alignment(HeapType::IndirectObject, 64, 0)
            .unwrap();
        assert_eq!(heap.heap_gpu_base(), base);
        assert_eq!(heap.allocation().allocation_type(), AllocationType::InternalHeap);
        drop(heap);
        assert!(!container.is_heap_dirty(HeapType::IndirectObject));
        assert!(container.ssh_allocations().is_empty());
    }

    #[test]
    fn test_grown_ssh_keeps_reserved_prefix() {
        let (device, _) = device();
        let mut container = crate::command::CommandContainer::new();
        container.set_reserved_ssh_size(PAGE_SIZE);
        container.initialize(&device, None, true, false).unwrap();

        let ptr = container
            .heap_space_allow_grow(HeapType::SurfaceState, PAGE_SIZE_64K)
            .unwrap();
        let heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        assert_eq!(heap.used(), PAGE_SIZE + PAGE_SIZE_64K);
        assert_eq!(ptr, unsafe { heap.cpu_base().add(PAGE_SIZE) });
    }

    #[test]
    fn test_reset_recycles_replaced_heaps() {
        let (device, _) = device();
        let mut container = container(&device);
        let available = container
            .indirect_heap(HeapType::DynamicState)
            .unwrap()
            .available_space();
        container
            .heap_space_allow_grow(HeapType::DynamicState, available + 1)
            .unwrap();
        let old = container.deallocation_container()[0].clone();

        container.reset().unwrap();
        assert!(container.deallocation_container().is_empty());
        assert!(container.ssh_allocations().is_empty());
        assert!(device.default_engine().allocations_for_reuse().contains(&old));
        assert!(!container.residency_container().contains(&old));
    }

    #[test]
    fn test_heap_space_allow_grow() {
        let (device, _) = device();
        let mut container = container(&device);
        let first = container
            .heap_space_allow_grow(HeapType::IndirectObject, 128)
            .unwrap();
        let second = container
            .heap_space_allow_grow(HeapType::IndirectObject, 128)
            .unwrap();
        assert_eq!(second as usize - first as usize, 128);
    }

    #[test]
    fn test_growth_out_of_memory() {
        use crate::{Device, alloc::HostMemoryManager};
        use std::sync::Arc;

        let mm = Arc::new(HostMemoryManager::new().with_budget(256 * KILO_BYTE + 3 * PAGE_SIZE_64K));
        let device = Device::builder(0).memory_manager(mm).build();
        let mut container = container(&device);
        let available = container
            .indirect_heap(HeapType::SurfaceState)
            .unwrap()
            .available_space();
        let err = container
            .heap_with_required_size_and_alignment(HeapType::SurfaceState, available + 1, 0)
            .err()
            .unwrap();
        assert!(err.is_out_of_memory());
        let heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.available_space(), available);
    }

    #[test]
    #[should_panic(expected = "not provisioned")]
    fn test_missing_heap_panics() {
        let (device, _) = device_with(
            DebugSettings::default(),
            HardwareCapabilities {
                supports_images: false,
                ..Default::default()
            },
        );
        let mut container = container(&device);
        let _ = container.heap_with_required_size_and_alignment(HeapType::DynamicState, 64, 0);
    }
}
