//! Per-dispatch heap reservations.
//!
//! Immediate command lists that share heaps cannot write to a shared heap directly:
//! another command list on the same engine may be encoding at the same time. Before
//! encoding a dispatch they reserve the surface-state and dynamic-state space it needs
//! under the engine's ownership lock and encode into the [`ReservedIndirectHeap`] views
//! they get back.

use crate::{
    error::Result,
    heap::{HeapType, ReservedIndirectHeap},
    sync::Engine,
};

use super::{CommandContainer, HeapSlot};

/// What to reserve in one heap.
#[derive(Debug)]
pub struct HeapReserveArguments<'a> {
    /// Receives the reserved range when heaps are shared. Cleared when they are not.
    pub indirect_heap_reservation: Option<&'a mut ReservedIndirectHeap>,
    pub size: usize,
    pub alignment: usize,
}

impl<'a> HeapReserveArguments<'a> {
    pub fn new(
        indirect_heap_reservation: &'a mut ReservedIndirectHeap,
        size: usize,
        alignment: usize,
    ) -> Self {
        Self {
            indirect_heap_reservation: Some(indirect_heap_reservation),
            size,
            alignment,
        }
    }

    /// Alignment actually applied. A zero-sized reservation is never padded.
    fn effective_alignment(&self) -> usize {
        if self.size == 0 { 1 } else { self.alignment }
    }
}

impl CommandContainer {
    /// Shares the surface-state and dynamic-state heaps with every other container that
    /// submits to the same immediate engine. Must be called before
    /// [`initialize`](Self::initialize).
    ///
    /// # Panics
    /// If no immediate engine is set.
    pub fn enable_heap_sharing(&mut self) {
        assert!(
            self.immediate_engine.is_some(),
            "Heap sharing requires an immediate engine!"
        );
        self.heap_sharing_enabled = true;
    }

    /// Reserves surface-state space and, if `get_dsh`, dynamic-state space for one
    /// dispatch.
    ///
    /// With shared heaps the reservation happens under the engine's ownership lock, which
    /// is taken exactly once. Each shared heap grows first if it cannot fit the request,
    /// then the requested range is carved out and bound to the caller's
    /// [`ReservedIndirectHeap`]. Whenever a shared heap sits on a different allocation than
    /// the one this container saw last, the heap is marked dirty and the new allocation
    /// joins the residency container.
    ///
    /// A zero-sized request reserves nothing: a view already bound to the current
    /// allocation is left untouched, any other view is bound to an empty range at the
    /// heap's cursor.
    ///
    /// Without shared heaps the private heaps are made large enough instead and both
    /// reservation slots are cleared.
    ///
    /// # Errors
    /// [`Error::OutOfDeviceMemory`](crate::Error::OutOfDeviceMemory) if a heap has to
    /// grow and the allocation fails.
    ///
    /// # Panics
    /// If heaps are shared and a non-empty request comes without a reservation slot.
    pub fn reserve_space_for_dispatch(
        &mut self,
        ssh_reserve_args: &mut HeapReserveArguments<'_>,
        dsh_reserve_args: &mut HeapReserveArguments<'_>,
        get_dsh: bool,
    ) -> Result<()> {
        let ssh_alignment = ssh_reserve_args.effective_alignment();
        let dsh_alignment = dsh_reserve_args.effective_alignment();

        if self.immediate_cmd_list_shared_heap(HeapType::SurfaceState) {
            let engine = match &self.immediate_engine {
                Some(engine) => engine.clone(),
                None => panic!("Heap sharing requires an immediate engine!"),
            };
            let _ownership = engine.obtain_unique_ownership();
            if get_dsh {
                self.reserve_shared_heap(
                    &engine,
                    HeapType::DynamicState,
                    dsh_reserve_args,
                    dsh_alignment,
                )?;
            }
            self.reserve_shared_heap(
                &engine,
                HeapType::SurfaceState,
                ssh_reserve_args,
                ssh_alignment,
            )?;
            return Ok(());
        }

        if get_dsh && self.needs_private_heap(HeapType::DynamicState, dsh_reserve_args.size) {
            self.heap_with_required_size_and_alignment(
                HeapType::DynamicState,
                dsh_reserve_args.size,
                dsh_alignment,
            )?;
        }
        if self.needs_private_heap(HeapType::SurfaceState, ssh_reserve_args.size) {
            self.heap_with_required_size_and_alignment(
                HeapType::SurfaceState,
                ssh_reserve_args.size,
                ssh_alignment,
            )?;
        }
        ssh_reserve_args.indirect_heap_reservation = None;
        dsh_reserve_args.indirect_heap_reservation = None;
        Ok(())
    }

    /// Zero-sized requests for heaps this container never provisioned are ignored.
    fn needs_private_heap(&self, heap_type: HeapType, size: usize) -> bool {
        size > 0 || self.heaps[heap_type.index()].is_some()
    }

    fn reserve_shared_heap(
        &mut self,
        engine: &Engine,
        heap_type: HeapType,
        args: &mut HeapReserveArguments<'_>,
        alignment: usize,
    ) -> Result<()> {
        let required = if args.size == 0 { 0 } else { args.size + alignment };
        engine.ensure_shared_heap(heap_type, required, self.heap_size(heap_type))?;

        let mut slot = engine.shared_heap(heap_type).lock();
        let Some(heap) = slot.as_mut() else {
            panic!("Shared {heap_type:?} heap vanished while the engine was locked!");
        };
        let index = heap_type.index();
        self.heaps[index] = Some(HeapSlot::Shared);
        if self.allocation_indirect_heaps[index].as_ref() != Some(heap.allocation()) {
            tracing::trace!(?heap_type, id = heap.allocation().id(), "bind shared heap");
            self.dirty_heaps.set_heap_dirty(heap_type);
            self.allocation_indirect_heaps[index] = Some(heap.allocation().clone());
            self.residency_container.push(heap.allocation().clone());
        }

        match (args.indirect_heap_reservation.as_deref_mut(), args.size) {
            (Some(view), 0) => {
                if view.allocation() != Some(heap.allocation()) {
                    let cursor = heap.used();
                    view.bind(heap, cursor..cursor);
                }
            }
            (Some(view), size) => {
                let range = heap.reserve(size, alignment);
                view.bind(heap, range);
            }
            (None, 0) => {}
            (None, size) => panic!(
                "Reserving {size} bytes of the shared {heap_type:?} heap without a reservation slot!"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        Device,
        command::tests::{container, device},
        utils::memory::PAGE_SIZE_64K,
    };

    fn shared_container(device: &Device, engine: &Engine) -> CommandContainer {
        let mut container = CommandContainer::new();
        container.set_immediate_cmd_list_csr(engine.clone());
        container.enable_heap_sharing();
        container.initialize(device, None, true, false).unwrap();
        container
    }

    #[test]
    fn test_heap_sharing_knob() {
        let (device, _) = crate::command::tests::device_with(
            crate::config::DebugSettings {
                enable_immediate_cmd_list_heap_sharing: 1,
                ..Default::default()
            },
            crate::HardwareCapabilities::default(),
        );
        let mut regular = container(&device);
        assert!(!regular.is_heap_sharing_enabled());
        assert!(regular.indirect_heap(HeapType::SurfaceState).is_some());

        let engine = device.create_engine();
        let mut immediate = CommandContainer::new();
        immediate.set_immediate_cmd_list_csr(engine);
        immediate.initialize(&device, None, true, false).unwrap();
        assert!(immediate.is_heap_sharing_enabled());
        assert!(immediate.indirect_heap(HeapType::SurfaceState).is_none());
    }

    #[test]
    fn test_private_reservation_clears_slots() {
        let (device, _) = device();
        let mut container = container(&device);
        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 128, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 64, 32);

        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, true)
            .unwrap();
        assert!(ssh.indirect_heap_reservation.is_none());
        assert!(dsh.indirect_heap_reservation.is_none());
        assert!(!ssh_view.is_bound());
    }

    #[test]
    fn test_private_reservation_grows_heap() {
        let (device, _) = device();
        let mut container = container(&device);
        let mut heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        let available = heap.available_space();
        heap.get_space(available - 16);
        let old = heap.allocation().clone();
        drop(heap);

        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();
        let heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        assert_ne!(heap.allocation(), &old);
        assert!(heap.available_space() >= 64);
    }

    #[test]
    fn test_shared_heaps_are_created_on_first_reservation() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut container = shared_container(&device, &engine);
        assert!(container.is_heap_sharing_enabled());
        assert!(container.indirect_heap(HeapType::SurfaceState).is_none());
        assert!(container.indirect_heap(HeapType::DynamicState).is_none());
        assert!(container.indirect_heap(HeapType::IndirectObject).is_some());
        container.set_dirty_state_for_all_heaps(false);

        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 256, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 128, 64);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, true)
            .unwrap();
        drop((ssh, dsh));

        assert!(ssh_view.is_bound());
        assert_eq!(ssh_view.available_space(), 256);
        assert_eq!(dsh_view.available_space(), 128);
        assert!(container.is_heap_dirty(HeapType::SurfaceState));
        assert!(container.is_heap_dirty(HeapType::DynamicState));
        assert!(!container.is_heap_dirty(HeapType::IndirectObject));

        let shared = container
            .indirect_heap_allocation(HeapType::SurfaceState)
            .unwrap()
            .clone();
        assert_eq!(ssh_view.allocation(), Some(&shared));
        assert_eq!(shared.size(), PAGE_SIZE_64K);
        assert!(container.residency_container().contains(&shared));
        let heap = container.indirect_heap(HeapType::SurfaceState).unwrap();
        assert_eq!(heap.used(), 256);
    }

    #[test]
    fn test_zero_sized_reservation() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut container = shared_container(&device, &engine);
        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);

        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 0, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 64);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();
        drop((ssh, dsh));
        assert!(ssh_view.is_bound());
        assert_eq!(ssh_view.available_space(), 0);
        assert!(!dsh_view.is_bound());

        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();
        drop((ssh, dsh));
        ssh_view.get_space(16);
        let used = ssh_view.used();
        let available = ssh_view.available_space();

        for _ in 0..2 {
            let mut ssh = HeapReserveArguments::new(&mut ssh_view, 0, 64);
            let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
            container
                .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
                .unwrap();
        }
        assert_eq!(ssh_view.used(), used);
        assert_eq!(ssh_view.available_space(), available);
        assert_eq!(
            container.indirect_heap(HeapType::SurfaceState).unwrap().used(),
            64
        );
    }

    #[test]
    fn test_ownership_taken_once_per_reservation() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut container = shared_container(&device, &engine);
        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);

        let before = engine.ownership_acquisitions();
        let mut ssh = HeapReserveArguments::new(&mut ssh_view, PAGE_SIZE_64K, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 64, 64);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, true)
            .unwrap();
        assert_eq!(engine.ownership_acquisitions(), before + 1);

        // Growing the shared heap does not take the lock again.
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, true)
            .unwrap();
        assert_eq!(engine.ownership_acquisitions(), before + 2);
    }

    #[test]
    fn test_containers_share_heaps_without_overlap() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut first = shared_container(&device, &engine);
        let mut second = shared_container(&device, &engine);

        let mut views = Vec::new();
        for use_first in [true, false, true] {
            let container = if use_first { &mut first } else { &mut second };
            let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
            let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
            let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
            let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
            container
                .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
                .unwrap();
            drop((ssh, dsh));
            views.push(ssh_view);
        }
        assert_eq!(
            first.indirect_heap_allocation(HeapType::SurfaceState),
            second.indirect_heap_allocation(HeapType::SurfaceState)
        );
        let starts: HashSet<usize> = views
            .iter_mut()
            .map(|view| view.get_space(64) as usize)
            .collect();
        assert_eq!(starts.len(), 3);
    }

    #[test]
    fn test_shared_heap_growth_dirties_every_container() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut first = shared_container(&device, &engine);
        let mut second = shared_container(&device, &engine);
        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);

        for container in [&mut first, &mut second] {
            let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
            let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
            container
                .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
                .unwrap();
            container.set_dirty_state_for_all_heaps(false);
        }
        let old = first
            .indirect_heap_allocation(HeapType::SurfaceState)
            .unwrap()
            .clone();

        let mut ssh = HeapReserveArguments::new(&mut ssh_view, PAGE_SIZE_64K, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
        first
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();
        drop((ssh, dsh));
        assert!(first.is_heap_dirty(HeapType::SurfaceState));
        assert_ne!(ssh_view.allocation(), Some(&old));
        assert!(engine.allocations_for_reuse().contains(&old));
        assert!(!second.is_heap_dirty(HeapType::SurfaceState));

        let mut stale_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut ssh = HeapReserveArguments::new(&mut stale_view, 0, 0);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
        second
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();
        assert!(second.is_heap_dirty(HeapType::SurfaceState));
        assert_eq!(
            second.indirect_heap_allocation(HeapType::SurfaceState),
            first.indirect_heap_allocation(HeapType::SurfaceState)
        );
    }

    #[test]
    fn test_concurrent_reservations() {
        let (device, _) = device();
        let engine = device.create_engine();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let mut container = shared_container(&device, &engine);
                std::thread::spawn(move || {
                    let mut starts = Vec::new();
                    for _ in 0..100 {
                        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
                        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
                        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
                        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 64, 64);
                        container
                            .reserve_space_for_dispatch(&mut ssh, &mut dsh, true)
                            .unwrap();
                        drop((ssh, dsh));
                        starts.push(ssh_view.get_space(64) as usize);
                        starts.push(dsh_view.get_space(64) as usize);
                    }
                    starts
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for start in handle.join().unwrap() {
                assert!(all.insert(start));
            }
        }
        assert_eq!(all.len(), 400);
    }

    #[test]
    fn test_shared_heap_access_within_reservation() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut container = shared_container(&device, &engine);
        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();

        let heap = container
            .heap_with_required_size_and_alignment(HeapType::SurfaceState, 64, 64)
            .unwrap();
        assert_eq!(heap.used(), 64);
    }

    #[test]
    #[should_panic(expected = "only")]
    fn test_shared_heap_cannot_grow_outside_reservation() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut container = shared_container(&device, &engine);
        let mut ssh_view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        let mut dsh_view = ReservedIndirectHeap::new(HeapType::DynamicState);
        let mut ssh = HeapReserveArguments::new(&mut ssh_view, 64, 64);
        let mut dsh = HeapReserveArguments::new(&mut dsh_view, 0, 0);
        container
            .reserve_space_for_dispatch(&mut ssh, &mut dsh, false)
            .unwrap();
        let _ = container.heap_with_required_size_and_alignment(
            HeapType::SurfaceState,
            PAGE_SIZE_64K,
            0,
        );
    }

    #[test]
    #[should_panic(expected = "without a reservation slot")]
    fn test_shared_reservation_requires_slot() {
        let (device, _) = device();
        let engine = device.create_engine();
        let mut container = shared_container(&device, &engine);
        let mut ssh = HeapReserveArguments {
            indirect_heap_reservation: None,
            size: 64,
            alignment: 64,
        };
        let mut dsh = HeapReserveArguments {
            indirect_heap_reservation: None,
            size: 0,
            alignment: 0,
        };
        let _ = container.reserve_space_for_dispatch(&mut ssh, &mut dsh, false);
    }
}
