//! Fence-gated reuse for immediate command lists.
//!
//! An immediate command list submits after every call, so it cannot wait for a reset to
//! recycle its command buffers. Instead it hands a full command buffer to its engine with
//! [`add_current_command_buffer_to_reusable_allocation_list`], which tags it with the
//! next task count, and later takes it back with [`reuse_existing_cmd_buffer`] once the
//! engine's completed task count has caught up.
//!
//! [`add_current_command_buffer_to_reusable_allocation_list`]: CommandContainer::add_current_command_buffer_to_reusable_allocation_list
//! [`reuse_existing_cmd_buffer`]: CommandContainer::reuse_existing_cmd_buffer

use crate::{
    HasDevice,
    allocation::{Allocation, AllocationType},
    error::Result,
    heap::HeapType,
    pool::ReusableAllocationList,
    sync::Engine,
};

use super::{CommandContainer, HEAP_ALLOCATION_ALIGNMENT};

impl CommandContainer {
    /// Attaches the engine this container's command list submits to immediately.
    pub fn set_immediate_cmd_list_csr(&mut self, engine: Engine) {
        self.immediate_engine = Some(engine);
    }

    pub fn immediate_cmd_list_csr(&self) -> Option<&Engine> {
        self.immediate_engine.as_ref()
    }

    pub fn immediate_reusable_allocation_list(&self) -> Option<&ReusableAllocationList> {
        self.immediate_reusable_allocation_list.as_ref()
    }

    /// Creates the immediate reuse list and pre-allocates command buffers and heaps.
    ///
    /// The amount is `SetAmountOfReusableAllocations`, or the device default. Command
    /// buffers go to the immediate list (one host-memory buffer each as well when the
    /// container has a secondary stream). Heap allocations, one per heap this container
    /// provisions, are made resident on the heap storage engine and stored there. Does
    /// nothing if the list already exists.
    ///
    /// # Errors
    /// [`Error::OutOfDeviceMemory`](crate::Error::OutOfDeviceMemory) if any allocation
    /// fails. Everything allocated by this call is freed and no list is installed, so a
    /// later call starts over.
    pub fn fill_reusable_allocation_lists(&mut self) -> Result<()> {
        if self.immediate_reusable_allocation_list.is_some() {
            return Ok(());
        }
        let device = self.device().clone();
        let amount = device
            .debug_settings()
            .reusable_allocations(device.capabilities().default_reusable_allocations);

        let mut cmd_buffers = Vec::new();
        let mut heaps = Vec::new();
        if let Err(err) = self.preallocate(amount, &mut cmd_buffers, &mut heaps) {
            tracing::warn!(%err, amount, "fill reusable allocation lists failed");
            let memory_manager = device.memory_manager();
            for allocation in cmd_buffers.into_iter().chain(heaps) {
                memory_manager.free(allocation);
            }
            return Err(err);
        }

        let list = ReusableAllocationList::new();
        for allocation in cmd_buffers {
            self.residency_container.push(allocation.clone());
            list.push_tail_one(allocation);
        }
        let storage = self.heap_storage().clone();
        for allocation in heaps {
            storage.make_resident(&allocation);
            storage.store_reusable_allocation(allocation);
        }
        self.immediate_reusable_allocation_list = Some(list);
        tracing::debug!(amount, "fill reusable allocation lists");
        Ok(())
    }

    fn preallocate(
        &self,
        amount: usize,
        cmd_buffers: &mut Vec<Allocation>,
        heaps: &mut Vec<Allocation>,
    ) -> Result<()> {
        for _ in 0..amount {
            cmd_buffers.push(self.allocate_command_buffer(false)?);
            if self.use_secondary_command_stream {
                cmd_buffers.push(self.allocate_command_buffer(true)?);
            }
        }
        if !self.requires_heaps {
            return Ok(());
        }
        let storage = self.heap_storage();
        for _ in 0..amount {
            for heap_type in HeapType::ALL {
                if self.skip_heap_allocation_creation(heap_type) {
                    continue;
                }
                heaps.push(storage.allocate_heap(
                    heap_type,
                    self.heap_size(heap_type),
                    HEAP_ALLOCATION_ALIGNMENT,
                )?);
            }
        }
        Ok(())
    }

    /// Takes an idle command buffer from the immediate list and appends it as a new
    /// generation. The command stream is not touched.
    ///
    /// Returns `None` without an immediate engine or list, or when every buffer in the
    /// list is still in use by the GPU.
    pub fn reuse_existing_cmd_buffer(&mut self, force_host_memory: bool) -> Option<Allocation> {
        let force_host_memory = force_host_memory && self.use_secondary_command_stream;
        let (Some(list), Some(engine)) = (
            &self.immediate_reusable_allocation_list,
            &self.immediate_engine,
        ) else {
            return None;
        };
        let allocation = list.detach_allocation(
            self.aligned_cmd_buffer_size(),
            AllocationType::CommandBuffer,
            force_host_memory,
            Some(engine),
        )?;
        tracing::trace!(id = allocation.id(), "reuse immediate command buffer");
        self.cmd_buffer_allocations.push(allocation.clone());
        Some(allocation)
    }

    /// Hands the current command buffer back to the immediate engine, tagged with the
    /// engine's next task count, and drops it from this container's generations.
    pub fn add_current_command_buffer_to_reusable_allocation_list(&mut self) {
        let current = self.command_stream().allocation().clone();
        if let Some(index) = self
            .cmd_buffer_allocations
            .iter()
            .position(|allocation| allocation == &current)
        {
            self.cmd_buffer_allocations.remove(index);
        }
        self.store_allocation_and_flush_tag_update(current);
    }

    /// Stores `allocation` on the immediate engine: command buffers in the immediate
    /// list, everything else in the engine's heap storage.
    ///
    /// # Panics
    /// If no immediate engine is set.
    pub fn store_allocation_and_flush_tag_update(&mut self, allocation: Allocation) {
        let engine = match &self.immediate_engine {
            Some(engine) => engine.clone(),
            None => panic!("Tagged release requires an immediate engine!"),
        };
        if allocation.allocation_type() == AllocationType::CommandBuffer {
            let list = self
                .immediate_reusable_allocation_list
                .get_or_insert_with(ReusableAllocationList::new);
            engine.store_allocation_and_flush_tag_update(allocation, list);
        } else {
            engine.store_allocation_and_flush_tag_update(allocation, engine.allocations_for_reuse());
        }
    }
}
