//! # Command Containers
//!
//! A [`CommandContainer`] owns everything a command list encodes into: a chain of command
//! buffers and up to three indirect heaps. The encoder asks the container for command
//! space and heap space; the container grows the heaps, chains new command buffers, and
//! keeps track of what the GPU needs to see at submission time.
//!
//! ## Key Concepts
//! - Generation: one command buffer allocation in the container's chain. Generation 0 is
//!   allocated by [`initialize`](CommandContainer::initialize) and survives every
//!   [`reset`](CommandContainer::reset); later generations are appended when the current
//!   one is full and released on reset.
//! - Dirty heap: a heap whose base address changed since the encoder last programmed it.
//!   Heaps start dirty. Growing a heap onto a new allocation marks it dirty again, except
//!   for the indirect-object heap whose base is the internal heap base.
//! - Residency container: allocations that must be resident when the command list runs.
//! - Deallocation container: allocations the container stopped using but the GPU might
//!   still read. They are recycled on reset and destruction.
//! - Immediate command lists: command lists that submit after every call. They pass an
//!   [`Engine`] to [`set_immediate_cmd_list_csr`](CommandContainer::set_immediate_cmd_list_csr)
//!   and recycle command buffers and heaps through lists gated by that engine's completion
//!   fence instead of waiting for a reset.
//! - Heap sharing: immediate command lists on the same engine may share one surface-state
//!   and one dynamic-state heap, reserving a range per dispatch with
//!   [`reserve_space_for_dispatch`](CommandContainer::reserve_space_for_dispatch).
//!
//! ## Lifecycle
//!
//! ```text
//! new -> (setters) -> initialize -> encode -> reset -> encode -> ... -> drop
//!                         |                                              ^
//!                         +---------------- (error) --------------------+
//! ```
//!
//! ## Example Usage
//!
//! ```
//! use scoria::{Device, command::CommandContainer, heap::HeapType};
//!
//! let device = Device::builder(0).build();
//! let mut container = CommandContainer::new();
//! container.initialize(&device, None, true, false).unwrap();
//!
//! // Encode into the command stream and the heaps.
//! container.command_space(64).unwrap();
//! container.heap_space_allow_grow(HeapType::SurfaceState, 256).unwrap();
//! assert!(container.is_heap_dirty(HeapType::SurfaceState));
//! container.set_dirty_state_for_all_heaps(false);
//!
//! // Start over with generation 0.
//! container.reset().unwrap();
//! assert_eq!(container.cmd_buffer_allocations().len(), 1);
//! ```

mod heaps;
mod reserve;
mod reuse;

pub use heaps::HeapGuard;
pub use reserve::HeapReserveArguments;

use std::sync::Arc;

use crate::{
    Device, HasDevice,
    alloc::AllocationProperties,
    allocation::{Allocation, AllocationType},
    error::Result,
    heap::{HeapAddressModel, HeapType, IndirectHeap},
    pool::ReusableAllocationList,
    stream::LinearStream,
    sync::Engine,
    tracking::{DirtyHeaps, ResidencyContainer},
    utils::{align_up, memory::PAGE_SIZE_64K},
};

/// Alignment of heap allocations made by containers.
const HEAP_ALLOCATION_ALIGNMENT: usize = PAGE_SIZE_64K;

/// How a container reaches the heap of one type.
enum HeapSlot {
    Private(IndirectHeap),
    /// The heap lives in the immediate engine and is shared with other containers.
    Shared,
}

/// Command buffers and indirect heaps of one command list.
///
/// # Thread Safety
///
/// A container is used from one thread at a time. Containers of different command lists
/// may run on different threads; the only state they share is the engine they submit to
/// (shared heaps, heap storage) and the optional process-wide reusable allocation list,
/// both of which lock internally.
pub struct CommandContainer {
    device: Option<Device>,

    /// Command buffer generations, oldest first.
    cmd_buffer_allocations: Vec<Allocation>,
    command_stream: Option<LinearStream>,
    /// Host-memory stream immediate command lists can swap in with
    /// [`swap_streams`](Self::swap_streams).
    secondary_command_stream: Option<LinearStream>,
    use_secondary_command_stream: bool,
    /// `command_stream` currently holds the host-memory stream.
    streams_swapped: bool,

    heaps: [Option<HeapSlot>; HeapType::COUNT],
    /// Backing allocation of every heap as last seen by this container.
    allocation_indirect_heaps: [Option<Allocation>; HeapType::COUNT],
    dirty_heaps: DirtyHeaps,
    residency_container: ResidencyContainer,
    deallocation_container: Vec<Allocation>,
    /// Surface-state allocations replaced by growth since the last reset.
    ssh_allocations: Vec<Allocation>,

    /// Process-wide list command buffers are released to. Not owned.
    reusable_allocation_list: Option<Arc<ReusableAllocationList>>,
    immediate_reusable_allocation_list: Option<ReusableAllocationList>,
    immediate_engine: Option<Engine>,

    heap_sharing_enabled: bool,
    heap_address_model: HeapAddressModel,
    reserved_ssh_size: usize,
    keep_current_state_heap: bool,
    requires_heaps: bool,
    bindless_mode: bool,
    handle_fence_completion_required: bool,

    instruction_heap_base_address: u64,
    indirect_object_heap_base_address: u64,
}

impl Default for CommandContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl HasDevice for CommandContainer {
    fn device(&self) -> &Device {
        match &self.device {
            Some(device) => device,
            None => panic!("Command container is not initialized!"),
        }
    }
}

impl CommandContainer {
    /// Creates an uninitialized container.
    pub fn new() -> Self {
        Self {
            device: None,
            cmd_buffer_allocations: Vec::new(),
            command_stream: None,
            secondary_command_stream: None,
            use_secondary_command_stream: false,
            streams_swapped: false,
            heaps: Default::default(),
            allocation_indirect_heaps: Default::default(),
            dirty_heaps: DirtyHeaps::default(),
            residency_container: ResidencyContainer::default(),
            deallocation_container: Vec::new(),
            ssh_allocations: Vec::new(),
            reusable_allocation_list: None,
            immediate_reusable_allocation_list: None,
            immediate_engine: None,
            heap_sharing_enabled: false,
            heap_address_model: HeapAddressModel::default(),
            reserved_ssh_size: 0,
            keep_current_state_heap: false,
            requires_heaps: false,
            bindless_mode: false,
            handle_fence_completion_required: false,
            instruction_heap_base_address: 0,
            indirect_object_heap_base_address: 0,
        }
    }

    /// Allocates generation 0 and, if `require_heaps`, the heaps this container owns.
    ///
    /// # Parameters
    /// - `reusable_allocation_list`: list command buffers are taken from and released to
    ///   instead of the memory manager.
    /// - `require_heaps`: whether kernels encoded into this container need heaps.
    /// - `create_secondary_cmd_buffer_in_host_mem`: also allocate a host-memory command
    ///   buffer for [`swap_streams`](Self::swap_streams).
    ///
    /// # Errors
    /// [`Error::OutOfDeviceMemory`](crate::Error::OutOfDeviceMemory) if any allocation
    /// fails. Everything allocated so far is released and the container stays
    /// uninitialized.
    ///
    /// # Panics
    /// If the container is already initialized.
    pub fn initialize(
        &mut self,
        device: &Device,
        reusable_allocation_list: Option<Arc<ReusableAllocationList>>,
        require_heaps: bool,
        create_secondary_cmd_buffer_in_host_mem: bool,
    ) -> Result<()> {
        assert!(
            self.device.is_none(),
            "Command container initialized twice!"
        );
        let settings = device.debug_settings();
        self.device = Some(device.clone());
        self.reusable_allocation_list = reusable_allocation_list;
        self.handle_fence_completion_required = settings.handle_fence_completion_on_release();
        self.bindless_mode = settings.bindless_mode(device.capabilities().bindless_mode);
        if self.immediate_engine.is_some() && settings.immediate_heap_sharing(false) {
            self.heap_sharing_enabled = true;
        }

        if let Err(err) = self.allocate_initial(require_heaps, create_secondary_cmd_buffer_in_host_mem)
        {
            tracing::warn!(%err, "command container initialization failed");
            self.release_allocations();
            self.requires_heaps = false;
            self.use_secondary_command_stream = false;
            self.reusable_allocation_list = None;
            self.device = None;
            return Err(err);
        }
        tracing::debug!(
            root_device_index = device.root_device_index(),
            require_heaps,
            heap_sharing = self.heap_sharing_enabled,
            "initialize command container"
        );
        Ok(())
    }

    fn allocate_initial(&mut self, require_heaps: bool, secondary: bool) -> Result<()> {
        let usable_size = self.usable_cmd_buffer_size();
        let cmd_buffer = self.obtain_next_command_buffer_allocation(false)?;
        self.cmd_buffer_allocations.push(cmd_buffer.clone());
        self.command_stream = Some(LinearStream::new(cmd_buffer.clone(), usable_size));

        if secondary {
            self.use_secondary_command_stream = true;
            let host_buffer = self.obtain_next_command_buffer_allocation(true)?;
            self.cmd_buffer_allocations.push(host_buffer.clone());
            self.secondary_command_stream =
                Some(LinearStream::new(host_buffer.clone(), usable_size));
            self.add_to_residency_container(Some(&host_buffer));
        }
        self.add_to_residency_container(Some(&cmd_buffer));

        if !require_heaps {
            return Ok(());
        }
        self.requires_heaps = true;
        let storage = self.heap_storage().clone();
        for heap_type in HeapType::ALL {
            if self.skip_heap_allocation_creation(heap_type) {
                continue;
            }
            let allocation = storage.obtain_heap_allocation(
                heap_type,
                self.heap_size(heap_type),
                HEAP_ALLOCATION_ALIGNMENT,
            )?;
            self.residency_container.push(allocation.clone());
            let mut heap = IndirectHeap::new(heap_type, allocation.clone());
            if heap_type == HeapType::SurfaceState {
                heap.set_reserved_size(self.reserved_ssh_size);
            }
            self.heaps[heap_type.index()] = Some(HeapSlot::Private(heap));
            self.allocation_indirect_heaps[heap_type.index()] = Some(allocation);
        }

        let device = self.device().clone();
        let memory_manager = device.memory_manager();
        let capabilities = device.capabilities();
        self.indirect_object_heap_base_address = memory_manager
            .internal_heap_base_address(device.root_device_index(), self.is_indirect_heap_in_local_memory());
        self.instruction_heap_base_address = memory_manager.internal_heap_base_address(
            device.root_device_index(),
            capabilities.local_memory && !capabilities.use_system_memory_placement_for_isa,
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// Configured command buffer size including the reserved tail.
    pub fn total_cmd_buffer_size(&self) -> usize {
        let device = self.device();
        let capabilities = device.capabilities();
        let usable = device
            .debug_settings()
            .cmd_buffer_size_override()
            .unwrap_or(capabilities.default_cmd_buffer_size);
        usable + capabilities.cmd_buffer_reserved_size
    }

    /// Size of every command buffer allocation.
    pub fn aligned_cmd_buffer_size(&self) -> usize {
        align_up(
            self.total_cmd_buffer_size(),
            self.device().capabilities().cmd_buffer_alignment,
        )
    }

    /// Bytes of every generation available to the encoder.
    pub fn usable_cmd_buffer_size(&self) -> usize {
        self.aligned_cmd_buffer_size() - self.device().capabilities().cmd_buffer_reserved_size
    }

    fn obtain_next_command_buffer_allocation(&self, force_host_memory: bool) -> Result<Allocation> {
        let force_host_memory = force_host_memory && self.use_secondary_command_stream;
        if let Some(list) = &self.reusable_allocation_list
            && let Some(allocation) = list.detach_allocation(
                self.aligned_cmd_buffer_size(),
                AllocationType::CommandBuffer,
                force_host_memory,
                None,
            )
        {
            tracing::trace!(id = allocation.id(), "reuse command buffer");
            return Ok(allocation);
        }
        self.allocate_command_buffer(force_host_memory)
    }

    fn allocate_command_buffer(&self, force_host_memory: bool) -> Result<Allocation> {
        let device = self.device();
        let properties = AllocationProperties::new(
            device.root_device_index(),
            self.aligned_cmd_buffer_size(),
            AllocationType::CommandBuffer,
        )
        .with_multi_os_context(device.is_multi_os_context_capable())
        .with_system_memory(force_host_memory);
        device.memory_manager().allocate(&properties)
    }

    /// Appends a new generation and records it in `cmd_buffer_allocations`.
    ///
    /// Immediate command lists first try to reuse an idle buffer from their own list.
    fn next_generation(&mut self, force_host_memory: bool) -> Result<Allocation> {
        if let Some(allocation) = self.reuse_existing_cmd_buffer(force_host_memory) {
            return Ok(allocation);
        }
        let allocation = self.obtain_next_command_buffer_allocation(force_host_memory)?;
        self.cmd_buffer_allocations.push(allocation.clone());
        Ok(allocation)
    }

    /// Appends a new generation and points the command stream at it.
    ///
    /// With a secondary stream the host-memory stream moves to a new host buffer as
    /// well, whichever way the streams are currently swapped.
    pub fn allocate_next_command_buffer(&mut self) -> Result<()> {
        let usable_size = self.usable_cmd_buffer_size();
        let allocation = self.next_generation(false)?;
        if let Some(stream) = self.device_stream_mut() {
            stream.replace_allocation(allocation.clone(), usable_size);
        }
        self.add_to_residency_container(Some(&allocation));

        if self.use_secondary_command_stream {
            let host_buffer = self.next_generation(true)?;
            if let Some(stream) = self.host_stream_mut() {
                stream.replace_allocation(host_buffer.clone(), usable_size);
            }
            self.add_to_residency_container(Some(&host_buffer));
        }
        tracing::trace!(
            generation = self.cmd_buffer_allocations.len() - 1,
            "allocate next command buffer"
        );
        Ok(())
    }

    /// Terminates the current command buffer with the batch buffer end command and
    /// continues in a new generation.
    pub fn close_and_allocate_next_command_buffer(&mut self) -> Result<()> {
        let device = self.device().clone();
        let batch_buffer_end = &device.capabilities().batch_buffer_end;
        let stream = self.command_stream_mut();
        assert!(
            stream.used() + batch_buffer_end.len() <= stream.allocation().size(),
            "No room for the batch buffer end command!"
        );
        let ptr = stream.get_space(0);
        unsafe {
            std::ptr::copy_nonoverlapping(batch_buffer_end.as_ptr(), ptr, batch_buffer_end.len())
        };
        self.allocate_next_command_buffer()
    }

    /// Returns `size` bytes of command space, chaining to a new generation when the
    /// current one cannot also fit the batch buffer end command.
    pub fn command_space(&mut self, size: usize) -> Result<*mut u8> {
        let terminator = self.device().capabilities().batch_buffer_end.len();
        if self.command_stream().available_space() < size + terminator {
            self.close_and_allocate_next_command_buffer()?;
        }
        Ok(self.command_stream_mut().get_space(size))
    }

    /// Points the command stream at `allocation`.
    pub fn set_cmd_buffer(&mut self, allocation: Allocation) {
        let usable_size = self.usable_cmd_buffer_size();
        self.command_stream_mut()
            .replace_allocation(allocation.clone(), usable_size);
        self.add_to_residency_container(Some(&allocation));
    }

    /// # Panics
    /// If the container is not initialized.
    pub fn command_stream(&self) -> &LinearStream {
        match &self.command_stream {
            Some(stream) => stream,
            None => panic!("Command container is not initialized!"),
        }
    }

    pub fn command_stream_mut(&mut self) -> &mut LinearStream {
        match &mut self.command_stream {
            Some(stream) => stream,
            None => panic!("Command container is not initialized!"),
        }
    }

    pub fn secondary_command_stream(&self) -> Option<&LinearStream> {
        self.secondary_command_stream.as_ref()
    }

    /// Exchanges the command stream with the host-memory stream. Returns false when the
    /// container has no secondary stream.
    pub fn swap_streams(&mut self) -> bool {
        if !self.use_secondary_command_stream {
            return false;
        }
        std::mem::swap(&mut self.command_stream, &mut self.secondary_command_stream);
        self.streams_swapped = !self.streams_swapped;
        true
    }

    fn device_stream_mut(&mut self) -> Option<&mut LinearStream> {
        if self.streams_swapped {
            self.secondary_command_stream.as_mut()
        } else {
            self.command_stream.as_mut()
        }
    }

    fn host_stream_mut(&mut self) -> Option<&mut LinearStream> {
        if self.streams_swapped {
            self.command_stream.as_mut()
        } else {
            self.secondary_command_stream.as_mut()
        }
    }

    pub fn cmd_buffer_allocations(&self) -> &[Allocation] {
        &self.cmd_buffer_allocations
    }

    /// Releases generations from `start_index` on.
    ///
    /// With a process-wide list they go to the front of that list, after every buffer of
    /// the immediate list has been moved there; otherwise they are freed.
    pub fn handle_cmd_buffer_allocations(&mut self, start_index: usize) {
        if let Some(immediate) = &self.immediate_reusable_allocation_list
            && let Some(global) = &self.reusable_allocation_list
            && !immediate.is_empty()
        {
            global.splice(immediate);
        }
        let memory_manager = self.device().memory_manager().clone();
        let start_index = start_index.min(self.cmd_buffer_allocations.len());
        for allocation in self.cmd_buffer_allocations.drain(start_index..) {
            match &self.reusable_allocation_list {
                Some(global) => {
                    if self.handle_fence_completion_required {
                        memory_manager.handle_fence_completion(&allocation);
                    }
                    global.push_front_one(allocation);
                }
                None => memory_manager.free(allocation),
            }
        }
    }

    /// Goes back to generation 0 and rewinds the heaps.
    ///
    /// Every heap is marked dirty. Surface-state and dynamic-state heaps keep their
    /// contents when [`set_keep_current_state_heap`](Self::set_keep_current_state_heap)
    /// is set. Shared heaps are never rewound.
    ///
    /// # Errors
    /// [`Error::OutOfDeviceMemory`](crate::Error::OutOfDeviceMemory) if a retained
    /// generation was handed back through a tagged release and no replacement can be
    /// allocated. Nothing is rewound or released in that case.
    pub fn reset(&mut self) -> Result<()> {
        self.retain_first_generations()?;
        self.dirty_heaps.set_dirty_state_for_all_heaps(true);
        self.residency_container.clear();
        self.release_deallocation_container();
        self.ssh_allocations.clear();

        let retained = if self.use_secondary_command_stream { 2 } else { 1 };
        self.handle_cmd_buffer_allocations(retained);
        let usable_size = self.usable_cmd_buffer_size();
        self.streams_swapped = false;
        let first = self.cmd_buffer_allocations[0].clone();
        self.set_cmd_buffer(first);
        if self.use_secondary_command_stream {
            let host_buffer = self.cmd_buffer_allocations[1].clone();
            if let Some(stream) = &mut self.secondary_command_stream {
                stream.replace_allocation(host_buffer.clone(), usable_size);
            }
            self.add_to_residency_container(Some(&host_buffer));
        }

        for heap_type in HeapType::ALL {
            let index = heap_type.index();
            let allocation = match &mut self.heaps[index] {
                Some(HeapSlot::Private(heap)) => {
                    if heap_type == HeapType::IndirectObject || !self.keep_current_state_heap {
                        heap.rewind();
                    }
                    heap.allocation().clone()
                }
                Some(HeapSlot::Shared) => match &self.allocation_indirect_heaps[index] {
                    Some(allocation) => allocation.clone(),
                    None => continue,
                },
                None => continue,
            };
            self.residency_container.push(allocation);
        }
        tracing::trace!("reset command container");
        Ok(())
    }

    /// Moves the first device buffer to index 0 and, with a secondary stream, the first
    /// host buffer to index 1. A kind with no buffer left gets a new generation.
    fn retain_first_generations(&mut self) -> Result<()> {
        let kinds: &[bool] = if self.use_secondary_command_stream {
            &[false, true]
        } else {
            &[false]
        };
        for &host in kinds {
            let missing = !self
                .cmd_buffer_allocations
                .iter()
                .any(|allocation| allocation.is_system_memory_forced() == host);
            if missing {
                tracing::debug!(host, "replace released first generation");
                self.next_generation(host)?;
            }
        }
        for (slot, &host) in kinds.iter().enumerate() {
            if let Some(offset) = self.cmd_buffer_allocations[slot..]
                .iter()
                .position(|allocation| allocation.is_system_memory_forced() == host)
            {
                self.cmd_buffer_allocations[slot..=slot + offset].rotate_right(1);
            }
        }
        Ok(())
    }

    fn release_deallocation_container(&mut self) {
        if self.deallocation_container.is_empty() {
            return;
        }
        let storage = self.heap_storage().clone();
        for allocation in self.deallocation_container.drain(..) {
            if allocation.allocation_type().is_heap() {
                storage.store_reusable_allocation(allocation);
            }
        }
    }

    /// Returns every owned allocation to the pools or the memory manager.
    fn release_allocations(&mut self) {
        if self.device.is_none() {
            return;
        }
        self.handle_cmd_buffer_allocations(0);
        let storage = self.heap_storage().clone();
        for slot in &mut self.heaps {
            if let Some(HeapSlot::Private(heap)) = slot.take() {
                storage.store_reusable_allocation(heap.allocation().clone());
            }
        }
        self.allocation_indirect_heaps = Default::default();
        self.release_deallocation_container();
        self.residency_container.clear();
        self.ssh_allocations.clear();
        self.command_stream = None;
        self.secondary_command_stream = None;
        if let Some(list) = self.immediate_reusable_allocation_list.take() {
            list.free_all(&**self.device().memory_manager());
        }
    }

    /// Engine whose reuse list recycles this container's heap allocations.
    fn heap_storage(&self) -> &Engine {
        match &self.immediate_engine {
            Some(engine) => engine,
            None => self.device().default_engine(),
        }
    }

    /// Adds `allocation` to the residency container. `None` is ignored.
    pub fn add_to_residency_container(&mut self, allocation: Option<&Allocation>) {
        if let Some(allocation) = allocation {
            self.residency_container.push(allocation.clone());
        }
    }

    pub fn residency_container(&self) -> &ResidencyContainer {
        &self.residency_container
    }

    pub fn remove_duplicates_from_residency_container(&mut self) {
        self.residency_container.remove_duplicates();
    }

    pub fn deallocation_container(&self) -> &[Allocation] {
        &self.deallocation_container
    }

    /// Allocations queued here are recycled on reset and destruction if they are heaps.
    /// Other allocations are only dropped from the list; their owner frees them.
    pub fn deallocation_container_mut(&mut self) -> &mut Vec<Allocation> {
        &mut self.deallocation_container
    }

    pub fn ssh_allocations(&self) -> &[Allocation] {
        &self.ssh_allocations
    }

    pub fn set_heap_dirty(&mut self, heap_type: HeapType) {
        self.dirty_heaps.set_heap_dirty(heap_type);
    }

    pub fn set_dirty_state_for_all_heaps(&mut self, dirty: bool) {
        self.dirty_heaps.set_dirty_state_for_all_heaps(dirty);
    }

    pub fn is_heap_dirty(&self, heap_type: HeapType) -> bool {
        self.dirty_heaps.is_heap_dirty(heap_type)
    }

    pub fn is_any_heap_dirty(&self) -> bool {
        self.dirty_heaps.is_any_heap_dirty()
    }

    pub fn dirty_heaps(&self) -> DirtyHeaps {
        self.dirty_heaps
    }

    /// Must be called before [`initialize`](Self::initialize).
    pub fn set_heap_address_model(&mut self, model: HeapAddressModel) {
        self.heap_address_model = model;
    }

    pub fn heap_address_model(&self) -> HeapAddressModel {
        self.heap_address_model
    }

    /// Bytes at the start of the surface-state heap that are never handed out. Must be
    /// called before [`initialize`](Self::initialize).
    pub fn set_reserved_ssh_size(&mut self, size: usize) {
        self.reserved_ssh_size = size;
    }

    pub fn set_keep_current_state_heap(&mut self, keep: bool) {
        self.keep_current_state_heap = keep;
    }

    pub fn instruction_heap_base_address(&self) -> u64 {
        self.instruction_heap_base_address
    }

    pub fn indirect_object_heap_base_address(&self) -> u64 {
        self.indirect_object_heap_base_address
    }

    pub fn is_indirect_heap_in_local_memory(&self) -> bool {
        self.allocation_indirect_heaps[HeapType::IndirectObject.index()]
            .as_ref()
            .is_some_and(Allocation::is_local_memory)
    }
}

impl Drop for CommandContainer {
    fn drop(&mut self) {
        if !self.deallocation_container.is_empty() {
            tracing::trace!(
                count = self.deallocation_container.len(),
                "dropping command container with queued deallocations"
            );
        }
        self.release_allocations();
    }
}
