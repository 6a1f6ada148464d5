//! Devices and their capabilities.
//!
//! A [`Device`] bundles what a container needs to know about the hardware it encodes
//! for: the root device index, the [`HardwareCapabilities`], the memory manager that
//! backs every allocation, the default engine whose heap storage recycles heap
//! allocations, and the [`DebugSettings`] read when the device was built.
//!
//! ```
//! use scoria::{Device, HardwareCapabilities};
//!
//! let device = Device::builder(0)
//!     .capabilities(HardwareCapabilities {
//!         supports_images: false,
//!         ..Default::default()
//!     })
//!     .build();
//! assert_eq!(device.root_device_index(), 0);
//! ```

use std::{fmt::Debug, sync::Arc};

use crate::{
    alloc::{HostMemoryManager, MemoryManager},
    config::DebugSettings,
    sync::Engine,
    utils::memory::{CACHE_LINE_SIZE, KILO_BYTE, PAGE_SIZE, PAGE_SIZE_64K},
};

/// `MI_BATCH_BUFFER_END`.
pub const BATCH_BUFFER_END: [u8; 4] = 0x0500_0000u32.to_le_bytes();

/// A trait for types created from a [`Device`].
pub trait HasDevice {
    fn device(&self) -> &Device;

    fn root_device_index(&self) -> u32 {
        self.device().root_device_index()
    }
}

/// Hardware constants consumed by containers.
#[derive(Debug, Clone)]
pub struct HardwareCapabilities {
    /// Devices without image support have no dynamic-state heap.
    pub supports_images: bool,
    pub local_memory: bool,
    /// Kernel ISA is placed in system memory even when local memory exists.
    pub use_system_memory_placement_for_isa: bool,
    pub num_generic_sub_devices: u32,
    /// Default size of the dynamic-state and indirect-object heaps.
    pub default_heap_size: usize,
    pub default_ssh_size: usize,
    /// Default usable size of a command buffer.
    pub default_cmd_buffer_size: usize,
    /// Tail of every command buffer that is never handed out to the encoder. Covers the
    /// command streamer prefetching past the last command.
    pub cmd_buffer_reserved_size: usize,
    /// Granularity command buffer allocations are rounded up to.
    pub cmd_buffer_alignment: usize,
    /// Command written at the end of a command buffer.
    pub batch_buffer_end: Vec<u8>,
    /// Buffers pre-allocated per immediate command list unless overridden.
    pub default_reusable_allocations: usize,
    pub bindless_mode: bool,
}

impl Default for HardwareCapabilities {
    fn default() -> Self {
        let cmd_buffer_reserved_size = CACHE_LINE_SIZE + PAGE_SIZE;
        Self {
            supports_images: true,
            local_memory: false,
            use_system_memory_placement_for_isa: false,
            num_generic_sub_devices: 0,
            default_heap_size: 64 * KILO_BYTE,
            default_ssh_size: 64 * KILO_BYTE,
            default_cmd_buffer_size: 256 * KILO_BYTE - cmd_buffer_reserved_size,
            cmd_buffer_reserved_size,
            cmd_buffer_alignment: PAGE_SIZE_64K,
            batch_buffer_end: BATCH_BUFFER_END.to_vec(),
            default_reusable_allocations: 0,
            bindless_mode: false,
        }
    }
}

/// A root device.
///
/// Cloning is cheap and yields a handle to the same device.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

struct DeviceInner {
    root_device_index: u32,
    capabilities: HardwareCapabilities,
    memory_manager: Arc<dyn MemoryManager>,
    default_engine: Engine,
    debug_settings: DebugSettings,
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Device {}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device")
            .field(&self.0.root_device_index)
            .finish()
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(root_device_index = self.root_device_index, "drop device");
    }
}

impl Device {
    pub fn builder(root_device_index: u32) -> DeviceBuilder {
        DeviceBuilder::new(root_device_index)
    }

    pub fn root_device_index(&self) -> u32 {
        self.0.root_device_index
    }

    pub fn capabilities(&self) -> &HardwareCapabilities {
        &self.0.capabilities
    }

    pub fn memory_manager(&self) -> &Arc<dyn MemoryManager> {
        &self.0.memory_manager
    }

    /// The engine whose heap storage recycles heap allocations of regular command lists.
    pub fn default_engine(&self) -> &Engine {
        &self.0.default_engine
    }

    pub fn debug_settings(&self) -> &DebugSettings {
        &self.0.debug_settings
    }

    /// Allocations need to be usable from more than one engine context.
    pub fn is_multi_os_context_capable(&self) -> bool {
        self.0.capabilities.num_generic_sub_devices > 1
    }

    /// Creates another engine context on this device, e.g. for an immediate command list.
    pub fn create_engine(&self) -> Engine {
        Engine::with_multi_os_context(
            self.root_device_index(),
            self.0.memory_manager.clone(),
            self.is_multi_os_context_capable(),
        )
    }
}

/// A builder for [`Device`]s.
///
/// Unless configured otherwise the device uses default [`HardwareCapabilities`], a
/// [`HostMemoryManager`], and default [`DebugSettings`].
pub struct DeviceBuilder {
    root_device_index: u32,
    capabilities: HardwareCapabilities,
    memory_manager: Option<Arc<dyn MemoryManager>>,
    debug_settings: DebugSettings,
}

impl DeviceBuilder {
    pub fn new(root_device_index: u32) -> Self {
        Self {
            root_device_index,
            capabilities: HardwareCapabilities::default(),
            memory_manager: None,
            debug_settings: DebugSettings::default(),
        }
    }

    pub fn capabilities(mut self, capabilities: HardwareCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn memory_manager(mut self, memory_manager: Arc<dyn MemoryManager>) -> Self {
        self.memory_manager = Some(memory_manager);
        self
    }

    pub fn debug_settings(mut self, debug_settings: DebugSettings) -> Self {
        self.debug_settings = debug_settings;
        self
    }

    pub fn build(self) -> Device {
        let memory_manager = self.memory_manager.unwrap_or_else(|| {
            Arc::new(HostMemoryManager::new().with_local_memory(self.capabilities.local_memory))
        });
        let default_engine = Engine::with_multi_os_context(
            self.root_device_index,
            memory_manager.clone(),
            self.capabilities.num_generic_sub_devices > 1,
        );
        tracing::info!(
            root_device_index = self.root_device_index,
            supports_images = self.capabilities.supports_images,
            local_memory = self.capabilities.local_memory,
            "create device"
        );
        Device(Arc::new(DeviceInner {
            root_device_index: self.root_device_index,
            capabilities: self.capabilities,
            memory_manager,
            default_engine,
            debug_settings: self.debug_settings,
        }))
    }
}
