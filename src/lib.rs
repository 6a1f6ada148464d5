//! # Scoria
//!
//! Command buffer and indirect heap management for GPU command lists.
//!
//! Scoria owns the memory a command list encodes into. It hands out command space and
//! heap space, grows and chains buffers when they fill up, and keeps track of what the
//! GPU needs resident and which heap bases need reprogramming. It does not encode
//! commands itself.
//!
//! ## Quick Start
//!
//! ```
//! use scoria::prelude::*;
//!
//! let device = Device::builder(0).build();
//! let mut container = CommandContainer::new();
//! container.initialize(&device, None, true, false).unwrap();
//!
//! let ptr = container.command_space(16).unwrap();
//! assert_eq!(ptr, container.command_stream().cpu_base());
//! ```
//!
//! ## Overview
//!
//! ### Devices and Memory
//!
//! A [`Device`] describes the hardware through [`HardwareCapabilities`] and allocates
//! through a [`MemoryManager`]. [`HostMemoryManager`] backs allocations with host memory;
//! drivers plug in their own manager. Every [`Allocation`] is reference counted and
//! remembers, per engine context, the task count of the last submission that used it.
//!
//! ### Command Containers
//!
//! A [`CommandContainer`](command::CommandContainer) holds the command buffer chain and
//! the three [`IndirectHeap`]s of one command list:
//!
//! - [`command_space`](command::CommandContainer::command_space) chains a new command
//!   buffer when the current one is full.
//! - [`heap_space_allow_grow`](command::CommandContainer::heap_space_allow_grow) moves a
//!   heap to a larger allocation when it is full and marks it dirty.
//! - [`reset`](command::CommandContainer::reset) goes back to the first command buffer
//!   and rewinds the heaps.
//!
//! ### Reuse
//!
//! Released command buffers and heaps are recycled instead of freed:
//!
//! - [`ReusableAllocationList`](pool::ReusableAllocationList) - a process-wide list
//!   command buffers return to on reset.
//! - [`Engine`] heap storage - heap allocations released by containers on that engine.
//! - Immediate command lists tag released buffers with the engine's next task count and
//!   only take them back once the engine's completion fence has passed it.
//!
//! ### Heap Sharing
//!
//! Immediate command lists on one engine can share surface-state and dynamic-state
//! heaps. They reserve space per dispatch with
//! [`reserve_space_for_dispatch`](command::CommandContainer::reserve_space_for_dispatch)
//! under the engine's reentrant lock.
//!
//! ## Debug Settings
//!
//! Sizes and modes can be overridden with `SCORIA_*` environment variables. Devices use
//! the driver defaults unless the settings are loaded and passed to the builder:
//!
//! ```
//! use scoria::{Device, config::DebugSettings};
//!
//! let settings = DebugSettings::from_env()?;
//! let device = Device::builder(0).debug_settings(settings).build();
//! # Ok::<(), scoria::Error>(())
//! ```

pub mod alloc;
pub mod allocation;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod heap;
pub mod pool;
pub mod stream;
pub mod sync;
pub mod tracking;
pub mod utils;

pub use alloc::{HostMemoryManager, MemoryManager};
pub use allocation::{Allocation, AllocationType};
pub use device::{Device, DeviceBuilder, HardwareCapabilities, HasDevice};
pub use error::{Error, Result};
pub use heap::{HeapType, IndirectHeap};
pub use sync::Engine;

pub mod prelude {
    pub use crate::{
        Allocation, AllocationType, Device, Engine, HardwareCapabilities, HasDevice,
        MemoryManager,
        command::{CommandContainer, HeapReserveArguments},
        heap::{HeapType, IndirectHeap, ReservedIndirectHeap},
        pool::ReusableAllocationList,
        stream::LinearStream,
    };
}
