//! Error types.
//!
//! Only runtime conditions that a caller can act on are reported through [`Error`].
//! Misuse of the container API (touching a heap that was never provisioned, asking for
//! more space than a shared heap holds outside of a reservation, writing past the end of
//! a stream) is a bug in the caller and panics instead.

use crate::allocation::AllocationType;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The memory manager could not satisfy an allocation request.
    #[error(
        "out of device memory: {requested} bytes of {allocation_type:?} on root device {root_device_index}"
    )]
    OutOfDeviceMemory {
        requested: usize,
        allocation_type: AllocationType,
        root_device_index: u32,
    },

    /// A debug setting could not be parsed.
    #[error("invalid value {value:?} for debug setting {key}")]
    InvalidSetting { key: &'static str, value: String },
}

impl Error {
    /// Returns true for allocation failures.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Error::OutOfDeviceMemory { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
