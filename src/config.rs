//! Debug knobs that override the driver defaults.
//!
//! Every knob is an integer where `-1` means "use the default". A
//! [`Device`](crate::Device) keeps the settings it was built with, which are the defaults
//! unless [`DeviceBuilder::debug_settings`](crate::DeviceBuilder::debug_settings) was
//! given others. Containers consult them during
//! [`initialize`](crate::command::CommandContainer::initialize). Size knobs too large to
//! express in bytes are rejected when parsed.
//!
//! ```
//! use scoria::config::DebugSettings;
//!
//! let settings = DebugSettings::from_lookup(|key| match key {
//!     "OverrideCmdListCmdBufferSizeInKb" => Some("128".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(settings.cmd_buffer_size_override(), Some(128 * 1024));
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    utils::memory::KILO_BYTE,
};

/// Prefix of the environment variables read by [`DebugSettings::from_env`].
pub const ENV_PREFIX: &str = "SCORIA_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DebugSettings {
    /// Usable command buffer size in KiB.
    pub override_cmd_list_cmd_buffer_size_in_kb: i64,
    /// Number of command buffers and heaps pre-allocated for immediate command lists.
    pub set_amount_of_reusable_allocations: i64,
    /// Default heap size in KiB.
    pub force_default_heap_size: i64,
    pub use_bindless_mode: i64,
    /// `0` makes the memory manager's fence completion hook run for every command
    /// buffer released on reset and destruction.
    pub remove_user_fence_in_cmdlist_reset_and_destroy: i64,
    pub enable_immediate_cmd_list_heap_sharing: i64,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            override_cmd_list_cmd_buffer_size_in_kb: -1,
            set_amount_of_reusable_allocations: -1,
            force_default_heap_size: -1,
            use_bindless_mode: -1,
            remove_user_fence_in_cmdlist_reset_and_destroy: -1,
            enable_immediate_cmd_list_heap_sharing: -1,
        }
    }
}

impl DebugSettings {
    const KEYS: [&'static str; 6] = [
        "OverrideCmdListCmdBufferSizeInKb",
        "SetAmountOfReusableAllocations",
        "ForceDefaultHeapSize",
        "UseBindlessMode",
        "RemoveUserFenceInCmdlistResetAndDestroy",
        "EnableImmediateCmdListHeapSharing",
    ];

    /// Reads every knob from `SCORIA_<KnobName>` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Reads every knob through `lookup`. Knobs for which `lookup` returns `None` keep
    /// their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        for key in Self::KEYS {
            let Some(raw) = lookup(key) else {
                continue;
            };
            let value = raw.trim().parse::<i64>().ok();
            let value = value
                .filter(|&value| !Self::is_size_knob(key) || value < 0 || kilobytes(value).is_some())
                .ok_or_else(|| Error::InvalidSetting {
                    key,
                    value: raw.clone(),
                })?;
            *settings.knob_mut(key) = value;
            tracing::debug!(key, value, "debug setting override");
        }
        Ok(settings)
    }

    fn is_size_knob(key: &str) -> bool {
        matches!(key, "OverrideCmdListCmdBufferSizeInKb" | "ForceDefaultHeapSize")
    }

    fn knob_mut(&mut self, key: &str) -> &mut i64 {
        match key {
            "OverrideCmdListCmdBufferSizeInKb" => &mut self.override_cmd_list_cmd_buffer_size_in_kb,
            "SetAmountOfReusableAllocations" => &mut self.set_amount_of_reusable_allocations,
            "ForceDefaultHeapSize" => &mut self.force_default_heap_size,
            "UseBindlessMode" => &mut self.use_bindless_mode,
            "RemoveUserFenceInCmdlistResetAndDestroy" => {
                &mut self.remove_user_fence_in_cmdlist_reset_and_destroy
            }
            "EnableImmediateCmdListHeapSharing" => &mut self.enable_immediate_cmd_list_heap_sharing,
            _ => unreachable!("unknown debug setting {key}"),
        }
    }

    /// Usable command buffer size in bytes, if overridden.
    pub fn cmd_buffer_size_override(&self) -> Option<usize> {
        positive_kilobytes(self.override_cmd_list_cmd_buffer_size_in_kb)
    }

    /// Default heap size in bytes, if overridden.
    pub fn default_heap_size_override(&self) -> Option<usize> {
        positive_kilobytes(self.force_default_heap_size)
    }

    pub fn reusable_allocations(&self, default: usize) -> usize {
        usize::try_from(self.set_amount_of_reusable_allocations).unwrap_or(default)
    }

    pub fn bindless_mode(&self, default: bool) -> bool {
        flag(self.use_bindless_mode).unwrap_or(default)
    }

    pub fn immediate_heap_sharing(&self, default: bool) -> bool {
        flag(self.enable_immediate_cmd_list_heap_sharing).unwrap_or(default)
    }

    /// Whether released command buffers go through the memory manager's fence
    /// completion hook.
    pub fn handle_fence_completion_on_release(&self) -> bool {
        self.remove_user_fence_in_cmdlist_reset_and_destroy == 0
    }
}

fn positive_kilobytes(value: i64) -> Option<usize> {
    kilobytes(value).filter(|&bytes| bytes > 0)
}

/// `value` KiB in bytes. `None` for negative values and sizes that overflow `usize`.
fn kilobytes(value: i64) -> Option<usize> {
    usize::try_from(value).ok()?.checked_mul(KILO_BYTE)
}

fn flag(value: i64) -> Option<bool> {
    (value >= 0).then_some(value != 0)
}
