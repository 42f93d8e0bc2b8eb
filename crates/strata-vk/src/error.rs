// SPDX-License-Identifier: CEPL-1.0
//! Error taxonomy for the Vulkan core.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Propagated API failure.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("no queue family with graphics capability")]
    NoGraphicsQueue,

    #[error("no queue family supports presentation to this surface")]
    NoPresentQueue,

    #[error("no queue family with compute capability")]
    NoComputeQueue,

    #[error("no physical device with the required queue roles and Vulkan 1.3 features")]
    NoSuitableDevice,

    /// The fence wait is unbounded, so anything but success is unexpected.
    #[error("unbounded fence wait returned {0}")]
    FenceWait(vk::Result),

    #[error("image acquisition failed again after rebuilding the chain: {0}")]
    AcquireRetryFailed(vk::Result),

    #[error("frame slot {slot} was reset but never submitted; pacing cannot continue")]
    SlotPoisoned { slot: usize },

    #[error("surface reports no formats")]
    NoSurfaceFormats,

    #[error("image index {index} out of range for a chain of {count} images")]
    ImageIndexOutOfRange { index: u32, count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
