// SPDX-License-Identifier: CEPL-1.0
//! Vulkan core for strata.
//!
//! - [`queues`]: queue-family role selection
//! - [`state`]: per-image state tracking and barrier synthesis
//! - [`chain`]: the presentable image chain and its rebuilds
//! - [`pacer`]: two-slot frame pacing (acquire, record, present)
//! - [`device`] / [`context`]: the orchestration around them
#![deny(unsafe_op_in_unsafe_fn)]

pub mod chain;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
pub mod handle;
pub mod pacer;
pub mod queues;
pub mod state;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainDescriptor, PresentableChain, RenderSize};
pub use context::{Context, ContextDesc};
pub use device::{CommandRecorder, Device, QueueSet};
pub use error::{Error, Result};
pub use pacer::{FrameInfo, FramePacer, FrameStatus, FRAMES_IN_FLIGHT};
pub use queues::{QueueRoleAssignment, QueueSelector};
pub use state::{BarrierSink, ImageBarrier, ResourceState, TrackedImage};
pub use validation::{Severity, TracingSink, ValidationSink};

pub use ash::vk;
