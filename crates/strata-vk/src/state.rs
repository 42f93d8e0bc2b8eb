// SPDX-License-Identifier: CEPL-1.0
//! Per-image access state and barrier synthesis.
//!
//! A [`TrackedImage`] remembers the layout, pending access and owning queue
//! family its image was last left in. Every [`TrackedImage::transition`]
//! emits one barrier from that state to the requested one and then adopts
//! the new state. Nothing is deduplicated: each call is a real use.

use ash::vk;

use crate::handle::Borrowed;

/// Last-known (layout, access, owner) of a tracked image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceState {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags2,
    pub owner: u32,
}

impl ResourceState {
    /// Contents discarded, nothing pending, owned by `owner`.
    pub fn undefined(owner: u32) -> Self {
        Self {
            layout: vk::ImageLayout::UNDEFINED,
            access: vk::AccessFlags2::NONE,
            owner,
        }
    }
}

/// Plain-data description of one image memory barrier.
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_owner: u32,
    pub dst_owner: u32,
}

impl ImageBarrier {
    pub fn is_ownership_transfer(&self) -> bool {
        self.src_owner != self.dst_owner
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(self.src_owner)
            .dst_queue_family_index(self.dst_owner)
            .image(self.image)
            .subresource_range(self.range)
    }
}

// ash leaves `ImageSubresourceRange` without `PartialEq`.
impl PartialEq for ImageBarrier {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
            && range_eq(&self.range, &other.range)
            && self.src_stage == other.src_stage
            && self.dst_stage == other.dst_stage
            && self.src_access == other.src_access
            && self.dst_access == other.dst_access
            && self.old_layout == other.old_layout
            && self.new_layout == other.new_layout
            && self.src_owner == other.src_owner
            && self.dst_owner == other.dst_owner
    }
}

impl Eq for ImageBarrier {}

/// Field-wise subresource range equality.
pub fn range_eq(a: &vk::ImageSubresourceRange, b: &vk::ImageSubresourceRange) -> bool {
    a.aspect_mask == b.aspect_mask
        && a.base_mip_level == b.base_mip_level
        && a.level_count == b.level_count
        && a.base_array_layer == b.base_array_layer
        && a.layer_count == b.layer_count
}

/// Destination for emitted barriers: a command buffer, or a batch.
pub trait BarrierSink {
    fn image_barrier(&mut self, barrier: &ImageBarrier);
}

/// Collects barriers so they can be flushed in a single dependency.
impl BarrierSink for Vec<ImageBarrier> {
    fn image_barrier(&mut self, barrier: &ImageBarrier) {
        self.push(*barrier);
    }
}

/// Single mip, single layer color range; what presentable images use.
pub fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// An image plus the state it was last left in.
///
/// Does not own the image; it only tracks how it is being used.
#[derive(Debug)]
pub struct TrackedImage {
    image: Borrowed<vk::Image>,
    range: vk::ImageSubresourceRange,
    state: ResourceState,
}

impl TrackedImage {
    pub fn new(
        image: Borrowed<vk::Image>,
        range: vk::ImageSubresourceRange,
        initial: ResourceState,
    ) -> Self {
        Self {
            image,
            range,
            state: initial,
        }
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.raw()
    }

    #[inline]
    pub fn range(&self) -> vk::ImageSubresourceRange {
        self.range
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    // Overrides for changes made outside `transition`; no GPU command.
    pub fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.state.layout = layout;
    }

    pub fn set_access(&mut self, access: vk::AccessFlags2) {
        self.state.access = access;
    }

    pub fn set_owner(&mut self, owner: u32) {
        self.state.owner = owner;
    }

    /// Emits a barrier into `sink` and adopts the new state.
    ///
    /// `new_owner = None` keeps the current owner (same-queue transition).
    /// Returns the barrier that was emitted.
    pub fn transition<S: BarrierSink + ?Sized>(
        &mut self,
        sink: &mut S,
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
        new_layout: vk::ImageLayout,
        new_access: vk::AccessFlags2,
        new_owner: Option<u32>,
    ) -> ImageBarrier {
        let dst_owner = match new_owner {
            Some(owner) => owner,
            None => self.state.owner,
        };

        let barrier = ImageBarrier {
            image: self.image.raw(),
            range: self.range,
            src_stage,
            dst_stage,
            src_access: self.state.access,
            dst_access: new_access,
            old_layout: self.state.layout,
            new_layout,
            src_owner: self.state.owner,
            dst_owner,
        };
        sink.image_barrier(&barrier);

        self.state = ResourceState {
            layout: new_layout,
            access: new_access,
            owner: dst_owner,
        };
        barrier
    }
}
