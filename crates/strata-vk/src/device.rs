// SPDX-License-Identifier: CEPL-1.0
//! Logical device, role queues, command pools and command recording.

use ash::vk;
use tracing::{debug, info};

use crate::error::Result;
use crate::handle::Borrowed;
use crate::pacer::FrameInfo;
use crate::queues::QueueRoleAssignment;
use crate::state::{color_range, BarrierSink, ImageBarrier, ResourceState, TrackedImage};

/// Queue 0 of each role's family.
#[derive(Clone, Copy, Debug)]
pub struct QueueSet {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
    pub compute: vk::Queue,
}

#[derive(Clone, Copy, Debug)]
struct CommandPools {
    graphics: vk::CommandPool,
    transfer: vk::CommandPool,
    compute: vk::CommandPool,
}

pub struct Device {
    raw: ash::Device,
    roles: QueueRoleAssignment,
    queues: QueueSet,
    pools: CommandPools,
}

impl Device {
    /// Creates the device with one queue per distinct role family, the
    /// swapchain extension and the 1.3 `synchronization2` and
    /// `dynamic_rendering` features.
    pub(crate) fn new(
        instance: &ash::Instance,
        phys: vk::PhysicalDevice,
        roles: QueueRoleAssignment,
    ) -> Result<Self> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = roles
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let mut feats13 = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);

        let info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut feats13);

        let raw = unsafe { instance.create_device(phys, &info, None)? };

        let queues = unsafe {
            QueueSet {
                graphics: raw.get_device_queue(roles.graphics, 0),
                present: raw.get_device_queue(roles.present, 0),
                transfer: raw.get_device_queue(roles.transfer, 0),
                compute: raw.get_device_queue(roles.compute, 0),
            }
        };

        let pools = match create_pools(&raw, &roles) {
            Ok(pools) => pools,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(e);
            }
        };

        info!(
            "logical device ready ({} queue families)",
            queue_infos.len()
        );
        Ok(Self {
            raw,
            roles,
            queues,
            pools,
        })
    }

    #[inline]
    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn roles(&self) -> &QueueRoleAssignment {
        &self.roles
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle()? };
        Ok(())
    }

    /// Primary command buffers from the graphics pool.
    pub fn create_graphics_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pools.graphics)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.raw.allocate_command_buffers(&info)? })
    }

    pub fn free_graphics_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe {
                self.raw
                    .free_command_buffers(self.pools.graphics, buffers)
            };
        }
    }

    /// Barriers recorded into `cmd`.
    ///
    /// Presentable images are created concurrent when graphics and present
    /// are different families; their barriers then carry no family indices.
    pub fn recorder(&self, cmd: vk::CommandBuffer) -> CommandRecorder<'_> {
        CommandRecorder {
            device: &self.raw,
            cmd,
            concurrent: !self.roles.graphics_presents(),
        }
    }

    /// Begins `cmd` for one submission, runs `f`, ends it.
    pub fn record_single_use_commands<F>(&self, cmd: vk::CommandBuffer, reset: bool, f: F) -> Result<()>
    where
        F: FnOnce(&mut CommandRecorder<'_>),
    {
        unsafe {
            if reset {
                self.raw
                    .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            }
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.raw.begin_command_buffer(cmd, &begin)?;
        }

        f(&mut self.recorder(cmd));

        unsafe { self.raw.end_command_buffer(cmd)? };
        Ok(())
    }

    /// Submits `cmd` on the graphics queue with the frame's slot primitives:
    /// waits on `acquired` before color output, signals `finished` and the
    /// `in_flight` fence.
    pub fn submit_for_rendering(&self, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()> {
        let waits = [frame.acquired];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmds = [cmd];
        let signals = [frame.finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signals);
        unsafe {
            self.raw
                .queue_submit(self.queues.graphics, &[submit], frame.in_flight)?
        };
        Ok(())
    }

    /// Untracked UNDEFINED → color attachment, `initial_owner` → graphics.
    pub fn simple_rendering_start_transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        initial_owner: u32,
    ) -> ImageBarrier {
        rendering_start_barrier(&mut self.recorder(cmd), image, initial_owner, self.roles.graphics)
    }

    /// Untracked color attachment → present, released graphics → present.
    pub fn simple_rendering_end_transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
    ) -> ImageBarrier {
        rendering_end_barrier(
            &mut self.recorder(cmd),
            image,
            self.roles.graphics,
            self.roles.present,
        )
    }

    /// Pools and device. Everything allocated from them must be gone.
    pub(crate) fn destroy(&mut self) {
        unsafe {
            self.raw.destroy_command_pool(self.pools.compute, None);
            self.raw.destroy_command_pool(self.pools.transfer, None);
            self.raw.destroy_command_pool(self.pools.graphics, None);
            self.raw.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}

fn create_pools(device: &ash::Device, roles: &QueueRoleAssignment) -> Result<CommandPools> {
    let make = |family: u32| -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        Ok(unsafe { device.create_command_pool(&info, None)? })
    };

    let graphics = make(roles.graphics)?;
    let transfer = match make(roles.transfer) {
        Ok(p) => p,
        Err(e) => {
            unsafe { device.destroy_command_pool(graphics, None) };
            return Err(e);
        }
    };
    let compute = match make(roles.compute) {
        Ok(p) => p,
        Err(e) => {
            unsafe {
                device.destroy_command_pool(transfer, None);
                device.destroy_command_pool(graphics, None);
            }
            return Err(e);
        }
    };
    Ok(CommandPools {
        graphics,
        transfer,
        compute,
    })
}

fn rendering_start_barrier<S: BarrierSink + ?Sized>(
    sink: &mut S,
    image: vk::Image,
    initial_owner: u32,
    graphics: u32,
) -> ImageBarrier {
    let mut tracked = TrackedImage::new(
        Borrowed::new(image),
        color_range(),
        ResourceState::undefined(initial_owner),
    );
    tracked.transition(
        sink,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        Some(graphics),
    )
}

fn rendering_end_barrier<S: BarrierSink + ?Sized>(
    sink: &mut S,
    image: vk::Image,
    graphics: u32,
    present: u32,
) -> ImageBarrier {
    let mut tracked = TrackedImage::new(
        Borrowed::new(image),
        color_range(),
        ResourceState {
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            owner: graphics,
        },
    );
    tracked.transition(
        sink,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::ImageLayout::PRESENT_SRC_KHR,
        vk::AccessFlags2::NONE,
        Some(present),
    )
}

/// Lowers a barrier for `cmd_pipeline_barrier2`.
///
/// Concurrently shared images take no part in ownership transfers, so both
/// family indices become `QUEUE_FAMILY_IGNORED`.
pub fn lower_barrier(barrier: &ImageBarrier, concurrent: bool) -> vk::ImageMemoryBarrier2<'static> {
    let raw = barrier.to_vk();
    if concurrent {
        raw.src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
    } else {
        raw
    }
}

/// A command buffer in the recording state.
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    concurrent: bool,
}

impl CommandRecorder<'_> {
    #[inline]
    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Records a batch of barriers as a single dependency.
    pub fn flush(&mut self, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        let raw: Vec<_> = barriers
            .iter()
            .map(|b| lower_barrier(b, self.concurrent))
            .collect();
        let dep = vk::DependencyInfo::default().image_memory_barriers(&raw);
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dep) };
    }

    /// Dynamic rendering into one color view, cleared on load.
    pub fn begin_color_pass(&mut self, view: vk::ImageView, area: vk::Rect2D, clear: [f32; 4]) {
        let color = [vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            })];
        let info = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(1)
            .color_attachments(&color);
        unsafe { self.device.cmd_begin_rendering(self.cmd, &info) };
    }

    pub fn end_color_pass(&mut self) {
        unsafe { self.device.cmd_end_rendering(self.cmd) };
    }
}

impl BarrierSink for CommandRecorder<'_> {
    fn image_barrier(&mut self, barrier: &ImageBarrier) {
        self.flush(std::slice::from_ref(barrier));
    }
}
