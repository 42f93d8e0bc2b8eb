// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain (swapchain) and its per-image state seeds.
//!
//! [`configure`] is the pure decision step: format, present mode, image
//! count and extent from what the surface reports. [`PresentableChain`]
//! owns the swapchain, one view per image and the last-known
//! [`ResourceState`] of every image, and rebuilds all of it in place when
//! the surface goes stale.

use ash::vk;
use tracing::{debug, info};

use crate::driver::SwapchainDriver;
use crate::error::{Error, Result};
use crate::handle::{Borrowed, Owned, OwnedView};
use crate::queues::QueueRoleAssignment;
use crate::state::{color_range, ResourceState, TrackedImage};

pub use strata_core::RenderSize;

/// Everything [`configure`] decides for one chain build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// First 8-bit sRGB format in the sRGB non-linear color space, else the
/// first format the surface lists.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let first = formats.first().copied().ok_or(Error::NoSurfaceFormats)?;
    Ok(formats
        .iter()
        .copied()
        .find(|f| {
            matches!(
                f.format,
                vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB
            ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(first))
}

/// Mailbox when offered; FIFO is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One more than the minimum, capped by the maximum (0 == no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

/// The surface's current extent, unless it is the `u32::MAX` "pick one"
/// sentinel; then the framebuffer size clamped into the allowed range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub fn configure(
    caps: &vk::SurfaceCapabilitiesKHR,
    present_modes: &[vk::PresentModeKHR],
    formats: &[vk::SurfaceFormatKHR],
    requested: RenderSize,
) -> Result<ChainDescriptor> {
    Ok(ChainDescriptor {
        format: choose_surface_format(formats)?,
        present_mode: choose_present_mode(present_modes),
        image_count: choose_image_count(caps),
        extent: choose_extent(caps, requested),
        pre_transform: caps.current_transform,
    })
}

/// Exclusive when graphics presents itself, otherwise concurrent across
/// both families.
pub fn sharing_for(roles: &QueueRoleAssignment) -> (vk::SharingMode, Vec<u32>) {
    if roles.graphics_presents() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![roles.graphics, roles.present],
        )
    }
}

#[derive(Debug)]
struct ChainImage {
    image: Borrowed<vk::Image>,
    view: OwnedView,
    state: ResourceState,
}

pub struct PresentableChain {
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<ChainImage>,
    descriptor: ChainDescriptor,
    roles: QueueRoleAssignment,
    usage: vk::ImageUsageFlags,
    reloaded: bool,
}

impl PresentableChain {
    pub fn new<D: SwapchainDriver>(
        driver: &D,
        surface: vk::SurfaceKHR,
        roles: QueueRoleAssignment,
        framebuffer: RenderSize,
    ) -> Result<Self> {
        let mut chain = Self {
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            descriptor: ChainDescriptor {
                format: vk::SurfaceFormatKHR::default(),
                present_mode: vk::PresentModeKHR::FIFO,
                image_count: 0,
                extent: vk::Extent2D::default(),
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            },
            roles,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            reloaded: false,
        };
        chain.rebuild(driver, framebuffer)?;
        Ok(chain)
    }

    /// Re-queries the surface and builds a new swapchain in place.
    ///
    /// The old swapchain is passed as the reuse hint and torn down, with its
    /// views, only after the device has gone idle. Every image comes back as
    /// undefined / no access / graphics-owned and the reload flag is raised.
    pub fn rebuild<D: SwapchainDriver>(&mut self, driver: &D, framebuffer: RenderSize) -> Result<()> {
        let caps = driver.surface_capabilities()?;
        let modes = driver.present_modes()?;
        let formats = driver.surface_formats()?;
        let desc = configure(&caps, &modes, &formats, framebuffer)?;

        let (sharing, families) = sharing_for(&self.roles);
        let old = self.swapchain;
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(self.usage)
            .image_sharing_mode(sharing)
            .queue_family_indices(&families)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = driver.create_swapchain(&info)?;

        if old != vk::SwapchainKHR::null() {
            if let Err(e) = driver.wait_idle() {
                // Never handed out; the old chain stays current.
                driver.destroy_swapchain(swapchain);
                return Err(e.into());
            }
            self.release_images(driver);
            driver.destroy_swapchain(old);
        }
        self.swapchain = swapchain;
        self.descriptor = desc;

        let owner = self.roles.graphics;
        for image in driver.swapchain_images(swapchain)? {
            let view = driver.create_image_view(image, desc.format.format)?;
            self.images.push(ChainImage {
                image: Borrowed::new(image),
                view: Owned::new(view),
                state: ResourceState::undefined(owner),
            });
        }
        self.reloaded = true;

        info!(
            "presentable chain built: {} images, {}x{}, {:?}/{:?}, {:?}",
            self.images.len(),
            desc.extent.width,
            desc.extent.height,
            desc.format.format,
            desc.format.color_space,
            desc.present_mode
        );
        Ok(())
    }

    fn release_images<D: SwapchainDriver>(&mut self, driver: &D) {
        for img in self.images.drain(..) {
            img.view.release(|v| driver.destroy_image_view(v));
        }
    }

    /// Destroys views and the swapchain. The device must be idle.
    pub fn destroy<D: SwapchainDriver>(&mut self, driver: &D) {
        self.release_images(driver);
        if self.swapchain != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
        debug!("presentable chain destroyed");
    }

    /// Returns the reload flag and clears it.
    pub fn take_reloaded(&mut self) -> bool {
        std::mem::replace(&mut self.reloaded, false)
    }

    pub fn is_reloaded(&self) -> bool {
        self.reloaded
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn descriptor(&self) -> &ChainDescriptor {
        &self.descriptor
    }

    pub fn format(&self) -> vk::Format {
        self.descriptor.format.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.descriptor.format.color_space
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.descriptor.extent
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn slot(&self, index: u32) -> Result<&ChainImage> {
        self.images
            .get(index as usize)
            .ok_or(Error::ImageIndexOutOfRange {
                index,
                count: self.images.len(),
            })
    }

    pub fn image(&self, index: u32) -> Result<vk::Image> {
        Ok(self.slot(index)?.image.raw())
    }

    pub fn view(&self, index: u32) -> Result<vk::ImageView> {
        Ok(self.slot(index)?.view.raw())
    }

    pub fn image_state(&self, index: u32) -> Result<ResourceState> {
        Ok(self.slot(index)?.state)
    }

    /// Records where the caller left an image, for the next acquire.
    pub fn set_image_state(&mut self, index: u32, state: ResourceState) -> Result<()> {
        let count = self.images.len();
        let img = self
            .images
            .get_mut(index as usize)
            .ok_or(Error::ImageIndexOutOfRange { index, count })?;
        img.state = state;
        Ok(())
    }

    pub fn images(&self) -> impl Iterator<Item = vk::Image> + '_ {
        self.images.iter().map(|i| i.image.raw())
    }

    /// Tracker for one image, seeded from its last-known state.
    pub fn tracker(&self, index: u32) -> Result<TrackedImage> {
        let img = self.slot(index)?;
        Ok(TrackedImage::new(img.image, color_range(), img.state))
    }

    /// One tracker per image, in image order.
    pub fn seed_trackers(&self) -> Vec<TrackedImage> {
        self.images
            .iter()
            .map(|i| TrackedImage::new(i.image, color_range(), i.state))
            .collect()
    }

    /// Images are shared across two families when graphics does not present.
    pub fn is_concurrent(&self) -> bool {
        !self.roles.graphics_presents()
    }

    pub fn area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.descriptor.extent,
        }
    }

    pub fn viewport(&self, min_depth: f32, max_depth: f32) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.descriptor.extent.width as f32,
            height: self.descriptor.extent.height as f32,
            min_depth,
            max_depth,
        }
    }
}
