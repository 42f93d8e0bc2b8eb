// SPDX-License-Identifier: CEPL-1.0
//! Context: instance, surface, device, presentable chain and frame pacer
//! behind one construction and one teardown.

use std::ffi::{CStr, CString};

use anyhow::{anyhow, Context as _};
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::chain::{PresentableChain, RenderSize};
use crate::device::Device;
use crate::driver::AshDriver;
use crate::error::Error;
use crate::pacer::{FrameInfo, FramePacer, FrameStatus};
use crate::queues::{QueueRoleAssignment, QueueSelector};
use crate::state::TrackedImage;
use crate::validation::{self, Messenger, ValidationSink};

/// What the caller decides about a context; everything else is queried.
#[derive(Clone, Debug)]
pub struct ContextDesc {
    pub app_name: String,
    pub validation: bool,
    pub framebuffer: RenderSize,
}

impl Default for ContextDesc {
    fn default() -> Self {
        Self {
            app_name: "strata".to_owned(),
            validation: cfg!(debug_assertions),
            framebuffer: RenderSize {
                width: 1280,
                height: 720,
            },
        }
    }
}

pub struct Context {
    _entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<Messenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    device: Device,
    driver: AshDriver,
    chain: PresentableChain,
    pacer: FramePacer,
}

impl Context {
    // STRICT ORDER:
    // instance (+ messenger) -> surface -> physical device + queue roles
    // (present support is checked against THIS surface) -> device -> chain
    // -> frame slots. Each failure unwinds what was built before it.
    pub fn new<W>(window: &W, desc: &ContextDesc, sink: Box<dyn ValidationSink>) -> anyhow::Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let dh = window
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = ash::Entry::linked();
        let extensions = ash_window::enumerate_required_extensions(dh)
            .context("enumerate_required_extensions")?;
        let (instance, messenger) = create_instance(&entry, extensions, desc, sink)?;

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                destroy_instance(instance, messenger);
                return Err(anyhow!(e).context("ash_window::create_surface"));
            }
        };

        let picked = pick_physical_device(&instance, &surface_loader, surface).and_then(
            |(phys, roles)| Device::new(&instance, phys, roles).map(|d| (phys, d)),
        );
        let (phys, mut device) = match picked {
            Ok(v) => v,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(instance, messenger);
                return Err(anyhow!(e).context("device selection"));
            }
        };

        let driver = AshDriver::new(
            &instance,
            device.raw(),
            surface_loader.clone(),
            phys,
            surface,
            device.queues().present,
        );

        let mut chain = match PresentableChain::new(&driver, surface, *device.roles(), desc.framebuffer) {
            Ok(c) => c,
            Err(e) => {
                device.destroy();
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(instance, messenger);
                return Err(anyhow!(e).context("presentable chain"));
            }
        };

        let pacer = match FramePacer::new(&driver) {
            Ok(p) => p,
            Err(e) => {
                chain.destroy(&driver);
                device.destroy();
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(instance, messenger);
                return Err(anyhow!(e).context("frame slots"));
            }
        };

        Ok(Self {
            _entry: entry,
            instance,
            messenger,
            surface_loader,
            surface,
            phys,
            device,
            driver,
            chain,
            pacer,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn roles(&self) -> &QueueRoleAssignment {
        self.device.roles()
    }

    pub fn chain(&self) -> &PresentableChain {
        &self.chain
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn presented(&self) -> u64 {
        self.pacer.presented()
    }

    /// One paced frame; see [`FramePacer::render_frame`].
    ///
    /// A 0x0 framebuffer (minimised window) skips without touching the chain.
    pub fn render_frame<F>(&mut self, framebuffer: RenderSize, f: F) -> anyhow::Result<FrameStatus>
    where
        F: FnOnce(&Device, &FrameInfo, &mut TrackedImage) -> anyhow::Result<()>,
    {
        if framebuffer.is_empty() {
            debug!("framebuffer is 0x0; frame skipped");
            return Ok(FrameStatus::Skipped);
        }
        let Self {
            device,
            driver,
            chain,
            pacer,
            ..
        } = self;
        pacer.render_frame(chain, driver, framebuffer, |info, img| f(device, info, img))
    }

    /// Rebuilds the chain when the window size no longer matches it.
    ///
    /// Needed where the surface leaves the extent to the application and
    /// never reports the chain as stale.
    pub fn resize(&mut self, framebuffer: RenderSize) -> anyhow::Result<()> {
        if !needs_rebuild(self.chain.extent(), framebuffer) {
            return Ok(());
        }
        self.chain
            .rebuild(&self.driver, framebuffer)
            .context("rebuild presentable chain on resize")?;
        Ok(())
    }
}

// STRICT TEARDOWN ORDER:
// - device idle (no submission may still reference anything below)
// - slot semaphores/fences
// - chain views, then the swapchain
// - command pools, then the device
// - surface AFTER device; debug messenger, then instance last.
impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("device_wait_idle during teardown: {e}");
        }
        self.pacer.destroy(&self.driver);
        self.chain.destroy(&self.driver);
        self.device.destroy();
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
        if let Some(messenger) = self.messenger.take() {
            messenger.destroy();
        }
        unsafe { self.instance.destroy_instance(None) };
        info!("vulkan context destroyed");
    }
}

/// A minimised (0x0) window never triggers a rebuild.
fn needs_rebuild(extent: vk::Extent2D, framebuffer: RenderSize) -> bool {
    !framebuffer.is_empty()
        && (extent.width != framebuffer.width || extent.height != framebuffer.height)
}

fn create_instance(
    entry: &ash::Entry,
    platform_extensions: &[*const std::ffi::c_char],
    desc: &ContextDesc,
    sink: Box<dyn ValidationSink>,
) -> anyhow::Result<(ash::Instance, Option<Messenger>)> {
    let app_name = CString::new(desc.app_name.as_str()).context("application name")?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .engine_name(c"strata")
        .api_version(vk::API_VERSION_1_3);

    let validation = desc.validation && validation::layer_available(entry);
    if desc.validation && !validation {
        warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }

    let mut extensions = platform_extensions.to_vec();
    let mut layers = Vec::new();
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        layers.push(validation::VALIDATION_LAYER.as_ptr());
    }

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    let instance = unsafe { entry.create_instance(&info, None) }.context("create_instance")?;

    let messenger = if validation {
        match Messenger::new(entry, &instance, sink) {
            Ok(m) => Some(m),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(anyhow!(e).context("create_debug_utils_messenger"));
            }
        }
    } else {
        None
    };
    info!("vulkan instance created (validation: {validation})");
    Ok((instance, messenger))
}

fn destroy_instance(instance: ash::Instance, messenger: Option<Messenger>) {
    if let Some(m) = messenger {
        m.destroy();
    }
    unsafe { instance.destroy_instance(None) };
}

/// Vulkan 1.3 with both features the core records with.
fn meets_requirements(api_version: u32, feats13: &vk::PhysicalDeviceVulkan13Features<'_>) -> bool {
    let (major, minor) = (
        vk::api_version_major(api_version),
        vk::api_version_minor(api_version),
    );
    let version_ok = major > 1 || (major == 1 && minor >= 3);
    version_ok && feats13.synchronization2 == vk::TRUE && feats13.dynamic_rendering == vk::TRUE
}

/// Lower is better.
fn device_rank(kind: vk::PhysicalDeviceType) -> u8 {
    match kind {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        _ => 3,
    }
}

fn has_extension(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|e| e.extension_name_as_c_str().map(|n| n == name).unwrap_or(false))
}

/// First best-ranked device that meets the requirements and yields a full
/// queue-role assignment for `surface`.
fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> crate::Result<(vk::PhysicalDevice, QueueRoleAssignment)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let mut best: Option<(u8, vk::PhysicalDevice, QueueRoleAssignment)> = None;
    let mut last_queue_error = None;

    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut feats13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut feats2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut feats13);
        unsafe { instance.get_physical_device_features2(phys, &mut feats2) };
        if !meets_requirements(props.api_version, &feats13) {
            debug!("skipping {name}: needs Vulkan 1.3 with synchronization2 + dynamic_rendering");
            continue;
        }

        let exts = unsafe { instance.enumerate_device_extension_properties(phys)? };
        if !has_extension(&exts, ash::khr::swapchain::NAME) {
            debug!("skipping {name}: no VK_KHR_swapchain");
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let roles = match QueueSelector::select(&families, |i| unsafe {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .map_err(Error::from)
        }) {
            Ok(roles) => roles,
            Err(e) => {
                debug!("skipping {name}: {e}");
                last_queue_error = Some(e);
                continue;
            }
        };

        let rank = device_rank(props.device_type);
        if best.as_ref().map_or(true, |(r, _, _)| rank < *r) {
            info!("candidate device: {name} ({:?})", props.device_type);
            best = Some((rank, phys, roles));
        }
    }

    match best {
        Some((_, phys, roles)) => Ok((phys, roles)),
        None => Err(last_queue_error.unwrap_or(Error::NoSuitableDevice)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feats(sync2: bool, dynren: bool) -> vk::PhysicalDeviceVulkan13Features<'static> {
        vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(sync2)
            .dynamic_rendering(dynren)
    }

    #[test]
    fn requires_vulkan_1_3_and_both_features() {
        let v13 = vk::make_api_version(0, 1, 3, 250);
        let v12 = vk::make_api_version(0, 1, 2, 198);
        assert!(meets_requirements(v13, &feats(true, true)));
        assert!(!meets_requirements(v12, &feats(true, true)));
        assert!(!meets_requirements(v13, &feats(true, false)));
        assert!(!meets_requirements(v13, &feats(false, true)));
        assert!(meets_requirements(vk::make_api_version(0, 1, 4, 0), &feats(true, true)));
    }

    #[test]
    fn discrete_ranks_first() {
        use vk::PhysicalDeviceType as T;
        assert!(device_rank(T::DISCRETE_GPU) < device_rank(T::INTEGRATED_GPU));
        assert!(device_rank(T::INTEGRATED_GPU) < device_rank(T::CPU));
    }

    #[test]
    fn extension_lookup_matches_exact_names() {
        let mut props = vk::ExtensionProperties::default();
        let name = ash::khr::swapchain::NAME.to_bytes_with_nul();
        for (dst, src) in props.extension_name.iter_mut().zip(name) {
            *dst = *src as std::ffi::c_char;
        }
        assert!(has_extension(&[props], ash::khr::swapchain::NAME));
        assert!(!has_extension(&[props], ash::ext::debug_utils::NAME));
        assert!(!has_extension(&[], ash::khr::swapchain::NAME));
    }

    #[test]
    fn resize_rebuilds_only_on_a_real_size_change() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let size = |width, height| RenderSize { width, height };

        assert!(!needs_rebuild(extent, size(800, 600)));
        assert!(needs_rebuild(extent, size(1024, 600)));
        assert!(needs_rebuild(extent, size(800, 768)));
        assert!(!needs_rebuild(extent, size(0, 0)));
        assert!(!needs_rebuild(extent, size(0, 600)));
        assert!(!needs_rebuild(extent, size(1024, 0)));
    }

    #[test]
    fn default_desc_is_usable() {
        let desc = ContextDesc::default();
        assert!(!desc.framebuffer.is_empty());
        assert_eq!(desc.validation, cfg!(debug_assertions));
    }
}
