// SPDX-License-Identifier: CEPL-1.0
//! Scripted [`SwapchainDriver`] for GPU-less tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::driver::SwapchainDriver;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSwapchain {
        handle: vk::SwapchainKHR,
        old: vk::SwapchainKHR,
        sharing: vk::SharingMode,
        families: Vec<u32>,
        min_images: u32,
        extent: vk::Extent2D,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateView(vk::ImageView),
    DestroyView(vk::ImageView),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence(vk::Fence),
    DestroyFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire {
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image: u32,
        wait: vk::Semaphore,
    },
    WaitIdle,
}

pub struct MockDriver {
    pub caps: RefCell<vk::SurfaceCapabilitiesKHR>,
    pub formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    pub modes: RefCell<Vec<vk::PresentModeKHR>>,
    next_handle: Cell<u64>,
    next_image: Cell<u32>,
    images: RefCell<HashMap<u64, Vec<vk::Image>>>,
    acquire_script: RefCell<VecDeque<VkResult<(u32, bool)>>>,
    present_script: RefCell<VecDeque<VkResult<bool>>>,
    wait_script: RefCell<VecDeque<VkResult<()>>>,
    idle_script: RefCell<VecDeque<VkResult<()>>>,
    calls: RefCell<Vec<Call>>,
}

impl MockDriver {
    /// 800x600 surface, min 2 images, FIFO + MAILBOX, BGRA sRGB.
    pub fn new() -> Self {
        Self {
            caps: RefCell::new(vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            }),
            formats: RefCell::new(vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }]),
            modes: RefCell::new(vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            next_handle: Cell::new(0x100),
            next_image: Cell::new(0),
            images: RefCell::new(HashMap::new()),
            acquire_script: RefCell::new(VecDeque::new()),
            present_script: RefCell::new(VecDeque::new()),
            wait_script: RefCell::new(VecDeque::new()),
            idle_script: RefCell::new(VecDeque::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    fn handle<T: Handle>(&self) -> T {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        T::from_raw(raw)
    }

    fn log(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Next acquire results; once exhausted, images are handed out round-robin.
    pub fn script_acquire(&self, results: impl IntoIterator<Item = VkResult<(u32, bool)>>) {
        self.acquire_script.borrow_mut().extend(results);
    }

    /// Next present results; once exhausted, presents succeed.
    pub fn script_present(&self, results: impl IntoIterator<Item = VkResult<bool>>) {
        self.present_script.borrow_mut().extend(results);
    }

    pub fn script_fence_wait(&self, results: impl IntoIterator<Item = VkResult<()>>) {
        self.wait_script.borrow_mut().extend(results);
    }

    pub fn script_wait_idle(&self, results: impl IntoIterator<Item = VkResult<()>>) {
        self.idle_script.borrow_mut().extend(results);
    }

    /// Handles created and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        let mut live = 0i64;
        for call in self.calls.borrow().iter() {
            match call {
                Call::CreateSwapchain { .. }
                | Call::CreateView(_)
                | Call::CreateSemaphore(_)
                | Call::CreateFence(_) => live += 1,
                Call::DestroySwapchain(_)
                | Call::DestroyView(_)
                | Call::DestroySemaphore(_)
                | Call::DestroyFence(_) => live -= 1,
                _ => {}
            }
        }
        live.max(0) as usize
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }
}

impl SwapchainDriver for MockDriver {
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(*self.caps.borrow())
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.formats.borrow().clone())
    }

    fn present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.modes.borrow().clone())
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let handle: vk::SwapchainKHR = self.handle();
        let families = if info.queue_family_index_count == 0 {
            Vec::new()
        } else {
            unsafe {
                std::slice::from_raw_parts(
                    info.p_queue_family_indices,
                    info.queue_family_index_count as usize,
                )
            }
            .to_vec()
        };
        let images = (0..info.min_image_count).map(|_| self.handle()).collect();
        self.images.borrow_mut().insert(handle.as_raw(), images);
        self.log(Call::CreateSwapchain {
            handle,
            old: info.old_swapchain,
            sharing: info.image_sharing_mode,
            families,
            min_images: info.min_image_count,
            extent: info.image_extent,
        });
        Ok(handle)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.images.borrow_mut().remove(&swapchain.as_raw());
        self.log(Call::DestroySwapchain(swapchain));
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.images
            .borrow()
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let view = self.handle();
        self.log(Call::CreateView(view));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.log(Call::DestroyView(view));
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let s = self.handle();
        self.log(Call::CreateSemaphore(s));
        Ok(s)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.log(Call::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, _signaled: bool) -> VkResult<vk::Fence> {
        let f = self.handle();
        self.log(Call::CreateFence(f));
        Ok(f)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.log(Call::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.log(Call::WaitFence(fence));
        self.wait_script.borrow_mut().pop_front().unwrap_or(Ok(()))
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.log(Call::ResetFence(fence));
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.log(Call::Acquire { swapchain, signal });
        if let Some(scripted) = self.acquire_script.borrow_mut().pop_front() {
            return scripted;
        }
        let count = self
            .images
            .borrow()
            .get(&swapchain.as_raw())
            .map_or(1, |v| v.len().max(1) as u32);
        let index = self.next_image.get() % count;
        self.next_image.set(self.next_image.get() + 1);
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        self.log(Call::Present {
            swapchain,
            image: image_index,
            wait,
        });
        self.present_script.borrow_mut().pop_front().unwrap_or(Ok(false))
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.log(Call::WaitIdle);
        self.idle_script.borrow_mut().pop_front().unwrap_or(Ok(()))
    }
}
