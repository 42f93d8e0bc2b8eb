// SPDX-License-Identifier: CEPL-1.0
//! Window creation and framebuffer queries on top of winit.
#![deny(unsafe_op_in_unsafe_fn)]

use anyhow::{Context, Result};
use strata_core::RenderSize;
use tracing::info;
use winit::dpi::{PhysicalSize, Size};
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

pub use winit;

/// What the window should look like when it is first opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

pub fn create_window(event_loop: &ActiveEventLoop, desc: &WindowDesc) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(desc.title.clone())
        .with_inner_size(Size::Physical(PhysicalSize::new(
            desc.width.max(1),
            desc.height.max(1),
        )));
    let window = event_loop.create_window(attrs).context("create_window")?;
    let size = framebuffer_size(&window);
    info!("window \"{}\" opened at {}x{}", desc.title, size.width, size.height);
    Ok(window)
}

/// Current drawable size in physical pixels; 0x0 while minimised.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    to_render_size(window.inner_size())
}

pub fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_maps_one_to_one() {
        let size = to_render_size(PhysicalSize::new(1920, 1080));
        assert_eq!(
            size,
            RenderSize {
                width: 1920,
                height: 1080
            }
        );
        assert!(to_render_size(PhysicalSize::new(0, 0)).is_empty());
    }
}
