// SPDX-License-Identifier: CEPL-1.0
//! Ownership tags for raw Vulkan handles.
//!
//! Handles the driver owns (presentable images) are wrapped in [`Borrowed`];
//! handles this crate creates (views, semaphores, fences) live in [`Owned`]
//! and have to be handed back through [`Owned::release`].

use ash::vk::{self, Handle};

/// Non-owning reference to a handle whose lifetime is managed elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Borrowed<T: Handle + Copy>(T);

impl<T: Handle + Copy> Borrowed<T> {
    pub fn new(raw: T) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> T {
        self.0
    }
}

/// Exclusively owned handle with explicit, deterministic release.
#[derive(Debug)]
pub struct Owned<T: Handle + Copy> {
    raw: T,
    released: bool,
}

impl<T: Handle + Copy> Owned<T> {
    pub fn new(raw: T) -> Self {
        Self {
            raw,
            released: false,
        }
    }

    #[inline]
    pub fn raw(&self) -> T {
        self.raw
    }

    /// Hands the handle to `destroy` exactly once.
    pub fn release(mut self, destroy: impl FnOnce(T)) {
        destroy(self.raw);
        self.released = true;
    }
}

impl<T: Handle + Copy> Drop for Owned<T> {
    fn drop(&mut self) {
        if !self.released && self.raw.as_raw() != 0 {
            tracing::warn!(
                "leaked {:?} 0x{:x} (dropped without release)",
                T::TYPE,
                self.raw.as_raw()
            );
        }
    }
}

pub type OwnedView = Owned<vk::ImageView>;
pub type OwnedSemaphore = Owned<vk::Semaphore>;
pub type OwnedFence = Owned<vk::Fence>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_passes_the_raw_handle_once() {
        let owned = Owned::new(vk::ImageView::from_raw(7));
        let mut seen = Vec::new();
        owned.release(|v| seen.push(v.as_raw()));
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn borrowed_is_a_plain_copy() {
        let b = Borrowed::new(vk::Image::from_raw(3));
        let c = b;
        assert_eq!(b.raw(), c.raw());
    }
}
