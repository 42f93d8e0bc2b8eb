// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing over two rotating slots of synchronisation primitives.
//!
//! Each slot owns an `acquired` semaphore (image ready to write), a
//! `finished` semaphore (rendering done, consumed by present) and an
//! `in_flight` fence. A slot is only reused after its fence has been
//! observed signaled, so at most [`FRAMES_IN_FLIGHT`] frames are ever queued.

use ash::vk;
use tracing::{debug, error, warn};

use crate::chain::{PresentableChain, RenderSize};
use crate::driver::SwapchainDriver;
use crate::error::{Error, Result};
use crate::handle::{Owned, OwnedFence, OwnedSemaphore};
use crate::state::TrackedImage;

pub const FRAMES_IN_FLIGHT: usize = 2;

/// What the render callback gets for one frame. Only valid during the call.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub slot: usize,
    pub image_index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// Signaled when the image may be written; wait on it before rendering.
    pub acquired: vk::Semaphore,
    /// Signal this when rendering is done; present waits on it.
    pub finished: vk::Semaphore,
    /// Signal this from the frame's last submission.
    pub in_flight: vk::Fence,
    /// Queue family owning the image as of acquire.
    pub owner: u32,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    /// The chain was rebuilt since the previous frame; re-seed trackers.
    pub reloaded: bool,
}

impl FrameInfo {
    /// Full-image render area.
    pub fn area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The callback ran and the image was handed to present.
    Rendered,
    /// The chain was rebuilt instead; nothing was rendered or presented.
    Skipped,
}

struct FrameSlot {
    acquired: OwnedSemaphore,
    finished: OwnedSemaphore,
    in_flight: OwnedFence,
}

impl FrameSlot {
    fn new<D: SwapchainDriver>(driver: &D) -> Result<Self> {
        let acquired = Owned::new(driver.create_semaphore()?);
        let finished = match driver.create_semaphore() {
            Ok(s) => Owned::new(s),
            Err(e) => {
                acquired.release(|s| driver.destroy_semaphore(s));
                return Err(e.into());
            }
        };
        // Signaled so the first wait on a fresh slot returns immediately.
        let in_flight = match driver.create_fence(true) {
            Ok(f) => Owned::new(f),
            Err(e) => {
                acquired.release(|s| driver.destroy_semaphore(s));
                finished.release(|s| driver.destroy_semaphore(s));
                return Err(e.into());
            }
        };
        Ok(Self {
            acquired,
            finished,
            in_flight,
        })
    }

    fn release<D: SwapchainDriver>(self, driver: &D) {
        self.acquired.release(|s| driver.destroy_semaphore(s));
        self.finished.release(|s| driver.destroy_semaphore(s));
        self.in_flight.release(|f| driver.destroy_fence(f));
    }
}

pub struct FramePacer {
    slots: Vec<FrameSlot>,
    current: usize,
    presented: u64,
    // Slot whose fence was reset without a submission to signal it.
    poisoned: Option<usize>,
}

impl FramePacer {
    pub fn new<D: SwapchainDriver>(driver: &D) -> Result<Self> {
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            match FrameSlot::new(driver) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots.drain(..) {
                        slot.release(driver);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            slots,
            current: 0,
            presented: 0,
            poisoned: None,
        })
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Frames handed to present so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Runs one acquire → record → present cycle.
    ///
    /// `record` is called at most once with a tracker seeded from the
    /// image's last-known state; whatever state it leaves the tracker in is
    /// stored back on the chain. It must submit work that waits on
    /// `acquired`, signals `finished` and signals `in_flight`. When the chain
    /// turns out to be out of date at acquire, it is rebuilt and the frame is
    /// [`FrameStatus::Skipped`] without calling `record`.
    ///
    /// If `record` fails, the slot's fence stays unsignaled for good and
    /// every later call returns [`Error::SlotPoisoned`] instead of waiting
    /// on it.
    pub fn render_frame<D, F, E>(
        &mut self,
        chain: &mut PresentableChain,
        driver: &D,
        framebuffer: RenderSize,
        record: F,
    ) -> std::result::Result<FrameStatus, E>
    where
        D: SwapchainDriver,
        F: FnOnce(&FrameInfo, &mut TrackedImage) -> std::result::Result<(), E>,
        E: From<Error>,
    {
        if let Some(slot) = self.poisoned {
            return Err(Error::SlotPoisoned { slot }.into());
        }
        let slot = self.current;
        let fence = self.slots[slot].in_flight.raw();
        wait_unbounded(driver, fence)?;

        let image_index = match self.acquire(slot, chain, driver, framebuffer)? {
            Some(index) => index,
            None => return Ok(FrameStatus::Skipped),
        };

        let info = FrameInfo {
            slot,
            image_index,
            image: chain.image(image_index)?,
            view: chain.view(image_index)?,
            acquired: self.slots[slot].acquired.raw(),
            finished: self.slots[slot].finished.raw(),
            in_flight: fence,
            owner: chain.image_state(image_index)?.owner,
            extent: chain.extent(),
            format: chain.format(),
            reloaded: chain.take_reloaded(),
        };
        let mut tracked = chain.tracker(image_index)?;

        driver.reset_fence(fence).map_err(Error::from)?;
        // From here only a submission from `record` signals the fence again.
        if let Err(e) = record(&info, &mut tracked) {
            error!("frame slot {slot}: record failed after its fence was reset");
            self.poisoned = Some(slot);
            return Err(e);
        }
        chain.set_image_state(image_index, tracked.state())?;

        match driver.queue_present(chain.handle(), image_index, info.finished) {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("present reported a stale chain; rebuilding");
                chain.rebuild(driver, framebuffer)?;
            }
            Err(e) => return Err(Error::from(e).into()),
        }

        self.presented += 1;
        self.current = (self.current + 1) % FRAMES_IN_FLIGHT;
        Ok(FrameStatus::Rendered)
    }

    /// `Ok(None)` means the chain was rebuilt and this frame is skipped.
    fn acquire<D: SwapchainDriver>(
        &mut self,
        slot: usize,
        chain: &mut PresentableChain,
        driver: &D,
        framebuffer: RenderSize,
    ) -> Result<Option<u32>> {
        let signal = self.slots[slot].acquired.raw();
        match driver.acquire_next_image(chain.handle(), signal) {
            Ok((index, false)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("acquire: chain out of date; rebuilding and skipping the frame");
                chain.rebuild(driver, framebuffer)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
            Ok((_, true)) => {
                debug!("acquire: chain suboptimal; rebuilding and retrying once");
                chain.rebuild(driver, framebuffer)?;

                // The suboptimal acquire left a signal pending on the old
                // semaphore; the retry needs an unsignaled one.
                let fresh = Owned::new(driver.create_semaphore()?);
                let stale = std::mem::replace(&mut self.slots[slot].acquired, fresh);
                stale.release(|s| driver.destroy_semaphore(s));

                let signal = self.slots[slot].acquired.raw();
                match driver.acquire_next_image(chain.handle(), signal) {
                    Ok((index, suboptimal)) => {
                        if suboptimal {
                            warn!("chain still suboptimal right after a rebuild");
                        }
                        Ok(Some(index))
                    }
                    Err(e) => Err(Error::AcquireRetryFailed(e)),
                }
            }
        }
    }

    /// Releases every slot primitive. The device must be idle.
    pub fn destroy<D: SwapchainDriver>(&mut self, driver: &D) {
        for slot in self.slots.drain(..) {
            slot.release(driver);
        }
        debug!("frame slots destroyed after {} presented frames", self.presented);
    }
}

fn wait_unbounded<D: SwapchainDriver>(driver: &D, fence: vk::Fence) -> Result<()> {
    loop {
        match driver.wait_for_fence(fence) {
            Ok(()) => return Ok(()),
            Err(vk::Result::TIMEOUT) => warn!("unbounded fence wait timed out; waiting again"),
            Err(e) => return Err(Error::FenceWait(e)),
        }
    }
}
