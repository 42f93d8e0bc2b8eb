// SPDX-License-Identifier: CEPL-1.0
//! Queue-family role selection.
//!
//! One pass over the reported families assigns graphics, present, transfer
//! and compute roles. Later families may replace earlier picks:
//!
//! - graphics: replaced by a later graphics family while the current pick
//!   lacks sparse binding and is not (yet) the present family;
//! - present: the first family the surface accepts, never replaced;
//! - transfer: a non-graphics transfer family, upgraded once to one with
//!   sparse binding; falls back to the graphics family;
//! - compute: upgraded to a sparse-binding family, or to one that also does
//!   graphics.

use ash::vk;
use tracing::info;

use crate::error::{Error, Result};

/// Hardware queue-family index for each role. Immutable once selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueRoleAssignment {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
    pub compute: u32,
}

impl QueueRoleAssignment {
    /// Distinct families in role order, for device queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(4);
        for family in [self.graphics, self.present, self.transfer, self.compute] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    pub fn graphics_presents(&self) -> bool {
        self.graphics == self.present
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Pick {
    family: Option<u32>,
    sparse: bool,
}

impl Pick {
    fn take(&mut self, family: u32, flags: vk::QueueFlags) {
        self.family = Some(family);
        self.sparse = flags.contains(vk::QueueFlags::SPARSE_BINDING);
    }
}

pub struct QueueSelector;

impl QueueSelector {
    /// Assigns roles from `families` in enumeration order.
    ///
    /// `supports_present` is asked about each family until one accepts; its
    /// errors abort the selection.
    pub fn select<P>(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: P,
    ) -> Result<QueueRoleAssignment>
    where
        P: FnMut(u32) -> Result<bool>,
    {
        let mut graphics = Pick::default();
        let mut present: Option<u32> = None;
        let mut transfer = Pick::default();
        let mut compute = Pick::default();
        let mut compute_shares_graphics = false;

        for (i, props) in families.iter().enumerate() {
            let i = i as u32;
            let flags = props.queue_flags;
            let has = |bit: vk::QueueFlags| flags.contains(bit);

            let graphics_open = match graphics.family {
                None => true,
                Some(current) => !graphics.sparse && present != Some(current),
            };
            if graphics_open && has(vk::QueueFlags::GRAPHICS) {
                graphics.take(i, flags);
            }

            if present.is_none() && supports_present(i)? {
                present = Some(i);
            }

            let transfer_open = transfer.family.is_none()
                || (!transfer.sparse && has(vk::QueueFlags::SPARSE_BINDING));
            if transfer_open && !has(vk::QueueFlags::GRAPHICS) && has(vk::QueueFlags::TRANSFER) {
                transfer.take(i, flags);
            }

            let compute_open = compute.family.is_none()
                || (!compute.sparse && has(vk::QueueFlags::SPARSE_BINDING))
                || (!compute_shares_graphics && has(vk::QueueFlags::GRAPHICS));
            if compute_open && has(vk::QueueFlags::COMPUTE) {
                compute.take(i, flags);
                compute_shares_graphics = has(vk::QueueFlags::GRAPHICS);
            }
        }

        let graphics = graphics.family.ok_or(Error::NoGraphicsQueue)?;
        let present = present.ok_or(Error::NoPresentQueue)?;
        let transfer = transfer.family.unwrap_or(graphics);
        let compute = compute.family.ok_or(Error::NoComputeQueue)?;

        let roles = QueueRoleAssignment {
            graphics,
            present,
            transfer,
            compute,
        };
        info!(
            "queue families: graphics={} present={} transfer={} compute={}",
            roles.graphics, roles.present, roles.transfer, roles.compute
        );
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn present_on(families: &'static [u32]) -> impl FnMut(u32) -> Result<bool> {
        move |i| Ok(families.contains(&i))
    }

    const G: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const C: vk::QueueFlags = vk::QueueFlags::COMPUTE;
    const T: vk::QueueFlags = vk::QueueFlags::TRANSFER;
    const S: vk::QueueFlags = vk::QueueFlags::SPARSE_BINDING;

    #[test]
    fn three_family_scenario() {
        let families = [family(G), family(vk::QueueFlags::empty()), family(C | S)];
        let roles = QueueSelector::select(&families, present_on(&[1])).unwrap();
        assert_eq!(
            roles,
            QueueRoleAssignment {
                graphics: 0,
                present: 1,
                transfer: 0,
                compute: 2,
            }
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let families = [
            family(G | C | T),
            family(T),
            family(C | T | S),
            family(T | S),
            family(G | C | T | S),
        ];
        let first = QueueSelector::select(&families, present_on(&[0, 4])).unwrap();
        for _ in 0..8 {
            let again = QueueSelector::select(&families, present_on(&[0, 4])).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn typical_discrete_layout() {
        let families = [family(G | C | T | S), family(C | T | S), family(T | S)];
        let roles = QueueSelector::select(&families, present_on(&[0])).unwrap();
        assert_eq!(roles.graphics, 0);
        assert_eq!(roles.present, 0);
        assert_eq!(roles.transfer, 1);
        assert_eq!(roles.compute, 0);
    }

    #[test]
    fn sparse_transfer_replaces_plain_transfer() {
        let families = [family(G | C | T), family(T), family(T | S), family(T)];
        let roles = QueueSelector::select(&families, present_on(&[0])).unwrap();
        assert_eq!(roles.transfer, 2);
    }

    #[test]
    fn plain_transfer_is_kept_without_a_sparse_one() {
        let families = [family(G | C | T), family(T), family(T)];
        let roles = QueueSelector::select(&families, present_on(&[0])).unwrap();
        assert_eq!(roles.transfer, 1);
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let families = [family(G | C | T)];
        let roles = QueueSelector::select(&families, present_on(&[0])).unwrap();
        assert_eq!(roles.transfer, roles.graphics);
    }

    #[test]
    fn non_sparse_graphics_is_replaced_until_it_presents() {
        let families = [family(G | C | T), family(G | C | T), family(G | C | T)];
        let roles = QueueSelector::select(&families, present_on(&[1])).unwrap();
        assert_eq!(roles.present, 1);
        assert_eq!(roles.graphics, 1);
    }

    #[test]
    fn sparse_graphics_is_never_replaced() {
        let families = [family(G | C | S), family(G | C)];
        let roles = QueueSelector::select(&families, present_on(&[0])).unwrap();
        assert_eq!(roles.graphics, 0);
    }

    #[test]
    fn compute_prefers_a_family_shared_with_graphics() {
        let families = [family(C | T), family(G | C | T)];
        let roles = QueueSelector::select(&families, present_on(&[1])).unwrap();
        assert_eq!(roles.compute, 1);
    }

    #[test]
    fn present_is_first_supporting_family() {
        let families = [family(G | C), family(G | C), family(C)];
        let roles = QueueSelector::select(&families, present_on(&[1, 2])).unwrap();
        assert_eq!(roles.present, 1);
    }

    #[test]
    fn missing_roles_are_fatal() {
        let no_graphics = [family(C | T)];
        assert_eq!(
            QueueSelector::select(&no_graphics, present_on(&[0])),
            Err(Error::NoGraphicsQueue)
        );

        let no_present = [family(G | C)];
        assert_eq!(
            QueueSelector::select(&no_present, present_on(&[])),
            Err(Error::NoPresentQueue)
        );

        let no_compute = [family(G | T)];
        assert_eq!(
            QueueSelector::select(&no_compute, present_on(&[0])),
            Err(Error::NoComputeQueue)
        );
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(G | C)];
        let err = QueueSelector::select(&families, |_| {
            Err(Error::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
        });
        assert_eq!(err, Err(Error::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR)));
    }

    #[test]
    fn unique_families_keeps_role_order() {
        let roles = QueueRoleAssignment {
            graphics: 2,
            present: 0,
            transfer: 2,
            compute: 1,
        };
        assert_eq!(roles.unique_families(), vec![2, 0, 1]);
    }
}
