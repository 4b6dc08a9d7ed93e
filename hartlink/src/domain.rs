// SPDX-License-Identifier: MPL-2.0

//! The root isolation domain.
//!
//! Drivers that own machine-level controllers record their register ranges
//! here as MMIO regions without supervisor or user permissions, so the
//! memory-protection setup derived from the domain keeps lower-privileged
//! software away from the raw registers.
//!
//! Like PMP entries, every region is a naturally aligned power of two.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use log::debug;
use spin::Mutex;

use crate::prelude::*;

bitflags! {
    /// Attributes of a [`MemRegion`].
    pub struct MemRegionFlags: u32 {
        /// The region is device memory.
        const MMIO          = 1 << 0;
        /// Supervisor and user mode may read the region.
        const SU_READABLE   = 1 << 1;
        /// Supervisor and user mode may write the region.
        const SU_WRITABLE   = 1 << 2;
        /// Supervisor and user mode may execute from the region.
        const SU_EXECUTABLE = 1 << 3;
    }
}

/// A naturally aligned, power-of-two sized memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    base: usize,
    order: u32,
    flags: MemRegionFlags,
}

impl MemRegion {
    /// The smallest region order; smaller ranges are rounded up.
    pub const MIN_ORDER: u32 = 3;

    /// Creates the smallest region that covers `base..base + size`.
    ///
    /// The region may therefore start below `base` and end past
    /// `base + size`.
    pub fn new(base: usize, size: usize, flags: MemRegionFlags) -> Self {
        let end = base.saturating_add(size);
        let mut order = size
            .checked_next_power_of_two()
            .map_or(usize::BITS, |size| size.trailing_zeros())
            .max(Self::MIN_ORDER);

        while order < usize::BITS {
            let start = base & !((1usize << order) - 1);
            if end - start <= 1 << order {
                return Self {
                    base: start,
                    order,
                    flags,
                };
            }
            order += 1;
        }

        Self {
            base: 0,
            order: usize::BITS,
            flags,
        }
    }

    /// Returns the first address of the region.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the log2 of the region size.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Returns the attributes of the region.
    pub fn flags(&self) -> MemRegionFlags {
        self.flags
    }

    /// Returns true if `addr` lies in the region.
    pub fn contains(&self, addr: usize) -> bool {
        self.order >= usize::BITS || (addr & !((1usize << self.order) - 1)) == self.base
    }

    /// Returns true if the region is MMIO that lower privilege levels cannot
    /// touch at all.
    pub fn is_protected_mmio(&self) -> bool {
        self.flags == MemRegionFlags::MMIO
    }
}

/// The maximum number of regions the root domain records.
pub const ROOT_MAX_REGIONS: usize = 64;

/// An isolation domain described by its memory regions.
#[derive(Debug)]
pub struct RootDomain {
    regions: Mutex<ArrayVec<MemRegion, ROOT_MAX_REGIONS>>,
}

impl RootDomain {
    /// Creates a domain without any region.
    pub const fn new() -> Self {
        Self {
            regions: Mutex::new(ArrayVec::new_const()),
        }
    }

    /// Adds a region to the domain.
    ///
    /// Adding a region identical to an existing one succeeds without
    /// recording it twice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnoughResources`] if the region table is full.
    pub fn add_memregion(&self, region: MemRegion) -> Result<()> {
        let mut regions = self.regions.lock();
        if regions.contains(&region) {
            return Ok(());
        }
        regions
            .try_push(region)
            .map_err(|_| Error::NotEnoughResources)?;

        debug!(
            "Root domain: region {:#x} order {} flags {:?}",
            region.base, region.order, region.flags
        );
        Ok(())
    }

    /// Protects the MMIO range `base..base + size`, splitting it into
    /// naturally aligned pieces of at most `max_chunk` bytes.
    ///
    /// `max_chunk` must be a power of two.
    pub fn add_mmio_range(&self, base: usize, size: usize, max_chunk: usize) -> Result<()> {
        debug_assert!(max_chunk.is_power_of_two());

        let end = base.saturating_add(size);
        let mut pos = base;
        while pos < end {
            let chunk = if pos & (max_chunk - 1) != 0 {
                // The largest piece `pos` is aligned to.
                pos & pos.wrapping_neg()
            } else {
                (end - pos).min(max_chunk)
            };
            self.add_memregion(MemRegion::new(pos, chunk, MemRegionFlags::MMIO))?;
            pos += chunk;
        }
        Ok(())
    }

    /// Returns the first region that contains `addr`.
    pub fn find(&self, addr: usize) -> Option<MemRegion> {
        self.regions
            .lock()
            .iter()
            .find(|region| region.contains(addr))
            .copied()
    }

    /// Returns true if `addr` is covered by a protected MMIO region.
    pub fn is_protected(&self, addr: usize) -> bool {
        self.find(addr)
            .is_some_and(|region| region.is_protected_mmio())
    }

    /// Returns the number of recorded regions.
    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    /// Returns true if the domain has no region.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RootDomain {
    fn default() -> Self {
        Self::new()
    }
}

static ROOT_DOMAIN: RootDomain = RootDomain::new();

/// Returns the root domain, which every hart belongs to at boot.
pub fn root() -> &'static RootDomain {
    &ROOT_DOMAIN
}
