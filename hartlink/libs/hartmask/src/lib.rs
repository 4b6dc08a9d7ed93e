// SPDX-License-Identifier: MPL-2.0

//! Hart sets for machine-mode firmware.
//!
//! A [`HartMask`] is a fixed-width bitmap of hart IDs. Its width,
//! [`MAX_HARTS`], bounds every hart ID the firmware accepts; per-hart tables
//! are sized by it as well. [`AtomicHartMask`] is the shared, lock-free
//! flavor used for state that several harts update concurrently.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

use core::{
    fmt,
    ops::{BitAnd, BitOr},
    sync::atomic::{AtomicU64, Ordering},
};

/// The identifier of a hardware thread.
pub type HartId = u32;

/// The number of hart IDs a [`HartMask`] can hold.
pub const MAX_HARTS: usize = 128;

type InnerPart = u64;

const BITS_PER_PART: usize = InnerPart::BITS as usize;
const NR_PARTS: usize = MAX_HARTS / BITS_PER_PART;

const _: () = assert!(MAX_HARTS % BITS_PER_PART == 0);

const fn part_idx(hart: HartId) -> usize {
    hart as usize / BITS_PER_PART
}

const fn bit_idx(hart: HartId) -> usize {
    hart as usize % BITS_PER_PART
}

/// A set of harts.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HartMask {
    bits: [InnerPart; NR_PARTS],
}

impl HartMask {
    /// Creates a mask containing no hart.
    pub const fn new_empty() -> Self {
        Self {
            bits: [0; NR_PARTS],
        }
    }

    /// Creates a mask containing every representable hart.
    pub const fn new_full() -> Self {
        Self {
            bits: [!0; NR_PARTS],
        }
    }

    /// Creates a mask containing exactly one hart.
    ///
    /// Out-of-range IDs produce an empty mask.
    pub const fn single(hart: HartId) -> Self {
        let mut mask = Self::new_empty();
        if (hart as usize) < MAX_HARTS {
            mask.bits[part_idx(hart)] = 1 << bit_idx(hart);
        }
        mask
    }

    /// Creates a mask containing the harts `first..first + count`.
    ///
    /// IDs at or beyond [`MAX_HARTS`] are silently dropped.
    pub fn range(first: HartId, count: u32) -> Self {
        let mut mask = Self::new_empty();
        let end = (first as usize + count as usize).min(MAX_HARTS);
        for hart in first as usize..end {
            mask.add(hart as HartId);
        }
        mask
    }

    /// Converts the `(hart_mask, hart_mask_base)` pair of the supervisor
    /// binary interface.
    ///
    /// Bit `i` of `mask` stands for hart `base + i`. A `base` of
    /// `usize::MAX` means "every hart", regardless of `mask`.
    pub fn from_sbi(mask: usize, base: usize) -> Self {
        if base == usize::MAX {
            return Self::new_full();
        }

        let mut set = Self::new_empty();
        for bit in 0..usize::BITS as usize {
            if mask & (1 << bit) == 0 {
                continue;
            }
            if let Some(hart) = base.checked_add(bit)
                && hart < MAX_HARTS
            {
                set.add(hart as HartId);
            }
        }
        set
    }

    /// Adds a hart to the set.
    ///
    /// Out-of-range IDs are ignored.
    pub fn add(&mut self, hart: HartId) {
        if (hart as usize) < MAX_HARTS {
            self.bits[part_idx(hart)] |= 1 << bit_idx(hart);
        }
    }

    /// Removes a hart from the set.
    pub fn remove(&mut self, hart: HartId) {
        if (hart as usize) < MAX_HARTS {
            self.bits[part_idx(hart)] &= !(1 << bit_idx(hart));
        }
    }

    /// Returns true if the set contains the specified hart.
    pub const fn contains(&self, hart: HartId) -> bool {
        (hart as usize) < MAX_HARTS && (self.bits[part_idx(hart)] & (1 << bit_idx(hart))) != 0
    }

    /// Returns the number of harts in the set.
    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .map(|part| part.count_ones() as usize)
            .sum()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|part| *part == 0)
    }

    /// Removes all harts from the set.
    pub fn clear(&mut self) {
        self.bits = [0; NR_PARTS];
    }

    /// Iterates over the harts in the set.
    ///
    /// The order of the iteration is guaranteed to be in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = HartId> + '_ {
        self.bits.iter().enumerate().flat_map(|(part_idx, &part)| {
            (0..BITS_PER_PART).filter_map(move |bit_idx| {
                if (part & (1 << bit_idx)) != 0 {
                    Some((part_idx * BITS_PER_PART + bit_idx) as HartId)
                } else {
                    None
                }
            })
        })
    }
}

impl BitAnd for HartMask {
    type Output = Self;

    fn bitand(mut self, rhs: Self) -> Self {
        for (part, rhs_part) in self.bits.iter_mut().zip(rhs.bits) {
            *part &= rhs_part;
        }
        self
    }
}

impl BitOr for HartMask {
    type Output = Self;

    fn bitor(mut self, rhs: Self) -> Self {
        for (part, rhs_part) in self.bits.iter_mut().zip(rhs.bits) {
            *part |= rhs_part;
        }
        self
    }
}

impl From<HartId> for HartMask {
    fn from(hart: HartId) -> Self {
        Self::single(hart)
    }
}

impl fmt::Debug for HartMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A set of harts with atomic operations.
///
/// Operations on a single hart are atomic. Loading or storing the whole set
/// is atomic per 64-hart word only.
#[derive(Debug)]
pub struct AtomicHartMask {
    bits: [AtomicU64; NR_PARTS],
}

impl AtomicHartMask {
    /// Creates a new `AtomicHartMask` with an initial value.
    pub const fn new(value: HartMask) -> Self {
        let mut bits = [const { AtomicU64::new(0) }; NR_PARTS];
        let mut i = 0;
        while i < NR_PARTS {
            bits[i] = AtomicU64::new(value.bits[i]);
            i += 1;
        }
        Self { bits }
    }

    /// Loads the value of the set with the given ordering.
    pub fn load(&self, ordering: Ordering) -> HartMask {
        let mut mask = HartMask::new_empty();
        for (part, atomic) in mask.bits.iter_mut().zip(self.bits.iter()) {
            *part = atomic.load(ordering);
        }
        mask
    }

    /// Atomically adds a hart with the given ordering.
    pub fn add(&self, hart: HartId, ordering: Ordering) {
        if (hart as usize) < MAX_HARTS {
            self.bits[part_idx(hart)].fetch_or(1 << bit_idx(hart), ordering);
        }
    }

    /// Atomically removes a hart with the given ordering.
    pub fn remove(&self, hart: HartId, ordering: Ordering) {
        if (hart as usize) < MAX_HARTS {
            self.bits[part_idx(hart)].fetch_and(!(1 << bit_idx(hart)), ordering);
        }
    }

    /// Atomically checks if the set contains the specified hart.
    pub fn contains(&self, hart: HartId, ordering: Ordering) -> bool {
        (hart as usize) < MAX_HARTS
            && (self.bits[part_idx(hart)].load(ordering) & (1 << bit_idx(hart))) != 0
    }
}
