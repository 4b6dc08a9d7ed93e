// SPDX-License-Identifier: MPL-2.0

//! Per-hart device tables.
//!
//! Each controller driver owns one [`HartTable`] mapping hart IDs to the
//! descriptor of the instance that serves them. Slots are written once at
//! cold boot and only read afterwards.

use spin::{Mutex, Once};

use crate::prelude::*;

/// A write-once table from hart IDs to `&'static T`.
pub struct HartTable<T: ?Sized + 'static> {
    slots: [Once<&'static T>; MAX_HARTS],
    publish_lock: Mutex<()>,
}

impl<T: ?Sized + 'static> HartTable<T> {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            slots: [const { Once::new() }; MAX_HARTS],
            publish_lock: Mutex::new(()),
        }
    }

    /// Returns the entry serving `hart`, if any.
    pub fn get(&self, hart: HartId) -> Option<&'static T> {
        self.slots.get(hart as usize)?.get().copied()
    }

    /// Returns true if `hart` is served by some entry.
    pub fn contains(&self, hart: HartId) -> bool {
        self.get(hart).is_some()
    }

    /// Returns true if `first..first + count` fits in the table and none of
    /// its harts is bound yet.
    pub fn is_vacant(&self, first: HartId, count: u32) -> bool {
        let start = first as usize;
        start
            .checked_add(count as usize)
            .filter(|end| *end <= MAX_HARTS)
            .is_some_and(|end| self.slots[start..end].iter().all(|slot| !slot.is_completed()))
    }

    /// Binds the harts `first..first + count` to `entry`.
    ///
    /// Either every hart of the range is bound, or the table is left as it
    /// was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if the range does not fit in the table
    /// or if any of its harts is already bound.
    pub fn publish(&self, first: HartId, count: u32, entry: &'static T) -> Result<()> {
        let start = first as usize;
        let end = start
            .checked_add(count as usize)
            .filter(|end| *end <= MAX_HARTS)
            .ok_or(Error::InvalidArgs)?;

        let _guard = self.publish_lock.lock();
        let slots = &self.slots[start..end];
        if slots.iter().any(|slot| slot.is_completed()) {
            return Err(Error::InvalidArgs);
        }
        for slot in slots {
            slot.call_once(|| entry);
        }
        Ok(())
    }
}

impl<T: ?Sized + 'static> Default for HartTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> core::fmt::Debug for HartTable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bound = (0..MAX_HARTS as HartId).filter(|hart| self.contains(*hart));
        f.debug_set().entries(bound).finish()
    }
}
