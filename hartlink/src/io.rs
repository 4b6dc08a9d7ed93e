// SPDX-License-Identifier: MPL-2.0

//! Memory-mapped I/O.
//!
//! Machine mode runs with physical addressing, so a register window is just
//! a base address. All accesses are single, non-tearing volatile loads and
//! stores of the requested width.

use core::ptr::NonNull;

use volatile::VolatilePtr;

/// A window of memory-mapped device registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMem {
    base: usize,
}

impl IoMem {
    /// Creates a register window starting at `base`.
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns the base address of the window.
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Returns the window that starts `offset` bytes after this one.
    pub const fn shifted(&self, offset: usize) -> Self {
        Self {
            base: self.base.wrapping_add(offset),
        }
    }

    /// Reads a value at the specified offset using one volatile load.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `base + offset` is a readable device
    /// register (or memory) of type `T`, naturally aligned, and that reading
    /// it has no unsound side effects.
    pub unsafe fn read_once<T: Copy>(&self, offset: usize) -> T {
        let ptr = self.base.wrapping_add(offset) as *mut T;
        debug_assert!(ptr.is_aligned());
        // SAFETY: The caller guarantees that the address is a valid register.
        unsafe { VolatilePtr::new(NonNull::new_unchecked(ptr)) }.read()
    }

    /// Writes a value at the specified offset using one volatile store.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `base + offset` is a writable device
    /// register (or memory) of type `T`, naturally aligned, and that writing
    /// it has no unsound side effects.
    pub unsafe fn write_once<T: Copy>(&self, offset: usize, value: T) {
        let ptr = self.base.wrapping_add(offset) as *mut T;
        debug_assert!(ptr.is_aligned());
        // SAFETY: The caller guarantees that the address is a valid register.
        unsafe { VolatilePtr::new(NonNull::new_unchecked(ptr)) }.write(value);
    }
}
