// SPDX-License-Identifier: MPL-2.0

//! Host stand-ins for device registers.
//!
//! Not every test uses every stand-in.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A page of MSWI registers.
#[repr(C, align(4096))]
pub struct MswiRegs(pub [AtomicU32; 1024]);

impl MswiRegs {
    pub fn leak() -> &'static Self {
        Box::leak(Box::new(Self([const { AtomicU32::new(0) }; 1024])))
    }

    pub fn base(&'static self) -> usize {
        self as *const Self as usize
    }

    pub fn msip(&self, index: usize) -> u32 {
        self.0[index].load(Ordering::Acquire)
    }

    /// Returns the indices of the registers that are set.
    pub fn raised(&self) -> Vec<usize> {
        (0..self.0.len()).filter(|index| self.msip(*index) != 0).collect()
    }
}

/// An `MTIME` followed by the `MTIMECMP`s of eight harts.
#[repr(C, align(4096))]
pub struct MtimerRegs {
    pub mtime: AtomicU64,
    pub mtimecmp: [AtomicU64; 8],
}

impl MtimerRegs {
    pub fn leak(time: u64) -> &'static Self {
        Box::leak(Box::new(Self {
            mtime: AtomicU64::new(time),
            mtimecmp: [const { AtomicU64::new(0) }; 8],
        }))
    }

    pub fn mtime_base(&'static self) -> usize {
        &self.mtime as *const AtomicU64 as usize
    }

    pub fn mtimecmp_base(&'static self) -> usize {
        &self.mtimecmp as *const [AtomicU64; 8] as usize
    }

    pub fn time(&self) -> u64 {
        self.mtime.load(Ordering::Acquire)
    }
}
