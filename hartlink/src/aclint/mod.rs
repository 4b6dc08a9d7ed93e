// SPDX-License-Identifier: MPL-2.0

//! Drivers for the RISC-V Advanced Core Local Interruptor (ACLINT).
//!
//! The ACLINT splits the classic CLINT into a machine software-interrupt
//! device ([`mswi`]) and a machine timer device ([`mtimer`]).
//!
//! On multi-die packages the controller registers serving the harts of a
//! later die are reached through a copy of the register block at a fixed
//! offset. A descriptor lists these copies as [`DieWindow`]s.

pub mod mswi;
pub mod mtimer;

use crate::{io::IoMem, prelude::*};

/// A copy of a controller's register block that serves the harts from
/// `first_hart` onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DieWindow {
    /// The first hart served through this window.
    pub first_hart: HartId,
    /// The distance of this copy from the primary register block.
    pub offset: usize,
}

/// Finds the register block and the register index of `hart`.
///
/// The last window whose `first_hart` is not above `hart` wins. Harts below
/// every window use the primary block, indexed from `first_hart`.
pub(crate) fn locate(
    base: usize,
    first_hart: HartId,
    windows: &[DieWindow],
    hart: HartId,
) -> (IoMem, usize) {
    let regs = IoMem::new(base);
    match windows.iter().rev().find(|window| hart >= window.first_hart) {
        Some(window) => (
            regs.shifted(window.offset),
            (hart - window.first_hart) as usize,
        ),
        None => (regs, hart.saturating_sub(first_hart) as usize),
    }
}

/// Checks that `windows` partitions `first_hart..first_hart + hart_count`.
///
/// Windows must start strictly inside the range, in ascending order, with
/// offsets aligned to `align`.
pub(crate) fn validate_windows(
    first_hart: HartId,
    hart_count: u32,
    windows: &[DieWindow],
    align: usize,
) -> Result<()> {
    let end = first_hart.saturating_add(hart_count);
    let mut prev = first_hart;
    for window in windows {
        if window.first_hart <= prev
            || window.first_hart >= end
            || window.offset == 0
            || window.offset % align != 0
        {
            return Err(Error::InvalidArgs);
        }
        prev = window.first_hart;
    }
    Ok(())
}
