// SPDX-License-Identifier: MPL-2.0

use ::riscv::register::{mhartid, mie, mip, mstatus};

use crate::prelude::*;

pub(super) fn hart_id() -> HartId {
    mhartid::read() as HartId
}

pub(super) fn enable_machine_soft() {
    // SAFETY: Only the MSIE bit is set. A machine software interrupt is
    // taken by the firmware's own trap handler.
    unsafe { mie::set_msoft() };
}

pub(super) fn is_local_enabled() -> bool {
    mstatus::read().mie()
}

pub(super) fn enable_local() {
    // SAFETY: Only re-enables interrupts that a guard disabled.
    unsafe { mstatus::set_mie() };
}

pub(super) fn disable_local() {
    // SAFETY: Masking interrupts cannot break memory safety.
    unsafe { mstatus::clear_mie() };
}

pub(super) fn set_supervisor_soft() {
    // SAFETY: SSIP is the line through which the firmware forwards software
    // interrupts to the supervisor; it has no effect on machine mode.
    unsafe { mip::set_ssoft() };
}

pub(super) fn clear_supervisor_soft() {
    // SAFETY: See `set_supervisor_soft`.
    unsafe { mip::clear_ssoft() };
}

pub(super) fn fence_i() {
    // SAFETY: `fence.i` only synchronizes the local instruction stream.
    unsafe { ::riscv::asm::fence_i() };
}

pub(super) fn sfence_vma() {
    // SAFETY: Flushing the whole local address-translation cache is always
    // sound; it only costs refills.
    unsafe { ::riscv::asm::sfence_vma_all() };
}

pub(super) fn park() -> ! {
    // SAFETY: Interrupts are not serviced any more, so the hart sleeps in
    // `wfi` forever.
    unsafe { mie::clear_msoft() };
    loop {
        // SAFETY: `wfi` is a hint and has no memory effects.
        unsafe { ::riscv::asm::wfi() };
    }
}
