// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

pub(super) fn hart_id() -> HartId {
    0
}

pub(super) fn enable_machine_soft() {}

pub(super) fn is_local_enabled() -> bool {
    false
}

pub(super) fn enable_local() {}

pub(super) fn disable_local() {}

pub(super) fn set_supervisor_soft() {}

pub(super) fn clear_supervisor_soft() {}

pub(super) fn fence_i() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

pub(super) fn sfence_vma() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

pub(super) fn park() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
