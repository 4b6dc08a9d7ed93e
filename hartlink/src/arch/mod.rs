// SPDX-License-Identifier: MPL-2.0

//! Hart-local machine operations.
//!
//! Everything here acts on the hart that executes it: CSR updates, local
//! fences and parking. Other targets get inert fallbacks so the crate can be
//! built and unit-tested on a development host.

use core::marker::PhantomData;

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        mod riscv;
        use self::riscv as imp;
    } else {
        mod host;
        use self::host as imp;
    }
}

use crate::{ipi::HartOps, prelude::*};

/// Returns the ID of the calling hart.
pub fn hart_id() -> HartId {
    imp::hart_id()
}

/// Enables machine software interrupts on the calling hart.
pub fn enable_machine_soft() {
    imp::enable_machine_soft();
}

/// Clears the supervisor software-interrupt pending bit of the calling hart.
pub fn clear_supervisor_soft() {
    imp::clear_supervisor_soft();
}

/// Disables machine interrupts on the calling hart until the returned guard
/// is dropped.
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard::new()
}

/// A guard for disabled machine interrupts.
#[clippy::has_significant_drop]
#[must_use]
#[derive(Debug)]
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    // Interrupts are disabled on one hart only.
    _not_send: PhantomData<*const ()>,
}

impl DisabledLocalIrqGuard {
    fn new() -> Self {
        let was_enabled = imp::is_local_enabled();
        if was_enabled {
            imp::disable_local();
        }
        Self {
            was_enabled,
            _not_send: PhantomData,
        }
    }
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            imp::enable_local();
        }
    }
}

/// The [`HartOps`] of the hart executing the code.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHart;

impl HartOps for LocalHart {
    fn raise_supervisor_soft(&self) {
        imp::set_supervisor_soft();
    }

    fn fence_i(&self) {
        imp::fence_i();
    }

    fn sfence_vma(&self) {
        imp::sfence_vma();
    }

    fn park(&self) -> ! {
        imp::park()
    }
}
