// SPDX-License-Identifier: MPL-2.0

//! Board integration.
//!
//! A board describes its ACLINT devices with a static [`Platform`] and calls
//! its hooks while bringing harts up. The cold-boot hart calls each hook
//! with `cold_boot` set before any other hart calls it.

use log::info;

use crate::{
    aclint::{
        mswi::{AclintMswi, MSWI},
        mtimer::{AclintMtimer, MTIMER},
    },
    config::BootArgs,
    domain, ipi,
    logger::{self, Console},
    prelude::*,
    timer,
};

/// The inter-hart devices of a board.
#[derive(Debug)]
pub struct Platform {
    pub name: &'static str,
    pub mswis: &'static [AclintMswi],
    pub mtimers: &'static [AclintMtimer],
    /// The index in `mtimers` of the instance the others follow.
    pub mtimer_reference: Option<usize>,
}

impl Platform {
    /// Installs the logger on `console` as configured by `cmdline`.
    pub fn early_init(&self, console: &'static dyn Console, cmdline: &str) {
        let args = BootArgs::parse(cmdline);
        logger::init(console, args.log_level);
        info!("Platform: {}", self.name);
    }

    /// Brings up IPIs on `hart`, the calling hart.
    ///
    /// On cold boot every MSWI is registered first.
    pub fn ipi_init(&'static self, hart: HartId, cold_boot: bool) -> Result<()> {
        let ipi = ipi::ipi();
        if cold_boot {
            for mswi in self.mswis {
                MSWI.cold_init(mswi, domain::root(), ipi)?;
            }
            ipi.cold_init()?;
        }
        ipi.warm_init(hart)
    }

    /// Brings up the timer on `hart`, the calling hart.
    ///
    /// On cold boot every MTIMER is registered first.
    pub fn timer_init(&'static self, hart: HartId, cold_boot: bool) -> Result<()> {
        let timer = timer::timer();
        if cold_boot {
            let reference = self
                .mtimer_reference
                .and_then(|index| self.mtimers.get(index));
            for mtimer in self.mtimers {
                let reference = reference.filter(|reference| !core::ptr::eq(*reference, mtimer));
                MTIMER.cold_init(mtimer, reference, domain::root(), timer)?;
            }
            timer.cold_init()?;
        }
        timer.warm_init(hart)
    }
}
