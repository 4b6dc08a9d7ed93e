// SPDX-License-Identifier: MPL-2.0

//! The ACLINT machine-level software interrupt device (MSWI).
//!
//! Each served hart owns one 32-bit `MSIP` register. Writing 1 makes a
//! machine software interrupt pending on the hart, writing 0 clears it.

use log::info;

use super::{DieWindow, locate, validate_windows};
use crate::{
    domain::RootDomain,
    io::IoMem,
    ipi::{Ipi, IpiDevice},
    prelude::*,
    registry::HartTable,
};

/// The alignment of an MSWI register block.
pub const ACLINT_MSWI_ALIGN: usize = 0x1000;
/// The number of harts a single MSWI can serve.
pub const ACLINT_MSWI_MAX_HARTS: u32 = 4095;

const MSIP_SIZE: usize = size_of::<u32>();

/// The board description of an MSWI instance.
#[derive(Debug, Clone, Copy)]
pub struct MswiConfig {
    /// The physical address of the register block.
    pub base: usize,
    /// The size of the register block in bytes.
    pub size: usize,
    pub first_hart: HartId,
    pub hart_count: u32,
    /// Copies of the register block serving later dies.
    pub windows: &'static [DieWindow],
}

impl MswiConfig {
    /// Checks the description for consistency.
    pub fn validate(&self) -> Result<()> {
        let fits = (self.first_hart as usize)
            .checked_add(self.hart_count as usize)
            .is_some_and(|end| end <= MAX_HARTS);

        if self.base % ACLINT_MSWI_ALIGN != 0
            || self.size % ACLINT_MSWI_ALIGN != 0
            || self.size == 0
            || self.size < self.hart_count as usize * MSIP_SIZE
            || self.first_hart as usize >= MAX_HARTS
            || self.hart_count > ACLINT_MSWI_MAX_HARTS
            || !fits
        {
            return Err(Error::InvalidArgs);
        }
        validate_windows(
            self.first_hart,
            self.hart_count,
            self.windows,
            ACLINT_MSWI_ALIGN,
        )
    }

    /// Returns true if the instance serves `hart`.
    pub fn serves(&self, hart: HartId) -> bool {
        hart >= self.first_hart && hart - self.first_hart < self.hart_count
    }
}

/// An MSWI instance.
#[derive(Debug)]
pub struct AclintMswi {
    config: MswiConfig,
}

impl AclintMswi {
    /// Creates the instance described by `config`.
    ///
    /// # Safety
    ///
    /// The register block at `config.base`, and its copy in every window,
    /// must be an MSWI (or memory laid out like one) owned by this instance
    /// for the rest of the program.
    pub const unsafe fn new(config: MswiConfig) -> Self {
        Self { config }
    }

    /// Returns the board description of the instance.
    pub fn config(&self) -> &MswiConfig {
        &self.config
    }

    /// Makes a machine software interrupt pending on `hart`.
    pub fn raise(&self, hart: HartId) {
        self.write_msip(hart, 1);
    }

    /// Clears the machine software interrupt of `hart`.
    pub fn clear(&self, hart: HartId) {
        self.write_msip(hart, 0);
    }

    /// Returns the pending state of `hart`, or `None` if it is not served.
    pub fn is_pending(&self, hart: HartId) -> Option<bool> {
        let (regs, offset) = self.msip(hart)?;
        // SAFETY: `msip` only returns registers of the block owned by this
        // instance.
        Some(unsafe { regs.read_once::<u32>(offset) } & 1 != 0)
    }

    fn write_msip(&self, hart: HartId, value: u32) {
        if let Some((regs, offset)) = self.msip(hart) {
            // SAFETY: `msip` only returns registers of the block owned by
            // this instance.
            unsafe { regs.write_once(offset, value) };
        }
    }

    fn msip(&self, hart: HartId) -> Option<(IoMem, usize)> {
        if !self.config.serves(hart) {
            return None;
        }
        let (regs, index) = locate(
            self.config.base,
            self.config.first_hart,
            self.config.windows,
            hart,
        );
        Some((regs, index * MSIP_SIZE))
    }

    fn blocks(&self) -> impl Iterator<Item = usize> + '_ {
        let base = self.config.base;
        core::iter::once(base).chain(
            self.config
                .windows
                .iter()
                .map(move |window| base.wrapping_add(window.offset)),
        )
    }
}

/// The MSWI driver: all instances and the harts they serve.
#[derive(Debug)]
pub struct Mswi {
    harts: HartTable<AclintMswi>,
}

impl Mswi {
    /// Creates a driver without instances.
    pub const fn new() -> Self {
        Self {
            harts: HartTable::new(),
        }
    }

    /// Returns the instance serving `hart`.
    pub fn instance(&self, hart: HartId) -> Option<&'static AclintMswi> {
        self.harts.get(hart)
    }

    /// Adds `mswi` to the driver.
    ///
    /// The instance is validated, its register blocks are protected in
    /// `domain` and it is bound to the harts it serves. The driver then
    /// becomes the IPI device of `ipi` unless one is registered already.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] for an inconsistent description or if
    /// one of the harts is already served, and
    /// [`Error::NotEnoughResources`] if `domain` is full. On error no hart
    /// is bound. A full `domain` may keep the regions added before it
    /// filled up.
    pub fn cold_init(
        &'static self,
        mswi: &'static AclintMswi,
        domain: &RootDomain,
        ipi: &Ipi,
    ) -> Result<()> {
        let config = mswi.config();
        config.validate()?;
        if !self.harts.is_vacant(config.first_hart, config.hart_count) {
            return Err(Error::InvalidArgs);
        }

        for block in mswi.blocks() {
            domain.add_mmio_range(block, config.size, ACLINT_MSWI_ALIGN)?;
        }
        self.harts
            .publish(config.first_hart, config.hart_count, mswi)?;

        info!(
            "MSWI at {:#x}: harts {}..{}",
            config.base,
            config.first_hart,
            config.first_hart + config.hart_count
        );
        ipi.set_device(self);
        Ok(())
    }
}

impl Default for Mswi {
    fn default() -> Self {
        Self::new()
    }
}

impl IpiDevice for Mswi {
    fn name(&self) -> &'static str {
        "aclint-mswi"
    }

    fn raise(&self, hart: HartId) {
        if let Some(mswi) = self.harts.get(hart) {
            mswi.raise(hart);
        }
    }

    fn clear(&self, hart: HartId) {
        if let Some(mswi) = self.harts.get(hart) {
            mswi.clear(hart);
        }
    }

    fn warm_init(&self, hart: HartId) -> Result<()> {
        let mswi = self.harts.get(hart).ok_or(Error::NoDevice)?;
        mswi.clear(hart);
        Ok(())
    }
}

/// The global MSWI driver.
pub static MSWI: Mswi = Mswi::new();
