// SPDX-License-Identifier: MPL-2.0

//! The ACLINT machine-level timer device (MTIMER).
//!
//! An MTIMER has one free-running 64-bit `MTIME` counter and one 64-bit
//! `MTIMECMP` register per served hart. A hart's timer interrupt is pending
//! while `MTIME >= MTIMECMP`, so writing all-ones to the compare register
//! disarms it.
//!
//! Instances sitting in different clock domains may count from different
//! origins. An instance with a reference adjusts its own counter once, on
//! the first warm boot of one of its harts, so that it agrees with the
//! reference.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info, warn};
use spin::Once;

use super::{DieWindow, locate, validate_windows};
use crate::{
    domain::RootDomain,
    io::IoMem,
    prelude::*,
    registry::HartTable,
    timer::{Timer, TimerDevice},
};

/// The alignment of MTIMER registers.
pub const ACLINT_MTIMER_ALIGN: usize = 0x8;
/// The number of harts a single MTIMER can serve.
pub const ACLINT_MTIMER_MAX_HARTS: u32 = 4095;
/// The usual size of the `MTIME` block.
pub const ACLINT_DEFAULT_MTIME_SIZE: usize = 0x8;
/// The usual size of the `MTIMECMP` block.
pub const ACLINT_DEFAULT_MTIMECMP_SIZE: usize = 0x7ff8;

/// The largest piece of an MTIMER protected as a single region.
const ADD_REGION_ALIGN: usize = 0x1000;
/// The compare value that never fires.
const DISARMED: u64 = u64::MAX;
const REG_SIZE: usize = size_of::<u64>();

/// The board description of an MTIMER instance.
#[derive(Debug, Clone, Copy)]
pub struct MtimerConfig {
    /// The physical address of `MTIME`.
    pub mtime_base: usize,
    pub mtime_size: usize,
    /// The physical address of the first `MTIMECMP`.
    pub mtimecmp_base: usize,
    pub mtimecmp_size: usize,
    /// The counting frequency in Hz.
    pub frequency: u64,
    pub first_hart: HartId,
    pub hart_count: u32,
    /// The registers can be accessed with single 64-bit loads and stores.
    pub has_64bit_mmio: bool,
    /// `MTIME` is shared with other instances, so it is never adjusted.
    pub has_shared_mtime: bool,
    /// Copies of the register blocks serving later dies.
    pub windows: &'static [DieWindow],
}

impl MtimerConfig {
    /// Checks the description for consistency.
    pub fn validate(&self) -> Result<()> {
        let misaligned = |value: usize| value % ACLINT_MTIMER_ALIGN != 0;
        let fits = (self.first_hart as usize)
            .checked_add(self.hart_count as usize)
            .is_some_and(|end| end <= MAX_HARTS);

        if self.mtime_size == 0
            || (self.hart_count != 0 && self.mtimecmp_size == 0)
            || misaligned(self.mtime_base)
            || misaligned(self.mtime_size)
            || misaligned(self.mtimecmp_base)
            || misaligned(self.mtimecmp_size)
            || self.mtimecmp_size < self.hart_count as usize * REG_SIZE
            || self.first_hart as usize >= MAX_HARTS
            || self.hart_count > ACLINT_MTIMER_MAX_HARTS
            || !fits
        {
            return Err(Error::InvalidArgs);
        }
        validate_windows(
            self.first_hart,
            self.hart_count,
            self.windows,
            ACLINT_MTIMER_ALIGN,
        )
    }

    /// Returns true if the instance serves `hart`.
    pub fn serves(&self, hart: HartId) -> bool {
        hart >= self.first_hart && hart - self.first_hart < self.hart_count
    }
}

/// How the 64-bit registers of an instance are accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAccess {
    /// Single 64-bit loads and stores.
    Mmio64,
    /// Pairs of 32-bit loads and stores.
    Mmio32,
}

impl TimeAccess {
    /// Picks the access width for a device that may support 64-bit MMIO.
    ///
    /// 64-bit accesses are only used on 64-bit harts.
    pub const fn select(has_64bit_mmio: bool) -> Self {
        if cfg!(target_pointer_width = "64") && has_64bit_mmio {
            Self::Mmio64
        } else {
            Self::Mmio32
        }
    }

    /// # Safety
    ///
    /// `regs + offset` must be a 64-bit MTIMER register.
    unsafe fn read(self, regs: IoMem, offset: usize) -> u64 {
        match self {
            // SAFETY: Guaranteed by the caller.
            Self::Mmio64 => unsafe { regs.read_once::<u64>(offset) },
            Self::Mmio32 => read_split(
                // SAFETY: Both halves are part of the register.
                || unsafe { regs.read_once::<u32>(offset + 4) },
                || unsafe { regs.read_once::<u32>(offset) },
            ),
        }
    }

    /// # Safety
    ///
    /// `regs + offset` must be a 64-bit MTIMER register.
    unsafe fn write(self, regs: IoMem, offset: usize, value: u64, is_compare: bool) {
        match self {
            // SAFETY: Guaranteed by the caller.
            Self::Mmio64 => unsafe { regs.write_once(offset, value) },
            Self::Mmio32 => write_split(
                value,
                is_compare,
                // SAFETY: Both halves are part of the register.
                |hi| unsafe { regs.write_once(offset + 4, hi) },
                |lo| unsafe { regs.write_once(offset, lo) },
            ),
        }
    }
}

/// Reads a 64-bit counter through its two 32-bit halves.
///
/// The high half is read again after the low half and the read is retried
/// if it changed, so a carry out of the low half never produces a torn value.
pub fn read_split(mut read_hi: impl FnMut() -> u32, mut read_lo: impl FnMut() -> u32) -> u64 {
    loop {
        let hi = read_hi();
        let lo = read_lo();
        if hi == read_hi() {
            return ((hi as u64) << 32) | lo as u64;
        }
    }
}

/// Writes a 64-bit register through its two 32-bit halves.
///
/// The low half is first parked at a value that cannot cause a spurious
/// event while the halves disagree: all-ones for a compare register and
/// zero for a counter.
pub fn write_split(
    value: u64,
    is_compare: bool,
    mut write_hi: impl FnMut(u32),
    mut write_lo: impl FnMut(u32),
) {
    write_lo(if is_compare { u32::MAX } else { 0 });
    write_hi((value >> 32) as u32);
    write_lo(value as u32);
}

/// An MTIMER instance.
#[derive(Debug)]
pub struct AclintMtimer {
    config: MtimerConfig,
    access: TimeAccess,
    reference: Once<&'static AclintMtimer>,
    delta_computed: AtomicBool,
    delta: Once<u64>,
}

impl AclintMtimer {
    /// Creates the instance described by `config`.
    ///
    /// # Safety
    ///
    /// The `MTIME` and `MTIMECMP` blocks of `config`, and their copies in
    /// every window, must be an MTIMER (or memory laid out like one) owned by
    /// this instance for the rest of the program.
    pub const unsafe fn new(config: MtimerConfig) -> Self {
        Self {
            access: TimeAccess::select(config.has_64bit_mmio),
            config,
            reference: Once::new(),
            delta_computed: AtomicBool::new(false),
            delta: Once::new(),
        }
    }

    /// Returns the board description of the instance.
    pub fn config(&self) -> &MtimerConfig {
        &self.config
    }

    /// Returns how the registers are accessed.
    pub fn access(&self) -> TimeAccess {
        self.access
    }

    /// Makes this instance follow the counter of `reference`.
    ///
    /// Only the first reference is kept. An instance cannot be its own
    /// reference.
    pub fn set_reference(&self, reference: &'static AclintMtimer) {
        if core::ptr::eq(self, reference) {
            warn!(
                "MTIMER at {:#x} cannot be its own reference",
                self.config.mtime_base
            );
            return;
        }
        self.reference.call_once(|| reference);
    }

    /// Returns the instance this one follows.
    pub fn reference(&self) -> Option<&'static AclintMtimer> {
        self.reference.get().copied()
    }

    /// Reads `MTIME` as seen by `hart`.
    pub fn time(&self, hart: HartId) -> u64 {
        // SAFETY: `mtime` returns the counter owned by this instance.
        unsafe { self.access.read(self.mtime(hart), 0) }
    }

    fn set_time(&self, hart: HartId, value: u64) {
        // SAFETY: `mtime` returns the counter owned by this instance.
        unsafe { self.access.write(self.mtime(hart), 0, value, false) };
    }

    /// Reads the compare register of `hart`, or `None` if it is not served.
    pub fn compare(&self, hart: HartId) -> Option<u64> {
        let (regs, offset) = self.mtimecmp(hart)?;
        // SAFETY: `mtimecmp` only returns registers owned by this instance.
        Some(unsafe { self.access.read(regs, offset) })
    }

    /// Programs the timer of `hart` to fire once `MTIME` reaches `when`.
    ///
    /// This also clears a pending timer interrupt if `when` lies in the
    /// future.
    pub fn arm(&self, hart: HartId, when: u64) {
        if let Some((regs, offset)) = self.mtimecmp(hart) {
            // SAFETY: `mtimecmp` only returns registers owned by this
            // instance.
            unsafe { self.access.write(regs, offset, when, true) };
        }
    }

    /// Stops the timer of `hart`.
    pub fn disarm(&self, hart: HartId) {
        self.arm(hart, DISARMED);
    }

    /// Returns whether the timer interrupt of `hart` is pending, or `None`
    /// if the hart is not served.
    pub fn is_pending(&self, hart: HartId) -> Option<bool> {
        let compare = self.compare(hart)?;
        Some(self.time(hart) >= compare)
    }

    /// Aligns `MTIME` with the reference, as seen by `hart`.
    ///
    /// Only the first call on an instance with its own counter and a
    /// reference does anything. Returns true if this call adjusted the
    /// counter.
    pub fn sync(&self, hart: HartId) -> bool {
        if self.config.has_shared_mtime {
            return false;
        }
        let Some(reference) = self.reference() else {
            return false;
        };
        if self.delta_computed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let v1 = self.time(hart);
        let mv = reference.time(hart);
        let v2 = self.time(hart);
        let delta = mv.wrapping_sub((v1 / 2) + (v2 / 2));
        self.set_time(hart, self.time(hart).wrapping_add(delta));
        self.delta.call_once(|| delta);

        debug!(
            "MTIMER at {:#x}: synced with a delta of {:#x}",
            self.config.mtime_base, delta
        );
        true
    }

    /// Returns the offset added to `MTIME` by [`Self::sync`], once applied.
    pub fn time_delta(&self) -> Option<u64> {
        self.delta.get().copied()
    }

    fn mtime(&self, hart: HartId) -> IoMem {
        let config = &self.config;
        locate(config.mtime_base, config.first_hart, config.windows, hart).0
    }

    fn mtimecmp(&self, hart: HartId) -> Option<(IoMem, usize)> {
        let config = &self.config;
        if !config.serves(hart) {
            return None;
        }
        let (regs, index) = locate(
            config.mtimecmp_base,
            config.first_hart,
            config.windows,
            hart,
        );
        Some((regs, index * REG_SIZE))
    }

    /// Protects the registers of every register-block copy in `domain`.
    fn add_regions(&self, domain: &RootDomain) -> Result<()> {
        let config = &self.config;
        let offsets =
            core::iter::once(0).chain(config.windows.iter().map(|window| window.offset));

        for offset in offsets {
            let mtime = config.mtime_base.wrapping_add(offset);
            let mtimecmp = config.mtimecmp_base.wrapping_add(offset);
            let total = config.mtime_size + config.mtimecmp_size;

            if mtime == mtimecmp.wrapping_add(config.mtimecmp_size) {
                domain.add_mmio_range(mtimecmp, total, ADD_REGION_ALIGN)?;
            } else if mtimecmp == mtime.wrapping_add(config.mtime_size) {
                domain.add_mmio_range(mtime, total, ADD_REGION_ALIGN)?;
            } else {
                domain.add_mmio_range(mtime, config.mtime_size, ADD_REGION_ALIGN)?;
                domain.add_mmio_range(mtimecmp, config.mtimecmp_size, ADD_REGION_ALIGN)?;
            }
        }
        Ok(())
    }
}

/// The MTIMER driver: all instances and the harts they serve.
#[derive(Debug)]
pub struct Mtimer {
    harts: HartTable<AclintMtimer>,
    frequency: AtomicU64,
}

impl Mtimer {
    /// Creates a driver without instances.
    pub const fn new() -> Self {
        Self {
            harts: HartTable::new(),
            frequency: AtomicU64::new(0),
        }
    }

    /// Returns the instance serving `hart`.
    pub fn instance(&self, hart: HartId) -> Option<&'static AclintMtimer> {
        self.harts.get(hart)
    }

    /// Adds `mtimer` to the driver, optionally following `reference`.
    ///
    /// The instance is validated, its registers are protected in `domain`
    /// and it is bound to the harts it serves. The driver then becomes the
    /// timer device of `timer` unless one is registered already.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] for an inconsistent description, a
    /// reference counting at another frequency or harts that are already
    /// served, and [`Error::NotEnoughResources`] if `domain` is full. On
    /// error no hart is bound and no reference is set. A full `domain` may
    /// keep the regions added before it filled up.
    pub fn cold_init(
        &'static self,
        mtimer: &'static AclintMtimer,
        reference: Option<&'static AclintMtimer>,
        domain: &RootDomain,
        timer: &Timer,
    ) -> Result<()> {
        let config = mtimer.config();
        config.validate()?;
        if let Some(reference) = reference
            && reference.config().frequency != config.frequency
        {
            return Err(Error::InvalidArgs);
        }

        if !self.harts.is_vacant(config.first_hart, config.hart_count) {
            return Err(Error::InvalidArgs);
        }

        mtimer.add_regions(domain)?;
        self.harts
            .publish(config.first_hart, config.hart_count, mtimer)?;
        if let Some(reference) = reference {
            mtimer.set_reference(reference);
        }

        let _ = self.frequency.compare_exchange(
            0,
            config.frequency,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        info!(
            "MTIMER at {:#x}: harts {}..{}, {} Hz, {:?}",
            config.mtime_base,
            config.first_hart,
            config.first_hart + config.hart_count,
            config.frequency,
            mtimer.access()
        );
        timer.set_device(self);
        Ok(())
    }

    /// Prepares the timer of `hart`, the calling hart.
    ///
    /// The counter is synced with its reference and the compare register is
    /// disarmed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDevice`] if no instance serves `hart`.
    pub fn warm_init(&self, hart: HartId) -> Result<()> {
        let mtimer = self.instance(hart).ok_or(Error::NoDevice)?;
        mtimer.sync(hart);
        mtimer.disarm(hart);
        Ok(())
    }
}

impl Default for Mtimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerDevice for Mtimer {
    fn name(&self) -> &'static str {
        "aclint-mtimer"
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn value(&self, hart: HartId) -> u64 {
        self.instance(hart).map_or(0, |mtimer| mtimer.time(hart))
    }

    fn event_start(&self, hart: HartId, next_event: u64) {
        if let Some(mtimer) = self.instance(hart) {
            mtimer.arm(hart, next_event);
        }
    }

    fn event_stop(&self, hart: HartId) {
        if let Some(mtimer) = self.instance(hart) {
            mtimer.disarm(hart);
        }
    }

    fn warm_init(&self, hart: HartId) -> Result<()> {
        Mtimer::warm_init(self, hart)
    }
}

/// The global MTIMER driver.
pub static MTIMER: Mtimer = Mtimer::new();
