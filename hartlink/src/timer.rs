// SPDX-License-Identifier: MPL-2.0

//! The machine timer.
//!
//! A [`TimerDevice`] provides the per-hart time counter and one-shot timer
//! events. The functions at the end of the module act on the calling hart.

use log::debug;
use spin::Once;

use crate::{arch, prelude::*};

/// A device providing time and timer events to harts.
pub trait TimerDevice: Sync {
    /// Returns the name of the device.
    fn name(&self) -> &'static str;

    /// Returns the counting frequency in Hz.
    fn frequency(&self) -> u64;

    /// Returns the current time as seen by `hart`.
    fn value(&self, hart: HartId) -> u64;

    /// Fires a timer interrupt on `hart` once the time reaches `next_event`.
    fn event_start(&self, hart: HartId, next_event: u64);

    /// Cancels the pending timer event of `hart`.
    fn event_stop(&self, hart: HartId);

    /// Prepares the device for `hart`, which is coming online.
    fn warm_init(&self, hart: HartId) -> Result<()> {
        self.event_stop(hart);
        Ok(())
    }
}

/// The timer subsystem.
pub struct Timer {
    device: Once<&'static dyn TimerDevice>,
}

impl Timer {
    /// Creates a timer without a device.
    pub const fn new() -> Self {
        Self {
            device: Once::new(),
        }
    }

    /// Registers the timer device.
    ///
    /// The first registered device stays in use.
    pub fn set_device(&self, device: &'static dyn TimerDevice) {
        let current: *const dyn TimerDevice = *self.device.call_once(|| device);
        if core::ptr::addr_eq(current, device as *const dyn TimerDevice) {
            debug!("Timer device: {}", device.name());
        }
    }

    /// Returns the registered device.
    pub fn device(&self) -> Option<&'static dyn TimerDevice> {
        self.device.get().copied()
    }

    /// Finishes the cold-boot setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDevice`] if no device was registered.
    pub fn cold_init(&self) -> Result<()> {
        self.device().ok_or(Error::NoDevice).map(|_| ())
    }

    /// Prepares the timer of `hart`, the calling hart.
    pub fn warm_init(&self, hart: HartId) -> Result<()> {
        self.device().ok_or(Error::NoDevice)?.warm_init(hart)
    }

    /// Returns the counting frequency in Hz, or zero without a device.
    pub fn frequency(&self) -> u64 {
        self.device().map_or(0, |device| device.frequency())
    }

    /// Returns the current time of `hart`, or zero without a device.
    pub fn value(&self, hart: HartId) -> u64 {
        self.device().map_or(0, |device| device.value(hart))
    }

    /// Fires a timer interrupt on `hart` at `next_event`.
    pub fn event_start(&self, hart: HartId, next_event: u64) {
        if let Some(device) = self.device() {
            device.event_start(hart, next_event);
        }
    }

    /// Cancels the timer event of `hart`.
    pub fn event_stop(&self, hart: HartId) {
        if let Some(device) = self.device() {
            device.event_stop(hart);
        }
    }

    /// Spins on `hart` until `ticks` timer ticks have elapsed.
    ///
    /// Returns at once without a device.
    pub fn delay_ticks(&self, hart: HartId, ticks: u64) {
        let Some(device) = self.device() else {
            return;
        };
        let start = device.value(hart);
        while device.value(hart).wrapping_sub(start) < ticks {
            core::hint::spin_loop();
        }
    }

    /// Spins on `hart` for `us` microseconds.
    pub fn udelay(&self, hart: HartId, us: u64) {
        self.delay_ticks(hart, self.ticks(us, 1_000_000));
    }

    /// Spins on `hart` for `ms` milliseconds.
    pub fn mdelay(&self, hart: HartId, ms: u64) {
        self.delay_ticks(hart, self.ticks(ms, 1_000));
    }

    fn ticks(&self, amount: u64, per_second: u64) -> u64 {
        let ticks = u128::from(self.frequency()) * u128::from(amount) / u128::from(per_second);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timer")
            .field("device", &self.device().map(|device| device.name()))
            .finish()
    }
}

static TIMER: Timer = Timer::new();

/// Returns the global timer.
pub fn timer() -> &'static Timer {
    &TIMER
}

/// Returns the current time of the calling hart.
pub fn value() -> u64 {
    TIMER.value(arch::hart_id())
}

/// Fires a timer interrupt on the calling hart at `next_event`.
pub fn event_start(next_event: u64) {
    TIMER.event_start(arch::hart_id(), next_event);
}

/// Cancels the timer event of the calling hart.
pub fn event_stop() {
    TIMER.event_stop(arch::hart_id());
}

/// Returns the counting frequency of the timer in Hz.
pub fn frequency() -> u64 {
    TIMER.frequency()
}

/// Spins for `us` microseconds.
pub fn udelay(us: u64) {
    TIMER.udelay(arch::hart_id(), us);
}

/// Spins for `ms` milliseconds.
pub fn mdelay(ms: u64) {
    TIMER.mdelay(arch::hart_id(), ms);
}
