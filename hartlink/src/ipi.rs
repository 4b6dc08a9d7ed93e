// SPDX-License-Identifier: MPL-2.0

//! Inter-processor interrupts.
//!
//! A sender stores the requested [`IpiEvent`] in the target hart's scratch
//! slot and then asks the registered [`IpiDevice`] to interrupt the target.
//! The target drains its slot in [`process`] and performs the event locally.
//!
//! Every event kind except [`IpiEvent::Soft`] is synchronous: the sender
//! waits until the target has reset its slot to [`IpiEvent::None`].

use core::sync::atomic::{AtomicU8, Ordering, fence};

use hartmask::AtomicHartMask;
use log::{debug, trace};
use spin::Once;

use crate::{arch, prelude::*};

/// An interrupt controller able to signal harts.
pub trait IpiDevice: Sync {
    /// Returns the name of the controller.
    fn name(&self) -> &'static str;

    /// Makes a software interrupt pending on `hart`.
    ///
    /// Harts the controller does not serve are ignored.
    fn raise(&self, hart: HartId);

    /// Clears the software interrupt pending on `hart`.
    ///
    /// Harts the controller does not serve are ignored.
    fn clear(&self, hart: HartId);

    /// Prepares the controller for `hart`, which is coming online.
    ///
    /// Controllers that cannot signal `hart` return [`Error::NoDevice`], so
    /// the hart never becomes available.
    fn warm_init(&self, hart: HartId) -> Result<()> {
        self.clear(hart);
        Ok(())
    }
}

/// The local effects an IPI may ask a hart to carry out.
pub trait HartOps {
    /// Makes a supervisor software interrupt pending.
    fn raise_supervisor_soft(&self);

    /// Synchronizes the instruction stream with prior stores.
    fn fence_i(&self);

    /// Flushes the address-translation caches.
    fn sfence_vma(&self);

    /// Stops the hart for good.
    fn park(&self) -> !;
}

/// The kinds of events an IPI carries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum IpiEvent {
    None = 0,
    /// Forward a software interrupt to supervisor mode.
    Soft = 1,
    /// Execute `fence.i`.
    FenceI = 2,
    /// Execute `sfence.vma`.
    SfenceVma = 3,
    /// Park the hart forever.
    Halt = 4,
}

impl IpiEvent {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Soft,
            2 => Self::FenceI,
            3 => Self::SfenceVma,
            4 => Self::Halt,
            _ => Self::None,
        }
    }

    /// Returns true if the sender waits for the target to handle the event.
    pub fn is_sync(self) -> bool {
        !matches!(self, Self::None | Self::Soft)
    }
}

/// Scratch state of a hart that other harts may write.
#[derive(Debug)]
struct HartScratch {
    event: AtomicU8,
}

impl HartScratch {
    const fn new() -> Self {
        Self {
            event: AtomicU8::new(IpiEvent::None as u8),
        }
    }

    fn load(&self) -> IpiEvent {
        IpiEvent::from_raw(self.event.load(Ordering::Acquire))
    }

    /// Resets the slot unless a newer event replaced `seen` meanwhile.
    fn consume(&self, seen: IpiEvent) {
        let _ = self.event.compare_exchange(
            seen as u8,
            IpiEvent::None as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// The IPI dispatcher.
pub struct Ipi {
    device: Once<&'static dyn IpiDevice>,
    scratch: [HartScratch; MAX_HARTS],
    available: AtomicHartMask,
}

impl Ipi {
    /// Creates a dispatcher without a device and without available harts.
    pub const fn new() -> Self {
        Self {
            device: Once::new(),
            scratch: [const { HartScratch::new() }; MAX_HARTS],
            available: AtomicHartMask::new(HartMask::new_empty()),
        }
    }

    /// Registers the controller used to deliver IPIs.
    ///
    /// The first registered controller stays in use.
    pub fn set_device(&self, device: &'static dyn IpiDevice) {
        let current: *const dyn IpiDevice = *self.device.call_once(|| device);
        if core::ptr::addr_eq(current, device as *const dyn IpiDevice) {
            debug!("IPI device: {}", device.name());
        } else {
            debug!(
                "IPI device {} ignored, {} is already registered",
                device.name(),
                self.device().map_or("?", |current| current.name())
            );
        }
    }

    /// Returns the registered controller.
    pub fn device(&self) -> Option<&'static dyn IpiDevice> {
        self.device.get().copied()
    }

    /// Finishes the cold-boot setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDevice`] if no controller was registered.
    pub fn cold_init(&self) -> Result<()> {
        self.device().ok_or(Error::NoDevice).map(|_| ())
    }

    /// Brings `hart` online for IPIs.
    ///
    /// Enables machine software interrupts on the calling hart, which must be
    /// `hart`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDevice`] if no controller was registered, or the
    /// controller's own error.
    pub fn warm_init(&self, hart: HartId) -> Result<()> {
        let device = self.device().ok_or(Error::NoDevice)?;
        let scratch = self.scratch.get(hart as usize).ok_or(Error::InvalidArgs)?;

        scratch
            .event
            .store(IpiEvent::None as u8, Ordering::Release);
        device.warm_init(hart)?;
        arch::enable_machine_soft();
        self.mark_available(hart);
        Ok(())
    }

    /// Lets `hart` receive IPIs.
    pub fn mark_available(&self, hart: HartId) {
        self.available.add(hart, Ordering::Release);
    }

    /// Stops `hart` from receiving IPIs.
    pub fn mark_unavailable(&self, hart: HartId) {
        self.available.remove(hart, Ordering::Release);
    }

    /// Returns the harts that may receive IPIs.
    pub fn available(&self) -> HartMask {
        self.available.load(Ordering::Acquire)
    }

    /// Delivers `event` to `targets`, or to every available hart if
    /// `targets` is `None`.
    ///
    /// The origin hart and unavailable harts are skipped. Without a
    /// registered controller nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgs`] if `event` is [`IpiEvent::None`].
    pub fn send(&self, origin: HartId, targets: Option<&HartMask>, event: IpiEvent) -> Result<()> {
        if event == IpiEvent::None {
            return Err(Error::InvalidArgs);
        }
        let Some(device) = self.device() else {
            trace!("IPI {:?} dropped: no device", event);
            return Ok(());
        };

        let mut targets = match targets {
            Some(targets) => *targets & self.available(),
            None => self.available(),
        };
        targets.remove(origin);

        for hart in targets.iter() {
            let scratch = &self.scratch[hart as usize];
            scratch.event.store(event as u8, Ordering::Release);
            // The event must be visible before the target can trap.
            fence(Ordering::SeqCst);
            device.raise(hart);
            trace!("IPI {:?}: hart {} -> hart {}", event, origin, hart);
        }

        if event.is_sync() {
            for hart in targets.iter() {
                let scratch = &self.scratch[hart as usize];
                while scratch.load() != IpiEvent::None {
                    core::hint::spin_loop();
                }
            }
        }
        Ok(())
    }

    /// Handles the IPI pending on `hart`, the calling hart, with its local
    /// effects carried out by `ops`.
    pub fn process_with(&self, hart: HartId, ops: &impl HartOps) {
        // Clear before reading, so an IPI raised after the read is not lost.
        if let Some(device) = self.device() {
            device.clear(hart);
        }
        let Some(scratch) = self.scratch.get(hart as usize) else {
            return;
        };

        let event = scratch.load();
        match event {
            IpiEvent::None => return,
            IpiEvent::Soft => ops.raise_supervisor_soft(),
            IpiEvent::FenceI => ops.fence_i(),
            IpiEvent::SfenceVma => ops.sfence_vma(),
            IpiEvent::Halt => {
                // Later senders must not wait on a parked hart.
                self.mark_unavailable(hart);
                scratch.consume(event);
                ops.park();
            }
        }
        scratch.consume(event);
    }

    /// Handles the IPI pending on `hart`, the calling hart.
    pub fn process(&self, hart: HartId) {
        self.process_with(hart, &arch::LocalHart);
    }

    /// Clears the supervisor software interrupt of the calling hart.
    pub fn clear_smode(&self) {
        arch::clear_supervisor_soft();
    }
}

impl Default for Ipi {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Ipi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ipi")
            .field("device", &self.device().map(|device| device.name()))
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

static IPI: Ipi = Ipi::new();

/// Returns the global IPI dispatcher.
pub fn ipi() -> &'static Ipi {
    &IPI
}

/// Sends `event` from the calling hart to `targets`.
pub fn send(targets: Option<&HartMask>, event: IpiEvent) -> Result<()> {
    IPI.send(arch::hart_id(), targets, event)
}

/// Handles the IPI pending on the calling hart.
pub fn process() {
    IPI.process(arch::hart_id());
}

/// Clears the supervisor software interrupt of the calling hart.
pub fn clear_smode() {
    IPI.clear_smode();
}

#[cfg(test)]
mod test {
    use core::sync::atomic::{AtomicBool, AtomicUsize};
    use std::{sync::Arc, thread, vec::Vec};

    use super::*;

    struct FakeDevice {
        pending: [AtomicBool; 8],
        raised: [AtomicUsize; 8],
    }

    impl FakeDevice {
        fn leak() -> &'static Self {
            Box::leak(Box::new(Self {
                pending: [const { AtomicBool::new(false) }; 8],
                raised: [const { AtomicUsize::new(0) }; 8],
            }))
        }

        fn is_pending(&self, hart: HartId) -> bool {
            self.pending[hart as usize].load(Ordering::Acquire)
        }

        fn raised(&self, hart: HartId) -> usize {
            self.raised[hart as usize].load(Ordering::Acquire)
        }
    }

    impl IpiDevice for FakeDevice {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn raise(&self, hart: HartId) {
            if let Some(pending) = self.pending.get(hart as usize) {
                self.raised[hart as usize].fetch_add(1, Ordering::AcqRel);
                pending.store(true, Ordering::Release);
            }
        }

        fn clear(&self, hart: HartId) {
            if let Some(pending) = self.pending.get(hart as usize) {
                pending.store(false, Ordering::Release);
            }
        }
    }

    #[derive(Default)]
    struct CountingOps {
        ssoft: AtomicUsize,
        fence_i: AtomicUsize,
        sfence_vma: AtomicUsize,
    }

    impl HartOps for CountingOps {
        fn raise_supervisor_soft(&self) {
            self.ssoft.fetch_add(1, Ordering::Relaxed);
        }

        fn fence_i(&self) {
            self.fence_i.fetch_add(1, Ordering::Relaxed);
        }

        fn sfence_vma(&self) {
            self.sfence_vma.fetch_add(1, Ordering::Relaxed);
        }

        fn park(&self) -> ! {
            panic!("parked");
        }
    }

    fn setup(harts: u32) -> (&'static Ipi, &'static FakeDevice) {
        let ipi: &'static Ipi = Box::leak(Box::new(Ipi::new()));
        let device = FakeDevice::leak();
        ipi.set_device(device);
        for hart in 0..harts {
            ipi.mark_available(hart);
        }
        (ipi, device)
    }

    #[test]
    fn soft_ipi_does_not_wait() {
        let (ipi, device) = setup(2);
        ipi.send(0, Some(&HartMask::single(1)), IpiEvent::Soft)
            .unwrap();
        assert!(device.is_pending(1));
        assert_eq!(ipi.scratch[1].load(), IpiEvent::Soft);

        let ops = CountingOps::default();
        ipi.process_with(1, &ops);
        assert!(!device.is_pending(1));
        assert_eq!(ops.ssoft.load(Ordering::Relaxed), 1);
        assert_eq!(ipi.scratch[1].load(), IpiEvent::None);
    }

    #[test]
    fn origin_and_unavailable_harts_are_skipped() {
        let (ipi, device) = setup(2);
        let targets = HartMask::range(0, 4);
        ipi.send(0, Some(&targets), IpiEvent::Soft).unwrap();
        assert_eq!(device.raised(0), 0);
        assert_eq!(device.raised(1), 1);
        assert_eq!(device.raised(2), 0);

        ipi.mark_unavailable(1);
        ipi.send(0, None, IpiEvent::Soft).unwrap();
        assert_eq!(device.raised(1), 1);
    }

    #[test]
    fn send_without_device_is_noop() {
        let ipi = Ipi::new();
        ipi.mark_available(1);
        assert_eq!(ipi.send(0, None, IpiEvent::FenceI), Ok(()));
        assert_eq!(ipi.scratch[1].load(), IpiEvent::None);
        assert_eq!(ipi.cold_init(), Err(Error::NoDevice));
        assert_eq!(ipi.warm_init(1), Err(Error::NoDevice));
    }

    #[test]
    fn none_event_is_rejected() {
        let (ipi, _) = setup(2);
        assert_eq!(ipi.send(0, None, IpiEvent::None), Err(Error::InvalidArgs));
    }

    #[test]
    fn first_device_wins() {
        let (ipi, device) = setup(2);
        ipi.set_device(FakeDevice::leak());
        ipi.send(0, None, IpiEvent::Soft).unwrap();
        assert_eq!(device.raised(1), 1);
    }

    #[test]
    fn fence_ipi_waits_for_targets() {
        let (ipi, device) = setup(3);
        let ops = Arc::new(CountingOps::default());
        let done = Arc::new(AtomicBool::new(false));

        let receivers: Vec<_> = (1..3)
            .map(|hart| {
                let ops = ops.clone();
                let done = done.clone();
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        if device.is_pending(hart) {
                            ipi.process_with(hart, &*ops);
                        }
                        core::hint::spin_loop();
                    }
                })
            })
            .collect();

        ipi.send(0, None, IpiEvent::SfenceVma).unwrap();
        // Every target handled the event before `send` returned.
        assert_eq!(ops.sfence_vma.load(Ordering::Relaxed), 2);

        done.store(true, Ordering::Release);
        for receiver in receivers {
            receiver.join().unwrap();
        }
    }

    #[test]
    fn halt_releases_sender_before_parking() {
        let (ipi, device) = setup(2);
        let receiver = thread::spawn(move || {
            while !device.is_pending(1) {
                core::hint::spin_loop();
            }
            ipi.process_with(1, &CountingOps::default());
        });

        ipi.send(0, Some(&HartMask::single(1)), IpiEvent::Halt)
            .unwrap();
        assert!(receiver.join().is_err());
        assert_eq!(ipi.scratch[1].load(), IpiEvent::None);
        assert!(!ipi.available().contains(1));

        // Broadcasts leave the parked hart alone.
        ipi.send(0, None, IpiEvent::FenceI).unwrap();
        assert_eq!(device.raised(1), 1);
        assert_eq!(ipi.scratch[1].load(), IpiEvent::None);
    }

    #[test]
    fn newer_event_survives_consume() {
        let (ipi, _) = setup(2);
        ipi.scratch[1]
            .event
            .store(IpiEvent::FenceI as u8, Ordering::Release);
        ipi.scratch[1].consume(IpiEvent::Soft);
        assert_eq!(ipi.scratch[1].load(), IpiEvent::FenceI);
    }

    #[test]
    fn warm_init_marks_hart_available() {
        let ipi = Ipi::new();
        let device = FakeDevice::leak();
        ipi.set_device(device);
        device.raise(3);

        ipi.warm_init(3).unwrap();
        assert!(ipi.available().contains(3));
        assert!(!device.is_pending(3));
    }
}
