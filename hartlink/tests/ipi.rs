// SPDX-License-Identifier: MPL-2.0

//! IPIs delivered through an MSWI between harts simulated by threads.

#[expect(dead_code)]
mod common;

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use common::MswiRegs;
use hartlink::{
    aclint::mswi::{ACLINT_MSWI_ALIGN, AclintMswi, Mswi, MswiConfig},
    domain::RootDomain,
    ipi::{HartOps, Ipi, IpiDevice, IpiEvent},
    prelude::*,
};

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

struct Machine {
    regs: &'static MswiRegs,
    mswi: &'static AclintMswi,
    driver: &'static Mswi,
    ipi: &'static Ipi,
    domain: RootDomain,
}

fn machine(first_hart: HartId, hart_count: u32) -> Machine {
    let regs = MswiRegs::leak();
    let config = MswiConfig {
        base: regs.base(),
        size: ACLINT_MSWI_ALIGN,
        first_hart,
        hart_count,
        windows: &[],
    };
    // SAFETY: The registers are leaked and owned by this instance.
    let mswi: &'static AclintMswi = Box::leak(Box::new(unsafe { AclintMswi::new(config) }));
    let driver: &'static Mswi = Box::leak(Box::new(Mswi::new()));
    let ipi: &'static Ipi = Box::leak(Box::new(Ipi::new()));
    let domain = RootDomain::new();

    driver.cold_init(mswi, &domain, ipi).unwrap();
    ipi.cold_init().unwrap();
    for hart in first_hart..first_hart + hart_count {
        ipi.warm_init(hart).unwrap();
    }

    Machine {
        regs,
        mswi,
        driver,
        ipi,
        domain,
    }
}

/// Runs the IPI handler of `hart` whenever its MSIP is set, until `stop`.
fn spawn_hart(
    machine: &Machine,
    hart: HartId,
    ops: Arc<CountingOps>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let mswi = machine.mswi;
    let ipi = machine.ipi;
    thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            if mswi.is_pending(hart) == Some(true) {
                ipi.process_with(hart, &*ops);
            }
            std::hint::spin_loop();
        }
    })
}

/// Sends `event` from `origin` to `targets` and returns whether the send
/// completed within a few seconds.
fn send_completes(
    ipi: &'static Ipi,
    origin: HartId,
    targets: Option<HartMask>,
    event: IpiEvent,
) -> bool {
    let (done, completed) = mpsc::channel();
    thread::spawn(move || {
        let result = ipi.send(origin, targets.as_ref(), event);
        let _ = done.send(result);
    });
    matches!(completed.recv_timeout(Duration::from_secs(5)), Ok(Ok(())))
}

#[test]
fn fence_i_reaches_each_target_once() {
    let machine = machine(0, 4);
    let stop = Arc::new(AtomicBool::new(false));
    let ops: Vec<_> = (0..4).map(|_| Arc::new(CountingOps::default())).collect();

    let harts: Vec<_> = (1..4)
        .map(|hart| spawn_hart(&machine, hart, ops[hart as usize].clone(), stop.clone()))
        .collect();

    let targets = HartMask::range(1, 3);
    machine
        .ipi
        .send(0, Some(&targets), IpiEvent::FenceI)
        .unwrap();

    // `send` waited for every target.
    assert_eq!(ops[0].fence_i.load(Ordering::Relaxed), 0);
    for hart in 1..4 {
        assert_eq!(ops[hart].fence_i.load(Ordering::Relaxed), 1);
        assert_eq!(ops[hart].sfence_vma.load(Ordering::Relaxed), 0);
    }
    assert!(machine.regs.raised().is_empty());

    stop.store(true, Ordering::Release);
    for hart in harts {
        hart.join().unwrap();
    }
}

#[test]
fn concurrent_senders_complete() {
    let machine = machine(0, 4);
    let stop = Arc::new(AtomicBool::new(false));
    let target_ops = Arc::new(CountingOps::default());
    let target = spawn_hart(&machine, 3, target_ops.clone(), stop.clone());

    let barrier = Arc::new(Barrier::new(3));
    let ipi = machine.ipi;
    let senders: Vec<_> = (0..3)
        .map(|origin| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    ipi.send(origin, Some(&HartMask::single(3)), IpiEvent::SfenceVma)
                        .unwrap();
                }
            })
        })
        .collect();

    for sender in senders {
        sender.join().unwrap();
    }
    // Events may be merged, but never lost while a sender waits.
    let handled = target_ops.sfence_vma.load(Ordering::Relaxed);
    assert!((1..=300).contains(&handled));

    stop.store(true, Ordering::Release);
    target.join().unwrap();
}

#[test]
fn soft_ipi_reaches_supervisor() {
    let machine = machine(0, 2);
    machine
        .ipi
        .send(0, Some(&HartMask::single(1)), IpiEvent::Soft)
        .unwrap();
    assert_eq!(machine.regs.raised(), [1]);

    let ops = CountingOps::default();
    machine.ipi.process_with(1, &ops);
    assert_eq!(ops.ssoft.load(Ordering::Relaxed), 1);
    assert!(machine.regs.raised().is_empty());

    // Nothing pending: nothing done.
    machine.ipi.process_with(1, &ops);
    assert_eq!(ops.ssoft.load(Ordering::Relaxed), 1);
}

#[test]
fn mswi_indexes_from_first_hart() {
    let machine = machine(4, 4);
    machine.driver.raise(5);
    assert_eq!(machine.regs.raised(), [1]);

    machine.driver.clear(5);
    machine.driver.raise(3);
    machine.driver.raise(8);
    assert!(machine.regs.raised().is_empty());
}

#[test]
fn overlapping_mswi_is_rejected() {
    let machine = machine(0, 4);
    let regs = MswiRegs::leak();
    let config = MswiConfig {
        base: regs.base(),
        size: ACLINT_MSWI_ALIGN,
        first_hart: 2,
        hart_count: 4,
        windows: &[],
    };
    // SAFETY: The registers are leaked and owned by this instance.
    let other: &'static AclintMswi = Box::leak(Box::new(unsafe { AclintMswi::new(config) }));

    assert_eq!(
        machine.driver.cold_init(other, &machine.domain, machine.ipi),
        Err(Error::InvalidArgs)
    );
    for hart in 0..4 {
        assert!(core::ptr::eq(
            machine.driver.instance(hart).unwrap(),
            machine.mswi
        ));
    }
    assert!(machine.driver.instance(4).is_none());
    assert!(machine.driver.instance(5).is_none());
    assert!(!machine.domain.is_protected(regs.base()));
}

#[test]
fn halted_hart_leaves_the_sender_free() {
    let machine = machine(0, 2);
    let stop = Arc::new(AtomicBool::new(false));
    let hart = spawn_hart(&machine, 1, Arc::default(), stop);

    machine
        .ipi
        .send(0, Some(&HartMask::single(1)), IpiEvent::Halt)
        .unwrap();
    // The simulated hart panics instead of parking.
    assert!(hart.join().is_err());
}

#[test]
fn broadcast_after_halt_skips_parked_hart() {
    let machine = machine(0, 3);
    let stop = Arc::new(AtomicBool::new(false));
    let parked = spawn_hart(&machine, 1, Arc::default(), stop.clone());
    let ops = Arc::new(CountingOps::default());
    let running = spawn_hart(&machine, 2, ops.clone(), stop.clone());

    assert!(send_completes(
        machine.ipi,
        0,
        Some(HartMask::single(1)),
        IpiEvent::Halt
    ));
    assert!(parked.join().is_err());
    assert_eq!(
        machine.ipi.available(),
        HartMask::single(0) | HartMask::single(2)
    );

    assert!(send_completes(machine.ipi, 0, None, IpiEvent::FenceI));
    assert_eq!(ops.fence_i.load(Ordering::Relaxed), 1);
    assert!(machine.regs.raised().is_empty());

    stop.store(true, Ordering::Release);
    running.join().unwrap();
}

#[test]
fn unserved_hart_never_becomes_available() {
    let machine = machine(0, 2);
    assert_eq!(machine.ipi.warm_init(3), Err(Error::NoDevice));
    assert_eq!(machine.ipi.available(), HartMask::range(0, 2));

    let stop = Arc::new(AtomicBool::new(false));
    let ops = Arc::new(CountingOps::default());
    let hart = spawn_hart(&machine, 1, ops.clone(), stop.clone());

    assert!(send_completes(machine.ipi, 0, None, IpiEvent::FenceI));
    assert_eq!(ops.fence_i.load(Ordering::Relaxed), 1);

    stop.store(true, Ordering::Release);
    hart.join().unwrap();
}
