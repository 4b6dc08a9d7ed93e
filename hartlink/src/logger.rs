// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! The logger prints to a [`Console`] provided by the platform. Records are
//! serialized by a global lock, so lines printed concurrently by different
//! harts are never mixed.
//!
//! Each line carries the timer value at the time of logging and the hart
//! that logged it, e.g. `[     1.024] hart3 INFO : MSWI at 0x2000000`.

use core::fmt::{self, Write};

use log::{LevelFilter, Metadata, Record};
use spin::{Mutex, Once};

use crate::{arch, prelude::*, timer};

/// The output of the logger.
pub trait Console: Sync {
    /// Writes `s` in its entirety.
    fn write_str(&self, s: &str);
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

struct Logger {
    console: Once<&'static dyn Console>,
}

static LOGGER: Logger = Logger {
    console: Once::new(),
};

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(console) = self.console.get() else {
            return;
        };

        let hart = arch::hart_id();
        let ticks = timer::timer().value(hart);
        let frequency = timer::frequency();

        // Use a global lock to prevent interleaving of log messages.
        static RECORD_LOCK: Mutex<()> = Mutex::new(());
        let _irq_guard = arch::disable_local();
        let _lock = RECORD_LOCK.lock();

        let _ = write_record(
            &mut ConsoleWriter(*console),
            ticks,
            frequency,
            hart,
            record,
        );
    }

    fn flush(&self) {}
}

fn write_record(
    out: &mut impl Write,
    ticks: u64,
    frequency: u64,
    hart: HartId,
    record: &Record,
) -> fmt::Result {
    let (secs, millis) = match frequency {
        0 => (0, 0),
        frequency => (ticks / frequency, (ticks % frequency) * 1000 / frequency),
    };
    writeln!(
        out,
        "[{:>6}.{:03}] hart{} {:<5}: {}",
        secs,
        millis,
        hart,
        record.level(),
        record.args()
    )
}

/// Installs the logger, printing to `console` the records up to `level`.
///
/// Only the first call has an effect.
pub fn init(console: &'static dyn Console, level: LevelFilter) {
    let mut first = false;
    LOGGER.console.call_once(|| {
        first = true;
        console
    });
    if !first {
        return;
    }
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
