// SPDX-License-Identifier: MPL-2.0

//! Configuration.
//!
//! Board configuration is plain data compiled into the firmware: the
//! descriptions of its ACLINT devices. Runtime knobs come from the firmware
//! command line, parsed by [`BootArgs`].

use log::LevelFilter;

pub use crate::aclint::{DieWindow, mswi::MswiConfig, mtimer::MtimerConfig};

/// The prefix of the command-line arguments meant for this crate.
const ARG_PREFIX: &str = "hartlink.";

/// Runtime options from the firmware command line.
///
/// Arguments are whitespace separated `key=value` pairs. Keys that do not
/// start with `hartlink.` belong to someone else and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootArgs {
    /// The maximum level of printed log records.
    pub log_level: LevelFilter,
}

impl BootArgs {
    /// Parses `cmdline`.
    ///
    /// Unknown keys are ignored. A malformed log level turns logging off.
    pub fn parse(cmdline: &str) -> Self {
        let mut args = Self::default();

        for arg in cmdline.split_whitespace() {
            let Some((key, value)) = arg.split_once('=') else {
                continue;
            };
            let Some(key) = key.strip_prefix(ARG_PREFIX) else {
                continue;
            };
            if key == "log_level" {
                args.log_level = parse_level(value);
            }
        }
        args
    }
}

impl Default for BootArgs {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Off,
        }
    }
}

fn parse_level(value: &str) -> LevelFilter {
    match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        // Otherwise, OFF
        _ => LevelFilter::Off,
    }
}
