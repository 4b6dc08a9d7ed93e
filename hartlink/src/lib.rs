// SPDX-License-Identifier: MPL-2.0

//! Machine-mode inter-hart signaling for RISC-V.
//!
//! This crate lets harts interrupt each other and keeps time for them before
//! an operating system runs:
//!
//! - [`ipi`] sends inter-processor interrupts carrying an [`ipi::IpiEvent`]
//!   and handles them on the receiving hart;
//! - [`timer`] reads the time and programs timer events;
//! - [`aclint`] drives the ACLINT software-interrupt and timer devices that
//!   back both, including multi-die register windows and syncing timers of
//!   separate clock domains.
//!
//! A board wires its devices up through [`platform::Platform`].
#![cfg_attr(not(test), no_std)]

pub mod aclint;
pub mod arch;
pub mod config;
pub mod domain;
mod error;
pub mod io;
pub mod ipi;
pub mod logger;
pub mod platform;
pub mod prelude;
pub mod registry;
pub mod timer;

pub use hartmask;

pub use self::{error::Error, prelude::Result};
