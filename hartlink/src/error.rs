// SPDX-License-Identifier: MPL-2.0

use core::fmt;

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A descriptor or argument violates its invariants.
    InvalidArgs,
    /// The hart has no controller bound to it.
    NoDevice,
    /// A fixed-capacity table is full.
    NotEnoughResources,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidArgs => "invalid argument",
            Error::NoDevice => "no such device",
            Error::NotEnoughResources => "not enough resources",
        };
        f.write_str(msg)
    }
}
