// Sigrun
// Copyright (c) 2026 The Project Sigrun Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.
//!
//! Running out of samples is not an error: the wait primitive reports it as
//! [`WaitOutcome::End`](crate::wait::WaitOutcome) and decoder loops terminate on that variant.
//! Protocol-level anomalies (framing errors, short words) are not errors either; decoders
//! surface them as warning annotations and continue.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Sigrun.
#[derive(Debug)]
pub enum Error {
    /// The decoder configuration is invalid: a required channel role is unmapped, two roles map
    /// to the same channel, an option value is out of range, or the sample rate is zero. The run
    /// is aborted before any sample is examined.
    BadConfig(&'static str),
    /// A `streaming_decode` call was issued while another decode was active on the same executor.
    Busy,
    /// The run was cancelled cooperatively. Annotations flushed before the cancellation point
    /// were delivered to the caller.
    Cancelled,
    /// The requested protocol is not present in the registry.
    Unsupported(&'static str),
    /// A default or user-defined limit was reached while decoding.
    LimitError(&'static str),
    /// An IO error occurred at the serialization boundary. The decoding core raises none.
    IoError(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::BadConfig(msg) => {
                write!(f, "invalid configuration: {}", msg)
            }
            Error::Busy => {
                write!(f, "a decode is already in progress")
            }
            Error::Cancelled => {
                write!(f, "decode cancelled")
            }
            Error::Unsupported(what) => {
                write!(f, "unsupported: {}", what)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a bad configuration error.
pub fn bad_config_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::BadConfig(desc))
}

/// Convenience function to create an unsupported protocol error.
pub fn unsupported_error<T>(what: &'static str) -> Result<T> {
    Err(Error::Unsupported(what))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}
