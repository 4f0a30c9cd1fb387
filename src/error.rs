// src/error.rs

//! Crate-wide error type for cvssuck.
//!
//! The taxonomy mirrors the failure domains of the mirror: unparsable
//! `cvs log`/`rlog` output is fatal for the current file, external command
//! failures are fatal for the current file, and an exhausted lock retry
//! budget is fatal for the current directory. Callers at each level decide
//! whether to propagate or log-and-continue.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// `cvs log` / `rlog` output did not match the expected format.
    #[error("malformed log output: {0}")]
    LogFormat(String),

    /// A `cvs` invocation exited non-zero.
    #[error("cvs command failed ({command}, exit {status}): {stderr}")]
    CvsCommand {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A `ci`/`rcs`/`rlog` invocation exited non-zero.
    #[error("rcs command failed ({command}, exit {status}): {stderr}")]
    RcsCommand {
        command: String,
        status: i32,
        stderr: String,
    },

    /// The lock retry budget was exhausted without acquiring the lock.
    #[error("could not lock {dir} after {attempts} attempts")]
    CouldNotLock { dir: PathBuf, attempts: u32 },

    /// An operation that requires the directory lock ran without one.
    #[error("directory not locked during {0}")]
    NotLocked(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
