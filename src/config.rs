// src/config.rs

//! Run configuration.
//!
//! All tunables are collected into an immutable [`Config`] built once from
//! the command line and threaded through constructors. There is no
//! process-wide mutable state.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Debug toggles selected with `-D opt,...`.
///
/// Each flag gates extra diagnostics or retention behaviour; none of them
/// changes what gets mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Trace every external command line before it runs.
    pub command: bool,
    /// Trace Attic moves.
    pub attic: bool,
    /// Ask the cvs client to record its client/server protocol traffic.
    pub protocollog: bool,
    /// Keep the scratch directory on exit.
    pub leavetmp: bool,
    /// Trace creation of mirrored local directories.
    pub mkdir: bool,
    /// Trace local directories that already existed.
    pub mkdir_exist: bool,
}

impl DebugFlags {
    /// Enable a single named toggle. Returns false for unknown names.
    pub fn set(&mut self, name: &str) -> bool {
        match name {
            "command" => self.command = true,
            "attic" => self.attic = true,
            "protocollog" => self.protocollog = true,
            "leavetmp" => self.leavetmp = true,
            "mkdir" => self.mkdir = true,
            "mkdir_exist" => self.mkdir_exist = true,
            _ => return false,
        }
        true
    }

    /// Enable every toggle in a comma-separated list.
    ///
    /// Returns the first unknown name, if any.
    pub fn set_list(&mut self, list: &str) -> std::result::Result<(), String> {
        for name in list.split(',').filter(|n| !n.is_empty()) {
            if !self.set(name) {
                return Err(name.to_string());
            }
        }
        Ok(())
    }

    /// The `-v` shorthand: `command,attic,leavetmp`.
    pub fn verbose(&mut self) {
        self.command = true;
        self.attic = true;
        self.leavetmp = true;
    }
}

/// Retry policy for directory lock acquisition.
///
/// The defaults match the CVS client's own behaviour: sleep a uniformly
/// random 45–74 seconds between attempts, give up after 10.
#[derive(Debug, Clone, Copy)]
pub struct LockRetry {
    pub attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            min_delay: Duration::from_secs(45),
            max_delay: Duration::from_secs(74),
        }
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: DebugFlags,
    /// Walk the remote module tree breadth-first instead of depth-first.
    pub breadth_first: bool,
    /// How many skeleton planners to stack on top of the exact planner.
    pub skeleton: u32,
    /// Insert a synthetic dead 1.1 when the remote file lacks one.
    pub introduce_1_1: bool,
    pub lock_retry: LockRetry,
    /// Parent directory for the scratch tree (`TMPDIR`, default `/tmp`).
    pub tmp_parent: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: DebugFlags::default(),
            breadth_first: false,
            skeleton: 0,
            introduce_1_1: false,
            lock_retry: LockRetry::default(),
            tmp_parent: env::var_os("TMPDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp")),
        }
    }
}
