// src/lib.rs

//! cvssuck: mirror a remote CVS repository into a local RCS tree.
//!
//! The mirror speaks only the ordinary CVS client/server protocol: it
//! drives the stock `cvs` client for directory listings, `cvs log` output
//! and per-revision checkouts, and rebuilds the history locally with the
//! classic RCS tools (`ci`, `rcs`, `rlog`). No privileged access to the
//! server's master files is needed.
//!
//! # Architecture
//!
//! - `cvs log` output is parsed into per-file headers and delta lists
//! - a planner decides which revisions to materialise, in what order, and
//!   whether the file belongs in the `Attic/`
//! - revisions are inserted one by one with `ci`, each fetched with
//!   `cvs update -ko -r<rev>`
//! - the local tree is guarded by CVS's own on-disk lock protocol, so
//!   ordinary CVS clients can work against the mirror concurrently
//!
//! The tool is deliberately inefficient (one `cvs update` per revision)
//! and resumable: partial output is valid state, and a later run inserts
//! exactly the missing revisions.

pub mod cli;
pub mod config;
mod error;
pub mod exec;
pub mod local;
pub mod logparse;
pub mod mirror;
pub mod planner;
pub mod remote;
pub mod revision;
pub mod revset;

pub use config::{Config, DebugFlags, LockRetry};
pub use error::{Error, Result};
pub use local::{LocalDirectory, LocalRepository};
pub use logparse::{DeltaInfo, FileLog, LogParser, RcsInfo};
pub use mirror::{Mirror, ModuleJob, OutputTarget};
pub use planner::{ExactPlanner, PlanEntry, Planner, SkeletonPlanner, build_planner};
pub use remote::CvsWork;
pub use revision::Revision;
pub use revset::{Checkinable, RevisionSet};
