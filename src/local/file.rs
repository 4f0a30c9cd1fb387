// src/local/file.rs

//! Per-file local RCS state and the `ci`/`rcs` write path.
//!
//! A [`LocalFile`] caches where the `,v` file was found and what `rlog`
//! said about it. The find result is keyed by the directory lock's age, so
//! it never survives an unlocked window; the parsed log is revalidated by
//! comparing the file's identity stat, so an unchanged file is not
//! re-parsed. Both caches rely on RCS files growing monotonically:
//! running `cvs admin -o` / `rcs -o` against the mirror concurrently is
//! not supported.

use super::lock::DirLock;
use crate::config::DebugFlags;
use crate::error::{Error, Result};
use crate::exec::{self, Tool};
use crate::logparse::{DeltaInfo, LogParser, RcsInfo};
use crate::revision::Revision;
use crate::revset::{Checkinable, RevisionSet};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Identity of an RCS file's on-disk state; any change forces a re-parse.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStat {
    ino: u64,
    size: u64,
    mtime: (i64, i64),
}

fn stat_of(path: &Path) -> Result<Option<FileStat>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(FileStat {
            ino: meta.ino(),
            size: meta.size(),
            mtime: (meta.mtime(), meta.mtime_nsec()),
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Find result for one lock scope.
struct Found {
    age: u64,
    path: Option<PathBuf>,
    stat: Option<FileStat>,
}

/// Parsed `rlog` output, valid while the stat matches.
struct LogCache {
    stat: FileStat,
    info: RcsInfo,
    deltas: Vec<DeltaInfo>,
    revisions: RevisionSet,
}

pub struct LocalFile {
    name: String,
    found: Option<Found>,
    log: Option<LogCache>,
}

impl LocalFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            found: None,
            log: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn live_path(&self, rcsdir: &Path) -> PathBuf {
        rcsdir.join(format!("{},v", self.name))
    }

    fn attic_path(&self, rcsdir: &Path) -> PathBuf {
        rcsdir.join("Attic").join(format!("{},v", self.name))
    }

    /// Locate the RCS file (live first, then Attic). Requires the
    /// directory to be locked; the result is cached for the lock scope.
    pub fn find(&mut self, rcsdir: &Path, lock: &DirLock) -> Result<Option<PathBuf>> {
        if !lock.is_locked() {
            return Err(Error::NotLocked("find"));
        }
        if let Some(found) = &self.found
            && found.age == lock.age()
        {
            return Ok(found.path.clone());
        }
        let mut path = None;
        let mut stat = None;
        for candidate in [self.live_path(rcsdir), self.attic_path(rcsdir)] {
            if let Some(st) = stat_of(&candidate)? {
                path = Some(candidate);
                stat = Some(st);
                break;
            }
        }
        self.found = Some(Found {
            age: lock.age(),
            path: path.clone(),
            stat,
        });
        Ok(path)
    }

    /// Read (or reuse) the local file's log. Returns `None` when no RCS
    /// file exists yet. The caller holds at least a read lock.
    pub fn read_log(
        &mut self,
        rcsdir: &Path,
        lock: &DirLock,
        debug: &DebugFlags,
    ) -> Result<Option<(&RcsInfo, &[DeltaInfo])>> {
        let Some(path) = self.find(rcsdir, lock)? else {
            self.log = None;
            return Ok(None);
        };
        let stat = self
            .found
            .as_ref()
            .and_then(|f| f.stat.clone())
            .expect("find() recorded a path without a stat");
        if !self.log.as_ref().is_some_and(|c| c.stat == stat) {
            let mut cmd = Command::new("rlog");
            cmd.arg(&path);
            let output = exec::run_checked(&mut cmd, Tool::Rcs, debug.command)?;
            let mut parser = LogParser::new(Cursor::new(output.stdout));
            let parsed = parser.next().transpose()?.ok_or_else(|| {
                Error::LogFormat(format!("rlog produced no log for {}", path.display()))
            })?;
            let revisions =
                RevisionSet::from_revisions(parsed.deltas.iter().map(|d| d.revision.clone()));
            self.log = Some(LogCache {
                stat,
                info: parsed.info,
                deltas: parsed.deltas,
                revisions,
            });
        }
        let cache = self.log.as_ref().unwrap();
        Ok(Some((&cache.info, &cache.deltas)))
    }

    /// Revisions present locally, as of the last `read_log`.
    pub fn revisions(&self) -> Option<&RevisionSet> {
        self.log.as_ref().map(|c| &c.revisions)
    }

    /// Cheap lock-free pre-check: a cached "no" is trusted (revisions are
    /// never removed), a "yes" or a missing cache must be confirmed under
    /// a read lock.
    pub fn cached_not_checkinable(&self, rev: &Revision) -> bool {
        self.log
            .as_ref()
            .is_some_and(|c| c.revisions.checkinable(rev).is_none())
    }

    /// Insert one revision with `ci`. The caller holds the write lock.
    ///
    /// `contents` is the checked-out working file, or `None` for a dead
    /// revision, which is checked in from an empty file. `attic` carries
    /// the planner's placement decision for trunk revisions.
    pub fn commit(
        &mut self,
        rcsdir: &Path,
        lock: &DirLock,
        attic: Option<bool>,
        info: &RcsInfo,
        delta: &DeltaInfo,
        contents: Option<&Path>,
        debug: &DebugFlags,
    ) -> Result<()> {
        if lock.state() != super::lock::LockState::Write {
            return Err(Error::NotLocked("commit"));
        }
        self.read_log(rcsdir, lock, debug)?;
        let empty = RevisionSet::new();
        let revisions = self.revisions().unwrap_or(&empty);
        if revisions.contains(&delta.revision) {
            return Ok(());
        }
        let Some(checkin) = revisions.checkinable(&delta.revision) else {
            return Ok(());
        };

        let rcsfile = match self.find(rcsdir, lock)? {
            Some(path) => path,
            None => self.live_path(rcsdir),
        };

        // ci refuses an insert that does not extend the default tip unless
        // the predecessor is locked first.
        if let Checkinable::After(pred) = &checkin {
            let mut cmd = Command::new("rcs");
            cmd.arg("-q").arg(format!("-l{pred}")).arg(&rcsfile);
            exec::run_checked(&mut cmd, Tool::Rcs, debug.command)?;
        }

        // ci wants a working file with the real name; stage one in a
        // scratch directory. A missing contents file models the dead
        // placeholder.
        let staging = tempfile::tempdir()?;
        let workfile = staging.path().join(&self.name);
        match contents {
            Some(src) if src.exists() => {
                fs::copy(src, &workfile)?;
            }
            _ => {
                fs::File::create(&workfile)?;
            }
        }

        let mut cmd = Command::new("ci");
        cmd.args(ci_args(delta, &info.description));
        cmd.arg(&rcsfile).arg(&workfile);
        exec::run_checked(&mut cmd, Tool::Rcs, debug.command)?;

        // Move between the live name and the Attic if the planner's
        // placement decision disagrees with where the file sits now.
        let mut current = rcsfile;
        if let Some(want_attic) = attic {
            let desired = if want_attic {
                self.attic_path(rcsdir)
            } else {
                self.live_path(rcsdir)
            };
            if current != desired {
                if let Some(parent) = desired.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&current, &desired)?;
                if debug.attic {
                    debug!(
                        "moved {} -> {}",
                        current.display(),
                        desired.display()
                    );
                }
                current = desired;
            }
        }

        // Optimistic cache update: record the new revision and the file's
        // new identity instead of re-running rlog.
        let stat = stat_of(&current)?;
        self.found = Some(Found {
            age: lock.age(),
            path: Some(current),
            stat: stat.clone(),
        });
        if let Some(cache) = &mut self.log {
            cache.deltas.push(delta.clone());
            cache.revisions.insert(delta.revision.clone());
            if let Some(st) = stat {
                cache.stat = st;
            }
        }
        Ok(())
    }

    /// Bring default branch, keyword mode and symbolic tags in line with
    /// the remote header, in one `rcs` invocation. The caller holds the
    /// write lock. Tags are only added or retargeted, never deleted.
    pub fn update_attributes(
        &mut self,
        rcsdir: &Path,
        lock: &DirLock,
        remote: &RcsInfo,
        debug: &DebugFlags,
    ) -> Result<()> {
        if lock.state() != super::lock::LockState::Write {
            return Err(Error::NotLocked("update_attributes"));
        }
        let Some((local, _)) = self.read_log(rcsdir, lock, debug)? else {
            return Ok(());
        };
        let args = attribute_args(local, remote);
        if args.is_empty() {
            return Ok(());
        }
        let path = match self.find(rcsdir, lock)? {
            Some(path) => path,
            None => return Ok(()),
        };
        let mut cmd = Command::new("rcs");
        cmd.arg("-q").args(&args).arg(&path);
        exec::run_checked(&mut cmd, Tool::Rcs, debug.command)?;
        // The header changed on disk; let the next reader re-parse it.
        self.log = None;
        Ok(())
    }
}

/// Argument list for `ci`, excluding the file operands.
fn ci_args(delta: &DeltaInfo, description: &str) -> Vec<OsString> {
    let log = if delta.log.trim().is_empty() {
        "*** empty log message ***"
    } else {
        &delta.log
    };
    vec![
        OsString::from("-q"),
        OsString::from("-f"),
        OsString::from(format!("-r{}", delta.revision)),
        OsString::from(format!("-d{}", delta.date)),
        OsString::from(format!("-m{log}")),
        OsString::from(format!("-t-{description}")),
        OsString::from(format!("-s{}", delta.state)),
        OsString::from(format!("-w{}", delta.author)),
    ]
}

/// The single bundled `rcs` argument list that reconciles local metadata
/// with the remote header. Empty when nothing differs.
///
/// The remote tag list is walked in reverse so that on duplicate symbols
/// the earliest entry is applied last and wins, matching the CVS symbol
/// table.
fn attribute_args(local: &RcsInfo, remote: &RcsInfo) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    if remote.default_branch != local.default_branch {
        match &remote.default_branch {
            Some(branch) => args.push(format!("-b{branch}").into()),
            None => args.push("-b".into()),
        }
    }
    if remote.keyword_mode != local.keyword_mode {
        args.push(format!("-k{}", remote.keyword_mode).into());
    }

    let local_tags: HashMap<&str, &Revision> = local
        .tags
        .iter()
        .map(|(name, rev)| (name.as_str(), rev))
        .collect();
    let mut scheduled: HashSet<&str> = HashSet::new();
    for (name, rev) in remote.tags.iter().rev() {
        let assigned = scheduled.contains(name.as_str());
        let differs = match local_tags.get(name.as_str()) {
            None => true,
            Some(local_rev) => *local_rev != rev,
        };
        if differs || assigned {
            let opt = if assigned || local_tags.contains_key(name.as_str()) {
                "-N"
            } else {
                "-n"
            };
            args.push(format!("{opt}{name}:{rev}").into());
        }
        scheduled.insert(name.as_str());
    }
    args
}
