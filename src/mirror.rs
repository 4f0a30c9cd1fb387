// src/mirror.rs

//! Walking the remote module tree and scheduling per-file work.
//!
//! Directories are processed strictly serially, breadth- or depth-first.
//! The files of each directory are handled in a forked child so that
//! per-directory resource growth (file caches, staged checkouts) dies
//! with it; the child's only output is the on-disk RCS tree, written
//! under the usual locks.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::local::{LocalDirectory, LocalRepository};
use crate::logparse::FileLog;
use crate::planner::{Planner, build_planner};
use crate::remote::CvsWork;
use crate::revision::Revision;
use chrono::{DateTime, Utc};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

/// Where a module's output (or lock) tree goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Use this directory as the tree root.
    Dir(PathBuf),
    /// Use `base/<module>` as the tree root.
    Base(PathBuf),
}

impl OutputTarget {
    pub fn resolve(&self, module: &str) -> PathBuf {
        match self {
            OutputTarget::Dir(dir) => dir.clone(),
            OutputTarget::Base(base) => base.join(module),
        }
    }
}

/// One module to mirror, with the output and lock settings in effect when
/// it was named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleJob {
    pub module: String,
    pub output: OutputTarget,
    pub lock: OutputTarget,
}

/// Remote path relative to the module root, for mapping into the local
/// tree.
fn relative_to_module(remote_dir: &str, module: &str) -> PathBuf {
    if remote_dir == module {
        PathBuf::new()
    } else {
        PathBuf::from(
            remote_dir
                .strip_prefix(module)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(remote_dir),
        )
    }
}

pub struct Mirror {
    config: Config,
    scratch: Option<TempDir>,
    work: CvsWork,
    since: Option<DateTime<Utc>>,
}

impl Mirror {
    pub fn new(cvsroot: &str, config: Config) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("cvssuck")
            .tempdir_in(&config.tmp_parent)?;
        let work = CvsWork::new(cvsroot, scratch.path(), config.debug)?;
        Ok(Self {
            config,
            scratch: Some(scratch),
            work,
            since: None,
        })
    }

    /// Only mirror revisions committed after `since` (incremental runs).
    pub fn set_since(&mut self, since: DateTime<Utc>) {
        self.since = Some(since);
    }

    pub fn run(&mut self, jobs: &[ModuleJob]) -> Result<()> {
        for job in jobs {
            info!("mirroring module {}", job.module);
            self.update_module(job)?;
        }
        if self.config.debug.leavetmp
            && let Some(scratch) = self.scratch.take()
        {
            let path = scratch.keep();
            info!("leaving scratch directory {}", path.display());
        }
        Ok(())
    }

    fn update_module(&mut self, job: &ModuleJob) -> Result<()> {
        let output_top = job.output.resolve(&job.module);
        let lock_top = job.lock.resolve(&job.module);
        let lockdir = if lock_top == output_top {
            None
        } else {
            Some(lock_top)
        };
        let mut repo = LocalRepository::new(output_top, lockdir, &self.config);

        let mut queue = VecDeque::new();
        queue.push_back(job.module.clone());
        while let Some(remote_dir) = queue.pop_front() {
            self.work.setup_workdir(&remote_dir)?;
            let subdirs = self.work.getsubdirs()?;

            let rel = relative_to_module(&remote_dir, &job.module);
            repo.directory(&rel)?;

            if self.config.breadth_first {
                for sub in &subdirs {
                    queue.push_back(format!("{remote_dir}/{sub}"));
                }
            } else {
                for sub in subdirs.iter().rev() {
                    queue.push_front(format!("{remote_dir}/{sub}"));
                }
            }

            // The child handles this directory's files and exits; the
            // parent is already free to list the next directory once the
            // wait returns.
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let code = match self.process_directory(&mut repo, &rel) {
                        Ok(()) => 0,
                        Err(err) => {
                            warn!("directory {remote_dir} failed: {err}");
                            1
                        }
                    };
                    std::process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, 0)) => {}
                    Ok(status) => {
                        warn!("worker for {remote_dir} exited abnormally: {status:?}")
                    }
                    Err(err) => warn!("wait for {remote_dir} worker failed: {err}"),
                },
                Err(err) => {
                    return Err(std::io::Error::from_raw_os_error(err as i32).into());
                }
            }
        }
        Ok(())
    }

    /// Plan and apply every file of the current remote directory. A
    /// failing file is logged and skipped; its siblings still mirror.
    fn process_directory(&mut self, repo: &mut LocalRepository, rel: &Path) -> Result<()> {
        let planner = build_planner(self.config.skeleton, self.config.introduce_1_1);
        let since = self.since;
        let logs = self.work.parse_logs(since.as_ref())?;
        let dir = repo.directory(rel)?;
        for filelog in &logs {
            match self.process_file(dir, planner.as_ref(), filelog) {
                Ok(()) => {}
                // Failing to lock the directory dooms every sibling too.
                Err(err @ Error::CouldNotLock { .. }) => return Err(err),
                Err(err) => warn!("file {} failed: {err}", filelog.info.working_file),
            }
        }
        Ok(())
    }

    fn process_file(
        &mut self,
        dir: &mut LocalDirectory,
        planner: &dyn Planner,
        filelog: &FileLog,
    ) -> Result<()> {
        let FileLog { info, deltas } = filelog;
        let plan = planner.plan(info, deltas);

        // Local-only revisions (the remote history shrank, or someone
        // committed into the mirror) are left untouched.
        if let Some(local) = dir.local_revisions(&info.working_file)? {
            let remote: HashSet<&Revision> = deltas.iter().map(|d| &d.revision).collect();
            for rev in local.iter().filter(|r| !remote.contains(*r)) {
                warn!(
                    "{}: revision {rev} exists locally but not remotely; leaving it alone",
                    info.working_file
                );
            }
        }

        for entry in plan {
            if !dir.checkinable(&info.working_file, &entry.local.revision)? {
                continue;
            }
            let contents = if entry.remote.is_dead() {
                None
            } else {
                Some(
                    self.work
                        .getrevision(&info.working_file, &entry.remote.revision)?,
                )
            };
            dir.commit(
                &info.working_file,
                entry.attic,
                info,
                &entry.local,
                contents.as_deref(),
            )?;
        }
        dir.update_attributes(&info.working_file, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_target_resolution() {
        let dir = OutputTarget::Dir(PathBuf::from("/srv/mirror"));
        assert_eq!(dir.resolve("proj"), PathBuf::from("/srv/mirror"));

        let base = OutputTarget::Base(PathBuf::from("/srv"));
        assert_eq!(base.resolve("proj"), PathBuf::from("/srv/proj"));
    }

    #[test]
    fn test_relative_to_module() {
        assert_eq!(relative_to_module("proj", "proj"), PathBuf::new());
        assert_eq!(
            relative_to_module("proj/src/lib", "proj"),
            PathBuf::from("src/lib")
        );
    }
}
