// src/local/mod.rs

//! The local RCS tree.
//!
//! A [`LocalRepository`] hands out [`LocalDirectory`] handles interned by
//! relative path; each directory owns its CVS lock state and its files'
//! caches. All read paths take the reader lock, all mutations the writer
//! lock, so other CVS clients working against the same tree observe
//! consistent state.

pub mod file;
pub mod lock;

use crate::config::{Config, DebugFlags, LockRetry};
use crate::error::Result;
use crate::logparse::{DeltaInfo, RcsInfo};
use crate::revision::Revision;
use crate::revset::RevisionSet;
use file::LocalFile;
use lock::DirLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Create a directory if needed, with the mkdir debug toggles.
fn ensure_dir(path: &Path, flags: &DebugFlags) -> Result<()> {
    if path.is_dir() {
        if flags.mkdir_exist {
            debug!("directory exists: {}", path.display());
        }
        return Ok(());
    }
    fs::create_dir_all(path)?;
    if flags.mkdir {
        debug!("created directory: {}", path.display());
    }
    Ok(())
}

/// One mirrored directory: the `,v` files under `rcsdir`, locked through
/// the (possibly aliased) `lockdir`.
pub struct LocalDirectory {
    rcsdir: PathBuf,
    lock: DirLock,
    files: HashMap<String, LocalFile>,
    debug: DebugFlags,
}

impl LocalDirectory {
    fn new(rcsdir: PathBuf, lockdir: PathBuf, retry: LockRetry, debug: DebugFlags) -> Self {
        Self {
            rcsdir,
            lock: DirLock::new(lockdir, retry),
            files: HashMap::new(),
            debug,
        }
    }

    pub fn rcsdir(&self) -> &Path {
        &self.rcsdir
    }

    /// Run `body` under the reader lock, entering it if necessary.
    pub fn read_locked<T>(
        &mut self,
        body: impl FnOnce(&mut LocalDirectory) -> Result<T>,
    ) -> Result<T> {
        let token = self.lock.enter_read()?;
        let out = body(self);
        self.lock.exit_read(token);
        out
    }

    /// Run `body` under the writer lock; nests inside a read scope.
    pub fn write_locked<T>(
        &mut self,
        body: impl FnOnce(&mut LocalDirectory) -> Result<T>,
    ) -> Result<T> {
        let token = self.lock.enter_write()?;
        let out = body(self);
        self.lock.exit_write(token);
        out
    }

    /// Revisions currently present in the local RCS file, if it exists.
    pub fn local_revisions(&mut self, name: &str) -> Result<Option<RevisionSet>> {
        self.read_locked(|dir| {
            let LocalDirectory {
                rcsdir,
                lock,
                files,
                debug,
            } = dir;
            let file = files
                .entry(name.to_string())
                .or_insert_with(|| LocalFile::new(name));
            file.read_log(rcsdir, lock, debug)?;
            Ok(file.revisions().cloned())
        })
    }

    /// Whether `rev` could be inserted right now.
    ///
    /// The cached revision set is consulted first without locking: since
    /// revisions are never removed, a cached "no" stays a "no". Only a
    /// potentially positive answer pays for a read lock and a re-check
    /// against disk.
    pub fn checkinable(&mut self, name: &str, rev: &Revision) -> Result<bool> {
        if let Some(file) = self.files.get(name)
            && file.cached_not_checkinable(rev)
        {
            return Ok(false);
        }
        self.read_locked(|dir| {
            let LocalDirectory {
                rcsdir,
                lock,
                files,
                debug,
            } = dir;
            let file = files
                .entry(name.to_string())
                .or_insert_with(|| LocalFile::new(name));
            file.read_log(rcsdir, lock, debug)?;
            Ok(match file.revisions() {
                Some(revs) => revs.checkinable(rev).is_some(),
                None => RevisionSet::new().checkinable(rev).is_some(),
            })
        })
    }

    /// Insert one revision under the writer lock.
    pub fn commit(
        &mut self,
        name: &str,
        attic: Option<bool>,
        info: &RcsInfo,
        delta: &DeltaInfo,
        contents: Option<&Path>,
    ) -> Result<()> {
        self.write_locked(|dir| {
            let LocalDirectory {
                rcsdir,
                lock,
                files,
                debug,
            } = dir;
            let file = files
                .entry(name.to_string())
                .or_insert_with(|| LocalFile::new(name));
            file.commit(rcsdir, lock, attic, info, delta, contents, debug)
        })
    }

    /// Reconcile tags, keyword mode and default branch with the remote
    /// header, under the writer lock.
    pub fn update_attributes(&mut self, name: &str, remote: &RcsInfo) -> Result<()> {
        self.write_locked(|dir| {
            let LocalDirectory {
                rcsdir,
                lock,
                files,
                debug,
            } = dir;
            let file = files
                .entry(name.to_string())
                .or_insert_with(|| LocalFile::new(name));
            file.update_attributes(rcsdir, lock, remote, debug)
        })
    }
}

/// The mirrored tree for one module: `topdir` holds the `,v` files,
/// `lockdir` the lock files (they usually alias).
pub struct LocalRepository {
    topdir: PathBuf,
    lockdir: PathBuf,
    retry: LockRetry,
    debug: DebugFlags,
    dirs: HashMap<PathBuf, LocalDirectory>,
}

impl LocalRepository {
    pub fn new(topdir: PathBuf, lockdir: Option<PathBuf>, config: &Config) -> Self {
        let lockdir = lockdir.unwrap_or_else(|| topdir.clone());
        Self {
            topdir,
            lockdir,
            retry: config.lock_retry,
            debug: config.debug,
            dirs: HashMap::new(),
        }
    }

    /// Handle for the directory at `rel`, creating the on-disk directories
    /// on demand. Handles are interned, so lock state is shared between
    /// callers naming the same path.
    pub fn directory(&mut self, rel: &Path) -> Result<&mut LocalDirectory> {
        if !self.dirs.contains_key(rel) {
            let rcsdir = self.topdir.join(rel);
            let lockpath = self.lockdir.join(rel);
            ensure_dir(&rcsdir, &self.debug)?;
            if lockpath != rcsdir {
                ensure_dir(&lockpath, &self.debug)?;
            }
            self.dirs.insert(
                rel.to_path_buf(),
                LocalDirectory::new(rcsdir, lockpath, self.retry, self.debug),
            );
        }
        Ok(self.dirs.get_mut(rel).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            lock_retry: LockRetry {
                attempts: 2,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_directory_created_on_demand_and_interned() {
        let top = tempfile::tempdir().unwrap();
        let config = test_config();
        let mut repo = LocalRepository::new(top.path().join("out"), None, &config);

        let dir = repo.directory(Path::new("sub/inner")).unwrap();
        assert!(dir.rcsdir().is_dir());
        let rcsdir = dir.rcsdir().to_path_buf();

        // Same handle again.
        let dir = repo.directory(Path::new("sub/inner")).unwrap();
        assert_eq!(dir.rcsdir(), rcsdir);
        assert_eq!(repo.dirs.len(), 1);
    }

    #[test]
    fn test_separate_lock_tree() {
        let top = tempfile::tempdir().unwrap();
        let out = top.path().join("out");
        let locks = top.path().join("locks");
        let config = test_config();
        let mut repo = LocalRepository::new(out.clone(), Some(locks.clone()), &config);

        let dir = repo.directory(Path::new("sub")).unwrap();
        assert!(out.join("sub").is_dir());
        assert!(locks.join("sub").is_dir());

        // Lock files land in the lock tree, not the output tree.
        dir.read_locked(|dir| {
            let locked: Vec<_> = fs::read_dir(locks.join("sub"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(locked.len(), 1);
            assert!(locked[0].starts_with("#cvs.rfl"));
            assert_eq!(fs::read_dir(out.join("sub")).unwrap().count(), 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_checkinable_on_absent_file() {
        let top = tempfile::tempdir().unwrap();
        let config = test_config();
        let mut repo = LocalRepository::new(top.path().join("out"), None, &config);
        let dir = repo.directory(Path::new("")).unwrap();

        // No RCS file yet: 1.1 is insertable, a branch revision is not.
        assert!(dir.checkinable("file.c", &"1.1".parse().unwrap()).unwrap());
        assert!(
            !dir.checkinable("file.c", &"1.2.2.1".parse().unwrap())
                .unwrap()
        );
    }

    #[test]
    fn test_locked_scopes_nest() {
        let top = tempfile::tempdir().unwrap();
        let config = test_config();
        let mut repo = LocalRepository::new(top.path().join("out"), None, &config);
        let dir = repo.directory(Path::new("")).unwrap();

        dir.read_locked(|dir| {
            dir.write_locked(|dir| {
                dir.read_locked(|_| Ok(()))
            })
        })
        .unwrap();
    }
}
