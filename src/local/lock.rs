// src/local/lock.rs

//! CVS-compatible reader/writer locking of a local directory.
//!
//! The on-disk protocol is the one every CVS client speaks: a `#cvs.lock`
//! directory is the master lock (created atomically with `mkdir`), and
//! `#cvs.rfl<info>` / `#cvs.wfl<info>` sentinel files mark active readers
//! and writers, where `<info>` is `.<hostname>.<pid>`. Readers hold the
//! master lock only while registering; writers hold it for the whole write
//! window and must see no foreign reader sentinels.
//!
//! Every observable lock transition bumps an age counter; cached views of
//! the directory's files are keyed by it, so state cached across an
//! unlocked window (during which another process may have written) is
//! never reused.

use crate::config::LockRetry;
use crate::error::{Error, Result};
use nix::sys::signal::{SigHandler, Signal, signal};
use rand::Rng;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const MASTER_LOCK: &str = "#cvs.lock";
const READ_LOCK_PREFIX: &str = "#cvs.rfl";
const WRITE_LOCK_PREFIX: &str = "#cvs.wfl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Read,
    Write,
}

/// One failed acquisition step. Consumed by the retry layer; never leaves
/// this module.
#[derive(Debug)]
struct LockFailure {
    path: PathBuf,
    source: io::Error,
}

/// Scoped SIGINT/SIGTERM ignore.
///
/// A user abort while a lock is held would leave stale lock files behind
/// for every other client of the repository, so both signals are ignored
/// for the duration and the previous dispositions restored on release.
struct SignalGuard {
    int: SigHandler,
    term: SigHandler,
}

impl SignalGuard {
    fn install() -> Self {
        // Safety: SigIgn and the saved dispositions carry no handler code.
        unsafe {
            let int = signal(Signal::SIGINT, SigHandler::SigIgn).unwrap_or(SigHandler::SigDfl);
            let term = signal(Signal::SIGTERM, SigHandler::SigIgn).unwrap_or(SigHandler::SigDfl);
            SignalGuard { int, term }
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = signal(Signal::SIGINT, self.int);
            let _ = signal(Signal::SIGTERM, self.term);
        }
    }
}

/// Proof that `enter_read` ran; carries whether this call acquired the
/// lock (as opposed to running inside an existing scope).
#[must_use]
pub struct ReadToken {
    acquired: bool,
}

/// Proof that `enter_write` ran; remembers the state to restore, so a
/// write scope nested in a read scope drops back to reading.
#[must_use]
pub struct WriteToken {
    restore: LockState,
}

/// Lock state of one local directory.
pub struct DirLock {
    lockdir: PathBuf,
    state: LockState,
    age: u64,
    retry: LockRetry,
    guard: Option<SignalGuard>,
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

impl DirLock {
    pub fn new(lockdir: PathBuf, retry: LockRetry) -> Self {
        Self {
            lockdir,
            state: LockState::Unlocked,
            age: 0,
            retry,
            guard: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state != LockState::Unlocked
    }

    /// Cache key: changes on every lock transition.
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Computed per acquisition so forked children stamp their own pid.
    fn info(&self) -> String {
        format!(".{}.{}", hostname(), std::process::id())
    }

    fn master_path(&self) -> PathBuf {
        self.lockdir.join(MASTER_LOCK)
    }

    fn sentinel_path(&self, prefix: &str) -> PathBuf {
        self.lockdir.join(format!("{prefix}{}", self.info()))
    }

    fn set_state(&mut self, state: LockState) {
        if state == self.state {
            return;
        }
        self.state = state;
        self.age += 1;
    }

    fn master_lock(&self) -> std::result::Result<(), LockFailure> {
        let path = self.master_path();
        fs::create_dir(&path).map_err(|source| LockFailure { path, source })
    }

    fn master_unlock(&self) {
        let _ = fs::remove_dir(self.master_path());
    }

    fn create_sentinel(&self, prefix: &str) -> std::result::Result<(), LockFailure> {
        let path = self.sentinel_path(prefix);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map(|_| ())
            .map_err(|source| LockFailure { path, source })
    }

    fn remove_sentinel(&self, prefix: &str) {
        let _ = fs::remove_file(self.sentinel_path(prefix));
    }

    /// Any reader sentinel that is not our own blocks a writer.
    fn check_no_foreign_readers(&self) -> std::result::Result<(), LockFailure> {
        let own = format!("{READ_LOCK_PREFIX}{}", self.info());
        let entries = fs::read_dir(&self.lockdir).map_err(|source| LockFailure {
            path: self.lockdir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| LockFailure {
                path: self.lockdir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(READ_LOCK_PREFIX) && name != own {
                return Err(LockFailure {
                    path: entry.path(),
                    source: io::Error::new(io::ErrorKind::WouldBlock, "foreign read lock"),
                });
            }
        }
        Ok(())
    }

    /// Retry an acquisition step with randomised backoff, then give up.
    fn retrying(
        &self,
        step: impl Fn(&DirLock) -> std::result::Result<(), LockFailure>,
    ) -> Result<()> {
        let mut rng = rand::thread_rng();
        for attempt in 1..=self.retry.attempts {
            match step(self) {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    if attempt == self.retry.attempts {
                        break;
                    }
                    let min = self.retry.min_delay.as_millis() as u64;
                    let max = (self.retry.max_delay.as_millis() as u64).max(min);
                    let delay = Duration::from_millis(rng.gen_range(min..=max));
                    warn!(
                        "lock busy at {} ({}); retrying in {:.0?}",
                        failure.path.display(),
                        failure.source,
                        delay
                    );
                    std::thread::sleep(delay);
                }
            }
        }
        Err(Error::CouldNotLock {
            dir: self.lockdir.clone(),
            attempts: self.retry.attempts,
        })
    }

    /// Begin a read scope. Inside an existing read or write scope this is
    /// a no-op; otherwise the master lock is taken just long enough to
    /// register a reader sentinel.
    pub fn enter_read(&mut self) -> Result<ReadToken> {
        if self.state != LockState::Unlocked {
            return Ok(ReadToken { acquired: false });
        }
        // Signals stay ignored from before the first lock file exists
        // until after the last one is removed; a dropped guard (early
        // return) restores them.
        let guard = SignalGuard::install();
        self.retrying(|lock| {
            lock.master_lock()?;
            let registered = lock.create_sentinel(READ_LOCK_PREFIX);
            lock.master_unlock();
            registered
        })?;
        self.guard = Some(guard);
        self.set_state(LockState::Read);
        debug!("read-locked {}", self.lockdir.display());
        Ok(ReadToken { acquired: true })
    }

    pub fn exit_read(&mut self, token: ReadToken) {
        if !token.acquired {
            return;
        }
        self.remove_sentinel(READ_LOCK_PREFIX);
        self.set_state(LockState::Unlocked);
        self.guard = None;
    }

    /// Begin a write scope. The master lock is held until `exit_write`.
    /// Nesting inside a read scope is allowed; the read state is restored
    /// on exit (our own reader sentinel does not block us).
    pub fn enter_write(&mut self) -> Result<WriteToken> {
        if self.state == LockState::Write {
            return Ok(WriteToken {
                restore: LockState::Write,
            });
        }
        let restore = self.state;
        let guard = match restore {
            LockState::Unlocked => Some(SignalGuard::install()),
            _ => None,
        };
        self.retrying(|lock| {
            lock.master_lock()?;
            let registered = lock
                .check_no_foreign_readers()
                .and_then(|()| lock.create_sentinel(WRITE_LOCK_PREFIX));
            if registered.is_err() {
                lock.master_unlock();
            }
            registered
        })?;
        if let Some(guard) = guard {
            self.guard = Some(guard);
        }
        self.set_state(LockState::Write);
        debug!("write-locked {}", self.lockdir.display());
        Ok(WriteToken { restore })
    }

    pub fn exit_write(&mut self, token: WriteToken) {
        if token.restore == LockState::Write {
            return;
        }
        self.remove_sentinel(WRITE_LOCK_PREFIX);
        self.master_unlock();
        self.set_state(token.restore);
        if token.restore == LockState::Unlocked {
            self.guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn fast_retry(attempts: u32) -> LockRetry {
        LockRetry {
            attempts,
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        }
    }

    fn lock_in(dir: &std::path::Path, attempts: u32) -> DirLock {
        DirLock::new(dir.to_path_buf(), fast_retry(attempts))
    }

    fn sentinel_count(dir: &std::path::Path, prefix: &str) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(prefix)
            })
            .count()
    }

    #[test]
    fn test_read_scope_creates_and_removes_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = lock_in(dir.path(), 2);

        let token = lock.enter_read().unwrap();
        assert_eq!(lock.state(), LockState::Read);
        assert_eq!(sentinel_count(dir.path(), READ_LOCK_PREFIX), 1);
        // Master lock is only held while registering.
        assert!(!dir.path().join(MASTER_LOCK).exists());

        lock.exit_read(token);
        assert_eq!(lock.state(), LockState::Unlocked);
        assert_eq!(sentinel_count(dir.path(), READ_LOCK_PREFIX), 0);
    }

    #[test]
    fn test_write_scope_holds_master_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = lock_in(dir.path(), 2);

        let token = lock.enter_write().unwrap();
        assert_eq!(lock.state(), LockState::Write);
        assert!(dir.path().join(MASTER_LOCK).is_dir());
        assert_eq!(sentinel_count(dir.path(), WRITE_LOCK_PREFIX), 1);

        lock.exit_write(token);
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(!dir.path().join(MASTER_LOCK).exists());
        assert_eq!(sentinel_count(dir.path(), WRITE_LOCK_PREFIX), 0);
    }

    #[test]
    fn test_reentrant_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = lock_in(dir.path(), 2);

        let outer = lock.enter_read().unwrap();
        let age = lock.age();
        let inner = lock.enter_read().unwrap();
        // The inner scope neither re-registers nor bumps the age.
        assert_eq!(lock.age(), age);
        assert_eq!(sentinel_count(dir.path(), READ_LOCK_PREFIX), 1);
        lock.exit_read(inner);
        assert_eq!(lock.state(), LockState::Read);
        lock.exit_read(outer);
        assert_eq!(lock.state(), LockState::Unlocked);
    }

    #[test]
    fn test_write_nested_in_read_restores_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = lock_in(dir.path(), 2);

        let read = lock.enter_read().unwrap();
        let write = lock.enter_write().unwrap();
        assert_eq!(lock.state(), LockState::Write);
        // Our own reader sentinel is still registered and did not block us.
        assert_eq!(sentinel_count(dir.path(), READ_LOCK_PREFIX), 1);

        lock.exit_write(write);
        assert_eq!(lock.state(), LockState::Read);
        assert_eq!(sentinel_count(dir.path(), WRITE_LOCK_PREFIX), 0);
        assert!(!dir.path().join(MASTER_LOCK).exists());
        lock.exit_read(read);
    }

    #[test]
    fn test_foreign_reader_blocks_writer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("#cvs.rfl.otherhost.4242"), "").unwrap();

        let mut lock = lock_in(dir.path(), 3);
        match lock.enter_write() {
            Err(Error::CouldNotLock { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected CouldNotLock, got {other:?}", other = other.err()),
        }
        assert_eq!(lock.state(), LockState::Unlocked);
        // Nothing of ours left behind.
        assert!(!dir.path().join(MASTER_LOCK).exists());
        assert_eq!(sentinel_count(dir.path(), WRITE_LOCK_PREFIX), 0);
    }

    #[test]
    fn test_contended_master_lock_retries_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join(MASTER_LOCK);
        fs::create_dir(&master).unwrap();

        let release = master.clone();
        let peer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            fs::remove_dir(&release).unwrap();
        });

        let mut lock = lock_in(dir.path(), 10);
        let start = Instant::now();
        let token = lock.enter_read().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5));
        lock.exit_read(token);
        peer.join().unwrap();
    }

    #[test]
    fn test_age_advances_across_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = lock_in(dir.path(), 2);
        let age0 = lock.age();

        let read = lock.enter_read().unwrap();
        let age1 = lock.age();
        assert!(age1 > age0);

        let write = lock.enter_write().unwrap();
        let age2 = lock.age();
        assert!(age2 > age1);

        lock.exit_write(write);
        let age3 = lock.age();
        assert!(age3 > age2);

        lock.exit_read(read);
        assert!(lock.age() > age3);
    }
}
