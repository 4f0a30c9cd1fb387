// src/remote.rs

//! Driving the cvs client in a scratch workspace.
//!
//! The workspace is a hand-built checkout skeleton: a root with
//! `CVS/Root` and `CVS/Repository = "."`, plus one sibling subdirectory
//! per remote directory examined (`a`, `b`, ...), each wired up as a
//! directory child in the root's `CVS/Entries`. The client is then pointed
//! at those subdirectories for listing, logging and per-revision
//! checkouts.

use crate::config::DebugFlags;
use crate::error::{Error, Result};
use crate::exec::{self, Tool};
use crate::logparse::{FileLog, LogParser};
use crate::revision::Revision;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use tracing::warn;

/// The side channel by which the client reports immediate subdirectories:
/// `cvs update: New directory `a/name' -- ignored` on stderr.
static NEW_DIRECTORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r": New directory `(.+)' -- ignored$").unwrap());

/// One remote directory currently wired into the workspace.
struct Workdir {
    name: String,
}

pub struct CvsWork {
    cvsroot: String,
    root: PathBuf,
    debug: DebugFlags,
    next_workdir: u32,
    workdir: Option<Workdir>,
    /// Last checkout, so consecutive plan entries for the same revision
    /// don't refetch.
    checkout: Option<(String, Revision, PathBuf)>,
}

/// Workspace subdirectory names run `a`, `b`, ..., `z`, `aa`, `ab`, ...
fn workdir_name(mut n: u32) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'a' + (n % 26) as u8);
        n /= 26;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap()
}

fn write_admin(dir: &Path, cvsroot: &str, repository: &str) -> Result<()> {
    fs::create_dir_all(dir.join("CVS"))?;
    fs::write(dir.join("CVS/Root"), format!("{cvsroot}\n"))?;
    fs::write(dir.join("CVS/Repository"), format!("{repository}\n"))?;
    fs::write(dir.join("CVS/Entries"), "")?;
    Ok(())
}

fn scan_new_directories(stderr: &str, workdir: &str) -> Vec<String> {
    let prefix = format!("{workdir}/");
    stderr
        .lines()
        .filter_map(|line| NEW_DIRECTORY.captures(line))
        .filter_map(|caps| {
            caps.get(1)
                .unwrap()
                .as_str()
                .strip_prefix(&prefix)
                .map(str::to_string)
        })
        .filter(|name| name != "." && name != ".." && !name.contains('/'))
        .collect()
}

/// Whether stderr consists only of chatter the listing trick is expected
/// to produce.
fn stderr_is_benign(stderr: &str) -> bool {
    stderr.lines().filter(|l| !l.trim().is_empty()).all(|line| {
        NEW_DIRECTORY.is_match(line)
            || line.contains("nothing known about")
            || line.contains("Updating")
    })
}

impl CvsWork {
    /// Set up the workspace root under `root` (an existing scratch
    /// directory owned by the caller).
    pub fn new(cvsroot: &str, root: &Path, debug: DebugFlags) -> Result<Self> {
        write_admin(root, cvsroot, ".")?;
        Ok(Self {
            cvsroot: cvsroot.to_string(),
            root: root.to_path_buf(),
            debug,
            next_workdir: 0,
            workdir: None,
            checkout: None,
        })
    }

    fn cvs_command(&self) -> Command {
        let mut cmd = Command::new("cvs");
        cmd.current_dir(&self.root);
        if self.debug.protocollog {
            cmd.env("CVS_CLIENT_LOG", self.root.join("protocol"));
        }
        cmd
    }

    fn current(&self) -> Result<&Workdir> {
        self.workdir.as_ref().ok_or_else(|| {
            Error::Io(std::io::Error::other("no remote directory selected"))
        })
    }

    /// Point the workspace at a remote directory: allocate a fresh sibling
    /// subdirectory, wire its admin files, and register it in the root's
    /// `CVS/Entries`. Drops the checkout cache.
    pub fn setup_workdir(&mut self, repository: &str) -> Result<()> {
        let name = workdir_name(self.next_workdir);
        self.next_workdir += 1;
        write_admin(&self.root.join(&name), &self.cvsroot, repository)?;
        let mut entries = fs::OpenOptions::new()
            .append(true)
            .open(self.root.join("CVS/Entries"))?;
        writeln!(entries, "D/{name}////")?;
        self.workdir = Some(Workdir { name });
        self.checkout = None;
        Ok(())
    }

    /// List the immediate subdirectories of the current remote directory.
    ///
    /// `cvs update -r00 -d -p` checks nothing out (no revision matches and
    /// `-p` keeps the tree clean) but makes the client report every
    /// server-side subdirectory it is ignoring.
    pub fn getsubdirs(&mut self) -> Result<Vec<String>> {
        let name = self.current()?.name.clone();
        let mut cmd = self.cvs_command();
        cmd.args(["update", "-r00", "-d", "-p"]).arg(&name);
        let output = exec::run(&mut cmd, self.debug.command)?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let subdirs = scan_new_directories(&stderr, &name);
        if !output.status.success() && subdirs.is_empty() && !stderr_is_benign(&stderr) {
            return Err(exec::failure(Tool::Cvs, &cmd, &output));
        }
        Ok(subdirs)
    }

    /// Retrieve and parse `cvs log` for the current remote directory.
    ///
    /// With `since`, only revisions committed after that time are
    /// requested. An empty directory (exit 1 with `nothing known about`)
    /// is a warning, not a failure; so is an individual unparsable file.
    pub fn parse_logs(&mut self, since: Option<&DateTime<Utc>>) -> Result<Vec<FileLog>> {
        let name = self.current()?.name.clone();
        let mut cmd = self.cvs_command();
        cmd.arg("log");
        if let Some(since) = since {
            cmd.arg(format!("-d{}<", since.format("%Y-%m-%d %H:%M:%S %z")));
        }
        cmd.arg(&name);

        let mut capture = tempfile::tempfile()?;
        let (status, stderr) =
            exec::run_stdout_to(&mut cmd, capture.try_clone()?, self.debug.command)?;
        if !status.success() {
            if status.code() == Some(1) && stderr.contains("nothing known about") {
                warn!("remote directory {name} is empty");
                return Ok(Vec::new());
            }
            return Err(Error::CvsCommand {
                command: exec::command_line(&cmd),
                status: status.code().unwrap_or(-1),
                stderr: stderr.trim_end().to_string(),
            });
        }

        capture.seek(SeekFrom::Start(0))?;
        let mut files = Vec::new();
        for item in LogParser::new(BufReader::new(capture)) {
            match item {
                Ok(file) => files.push(file),
                Err(err) => warn!("unparsable file in {name}: {err}"),
            }
        }
        Ok(files)
    }

    /// Check out one revision of one file into the workspace and return
    /// its path.
    ///
    /// `-ko` disables keyword expansion on output while the server still
    /// performs delta transmission. The returned path may not exist when
    /// the revision is not pertinent; callers treat that as empty content.
    pub fn getrevision(&mut self, working_file: &str, rev: &Revision) -> Result<PathBuf> {
        let name = self.current()?.name.clone();
        if let Some((file, cached_rev, path)) = &self.checkout
            && file == working_file
            && cached_rev == rev
        {
            return Ok(path.clone());
        }
        let relpath = format!("{name}/{working_file}");
        let mut cmd = self.cvs_command();
        cmd.args(["update", "-ko"])
            .arg(format!("-r{rev}"))
            .arg(&relpath);
        let output = exec::run(&mut cmd, self.debug.command)?;
        if !output.status.success() {
            return Err(exec::failure(Tool::Cvs, &cmd, &output));
        }
        let path = self.root.join(&relpath);
        self.checkout = Some((working_file.to_string(), rev.clone(), path.clone()));
        Ok(path)
    }
}
