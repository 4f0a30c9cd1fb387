// src/logparse.rs

//! Parser for `cvs log` / `rlog` output.
//!
//! Files in the output are delimited by a line of 77 `=` characters; deltas
//! within a file by a line of 28 `-` characters followed by a line
//! beginning with `revision `. Log messages and descriptions may themselves
//! contain dash lines, so a dash line only delimits when the `revision`
//! line follows.
//!
//! Output that is not valid UTF-8 is re-interpreted as ISO-8859-1. The
//! re-interpretation is deterministic, so records parsed from the same
//! bytes always compare equal.

use crate::error::{Error, Result};
use crate::revision::Revision;
use regex::Regex;
use std::io::BufRead;
use std::sync::LazyLock;
use tracing::warn;

const FILE_DELIM: &str =
    "=============================================================================";
const DELTA_DELIM: &str = "----------------------------";

static DATE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^date: (\d{4}[/-]\d{2}[/-]\d{2} +\d{2}:\d{2}:\d{2}(?: *[-+]\d{4})?); *author: ([^;]+); *state: ([^;]+);",
    )
    .unwrap()
});

static SYMBOLIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(\S+): (\S+)$").unwrap());

/// One delta as reported by `cvs log`.
///
/// The date string is preserved verbatim so that it can be handed back to
/// `ci -d` without reformatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaInfo {
    pub revision: Revision,
    pub date: String,
    pub author: String,
    pub state: String,
    pub branches: Vec<Revision>,
    pub log: String,
}

impl DeltaInfo {
    pub fn is_dead(&self) -> bool {
        self.state == "dead"
    }
}

/// The per-file header of a log listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcsInfo {
    /// Path of the `,v` file as reported by the server.
    pub rcs_path: String,
    /// Basename of the working file.
    pub working_file: String,
    pub head: Revision,
    pub default_branch: Option<Revision>,
    /// Symbolic names in server order.
    pub tags: Vec<(String, Revision)>,
    pub keyword_mode: String,
    pub description: String,
}

impl RcsInfo {
    /// Whether the server keeps this file in the Attic, i.e. its head
    /// revision is dead. Syntactic test on the reported path.
    pub fn in_attic(&self) -> bool {
        let mut components = self.rcs_path.rsplit('/');
        components.next();
        components.next() == Some("Attic")
    }
}

/// A complete per-file log: header plus deltas in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLog {
    pub info: RcsInfo,
    pub deltas: Vec<DeltaInfo>,
}

/// Decode a line of log output: UTF-8 if valid, ISO-8859-1 otherwise.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn malformed(what: &str, line: &str) -> Error {
    Error::LogFormat(format!("{what}: {line:?}"))
}

fn parse_revision(s: &str) -> Result<Revision> {
    s.parse().map_err(|_| malformed("bad revision number", s))
}

/// Streaming parser over log output; yields one [`FileLog`] per file.
///
/// A malformed file yields an `Err` and the parser resynchronises at the
/// next file delimiter, so siblings still parse.
pub struct LogParser<R> {
    input: R,
    peeked: Option<Option<String>>,
    done: bool,
}

impl<R: BufRead> LogParser<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            peeked: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.peeked.take() {
            return Ok(line);
        }
        let mut buf = Vec::new();
        let n = self.input.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(decode(&buf)))
    }

    fn peek_line(&mut self) -> Result<Option<&String>> {
        if self.peeked.is_none() {
            let line = self.read_line()?;
            self.peeked = Some(line);
        }
        Ok(self.peeked.as_ref().unwrap().as_ref())
    }

    /// Consume input up to and including the next file delimiter.
    fn resync(&mut self) {
        loop {
            match self.read_line() {
                Ok(Some(line)) if line == FILE_DELIM => return,
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    self.done = true;
                    return;
                }
            }
        }
    }

    /// Parse one file; the caller has not yet consumed its header.
    /// Returns `Ok(None)` at end of input.
    fn parse_file(&mut self) -> Result<Option<FileLog>> {
        // Scan past blank separator lines to the next header.
        let rcs_path = loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match line.strip_prefix("RCS file: ") {
                    Some(path) => break path.to_string(),
                    None => return Err(malformed("expected RCS file header", &line)),
                },
            }
        };

        let mut working_file = None;
        let mut head = None;
        let mut default_branch = None;
        let mut tags = Vec::new();
        let mut keyword_mode = None;

        // Header lines up to `description:`. Unknown fields (locks, access
        // list, total revisions) are skipped.
        loop {
            let line = match self.read_line()? {
                Some(line) => line,
                None => return Err(malformed("truncated header", &rcs_path)),
            };
            if let Some(value) = line.strip_prefix("Working file: ") {
                let base = value.rsplit('/').next().unwrap_or("");
                if base.is_empty() || base == "." || base == ".." {
                    return Err(malformed("unsafe working file name", value));
                }
                working_file = Some(base.to_string());
            } else if let Some(value) = line.strip_prefix("head:") {
                let value = value.trim();
                if value.is_empty() {
                    return Err(malformed("file has no head revision", &rcs_path));
                }
                head = Some(parse_revision(value)?);
            } else if let Some(value) = line.strip_prefix("branch:") {
                let value = value.trim();
                if !value.is_empty() {
                    default_branch = Some(
                        Revision::from_parts(
                            value
                                .split('.')
                                .map(|p| p.parse::<u32>())
                                .collect::<std::result::Result<_, _>>()
                                .map_err(|_| malformed("bad default branch", value))?,
                        ),
                    );
                }
            } else if line == "symbolic names:" {
                while let Some(next) = self.peek_line()? {
                    let Some(caps) = SYMBOLIC_NAME.captures(next) else {
                        break;
                    };
                    let name = caps[1].to_string();
                    let rev = parse_revision(&caps[2])?;
                    tags.push((name, rev));
                    self.read_line()?;
                }
            } else if let Some(value) = line.strip_prefix("keyword substitution: ") {
                keyword_mode = Some(value.to_string());
            } else if line == "description:" {
                break;
            }
            // locks:, access list:, total revisions: and their
            // continuation lines fall through here.
        }

        let working_file =
            working_file.ok_or_else(|| malformed("missing working file", &rcs_path))?;
        let head = head.ok_or_else(|| malformed("missing head", &rcs_path))?;
        let keyword_mode =
            keyword_mode.ok_or_else(|| malformed("missing keyword mode", &rcs_path))?;

        let (description, mut at_delta) = self.read_text_block()?;

        let info = RcsInfo {
            rcs_path,
            working_file,
            head,
            default_branch,
            tags,
            keyword_mode,
            description,
        };

        let mut deltas = Vec::new();
        while at_delta {
            let (delta, more) = self.parse_delta(&info)?;
            deltas.push(delta);
            at_delta = more;
        }

        Ok(Some(FileLog { info, deltas }))
    }

    /// Accumulate free-form text up to the next delimiter. Returns the text
    /// and whether a delta follows (false means end of file).
    fn read_text_block(&mut self) -> Result<(String, bool)> {
        let mut lines: Vec<String> = Vec::new();
        loop {
            let line = match self.read_line()? {
                Some(line) => line,
                None => return Err(malformed("truncated log text", "<eof>")),
            };
            if line == FILE_DELIM {
                return Ok((lines.join("\n"), false));
            }
            if line == DELTA_DELIM
                && let Some(next) = self.peek_line()?
                && next.starts_with("revision ")
            {
                return Ok((lines.join("\n"), true));
            }
            lines.push(line);
        }
    }

    fn parse_delta(&mut self, info: &RcsInfo) -> Result<(DeltaInfo, bool)> {
        let line = match self.read_line()? {
            Some(line) => line,
            None => return Err(malformed("truncated delta", &info.rcs_path)),
        };
        let rest = line
            .strip_prefix("revision ")
            .ok_or_else(|| malformed("expected revision line", &line))?;
        // `cvs log` appends "\tlocked by: ...;" after the number.
        let revision =
            parse_revision(rest.split_whitespace().next().unwrap_or(""))?;

        let line = match self.read_line()? {
            Some(line) => line,
            None => return Err(malformed("truncated delta", &info.rcs_path)),
        };
        let caps = DATE_LINE
            .captures(&line)
            .ok_or_else(|| malformed("bad date line", &line))?;
        let date = caps[1].to_string();
        let author = caps[2].trim().to_string();
        let state = caps[3].trim().to_string();

        let mut branches = Vec::new();
        if let Some(next) = self.peek_line()?
            && let Some(rest) = next.strip_prefix("branches:")
        {
            for piece in rest.split(';') {
                let piece = piece.trim();
                if !piece.is_empty() {
                    branches.push(Revision::from_parts(
                        piece
                            .split('.')
                            .map(|p| p.parse::<u32>())
                            .collect::<std::result::Result<_, _>>()
                            .map_err(|_| malformed("bad branch list", piece))?,
                    ));
                }
            }
            self.read_line()?;
        }

        let (log, more) = self.read_text_block()?;

        Ok((
            DeltaInfo {
                revision,
                date,
                author,
                state,
                branches,
                log,
            },
            more,
        ))
    }
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<FileLog>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parse_file() {
            Ok(Some(file)) => Some(Ok(file)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                match &err {
                    Error::LogFormat(_) => {
                        warn!("skipping malformed log entry: {err}");
                        self.resync();
                    }
                    _ => self.done = true,
                }
                Some(Err(err))
            }
        }
    }
}
