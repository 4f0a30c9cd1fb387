// src/revision.rs

//! Dotted CVS/RCS revision numbers.
//!
//! A revision is an ordered sequence of numeric components: `1.2` on the
//! trunk, `1.2.2.1` on a branch, `1.2.2` naming the branch itself. CVS also
//! encodes branch tags as *magic branches* of the form `1.2.0.2`, whose
//! revisions live on `1.2.2.x` once they exist.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid revision number: {0}")]
pub struct RevisionParseError(String);

/// A dotted revision number.
///
/// Ordering is lexicographic on the component sequence, with a shorter
/// sequence sorting before a longer one sharing its prefix (`1.2` < `1.2.2`
/// < `1.2.2.1` < `1.3`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(Vec<u32>);

impl Revision {
    /// Build a revision from raw components.
    ///
    /// Revisions parsed from log output always have at least two
    /// components; shorter sequences arise only as branch prefixes computed
    /// by [`Revision::branch`].
    pub fn from_parts(parts: Vec<u32>) -> Self {
        debug_assert!(!parts.is_empty());
        Revision(parts)
    }

    pub fn parts(&self) -> &[u32] {
        &self.0
    }

    /// Trunk revisions have exactly two components.
    pub fn is_trunk(&self) -> bool {
        self.0.len() == 2
    }

    /// A branch (as opposed to a revision on a branch) has an odd number of
    /// components.
    pub fn is_branch(&self) -> bool {
        self.0.len() % 2 == 1
    }

    /// A magic branch is CVS's encoding of a branch tag whose revisions do
    /// not exist yet: even length >= 4 with a zero next-to-last component.
    pub fn is_magic_branch(&self) -> bool {
        let n = self.0.len();
        n >= 4 && n % 2 == 0 && self.0[n - 2] == 0
    }

    /// The branch this revision lives on (drops the last component).
    ///
    /// Only meaningful for revisions, not for branches themselves.
    pub fn branch(&self) -> Revision {
        debug_assert!(!self.is_branch());
        Revision(self.0[..self.0.len() - 1].to_vec())
    }

    /// The revision this branch forks from (drops the last two components).
    ///
    /// Defined for branch revisions (`1.2.2.1` -> `1.2`) and for magic
    /// branches (`1.2.0.2` -> `1.2`).
    pub fn branch_point(&self) -> Revision {
        debug_assert!(self.0.len() >= 4 && !self.is_branch());
        Revision(self.0[..self.0.len() - 2].to_vec())
    }

    /// Whether two revisions live on the same branch. Any two trunk
    /// revisions do; otherwise the sequences must have equal length and
    /// agree on everything but the last component.
    pub fn same_branch(&self, other: &Revision) -> bool {
        if self.is_trunk() && other.is_trunk() {
            return true;
        }
        self.0.len() == other.0.len()
            && self.0[..self.0.len() - 1] == other.0[..other.0.len() - 1]
    }

    /// Compare by revision order; exposed for readability at call sites
    /// that mix revisions and optional heads.
    pub fn compare(&self, other: &Revision) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| RevisionParseError(s.to_string()))?;
        if parts.len() < 2 {
            return Err(RevisionParseError(s.to_string()));
        }
        Ok(Revision(parts))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> Revision {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        for s in ["1.1", "1.2.2.1", "1.2.0.4", "10.200.3000.4"] {
            assert_eq!(rev(s).to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<Revision>().is_err());
        assert!("1".parse::<Revision>().is_err());
        assert!("1.".parse::<Revision>().is_err());
        assert!("1.x".parse::<Revision>().is_err());
        assert!("1..2".parse::<Revision>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(rev("1.1") < rev("1.2"));
        assert!(rev("1.2") < rev("1.10"));
        assert!(rev("1.2") < rev("1.2.2.1"));
        assert!(rev("1.2.2.1") < rev("1.2.2.2"));
        assert!(rev("1.2.2.2") < rev("1.3"));
        assert!(rev("1.2.2.1") < rev("1.2.4.1"));
    }

    #[test]
    fn test_predicates() {
        assert!(rev("1.2").is_trunk());
        assert!(!rev("1.2.2.1").is_trunk());
        assert!(!rev("1.2").is_branch());
        assert!(Revision::from_parts(vec![1, 2, 2]).is_branch());
        assert!(rev("1.2.0.4").is_magic_branch());
        assert!(!rev("1.2.2.4").is_magic_branch());
        assert!(!rev("1.2").is_magic_branch());
    }

    #[test]
    fn test_branch_and_branch_point() {
        assert_eq!(rev("1.2.2.1").branch(), Revision::from_parts(vec![1, 2, 2]));
        assert_eq!(rev("1.2.2.1").branch_point(), rev("1.2"));
        assert_eq!(rev("1.2.0.4").branch_point(), rev("1.2"));
    }

    #[test]
    fn test_same_branch() {
        assert!(rev("1.1").same_branch(&rev("1.5")));
        assert!(rev("1.2.2.1").same_branch(&rev("1.2.2.9")));
        assert!(!rev("1.2.2.1").same_branch(&rev("1.2.4.1")));
        assert!(!rev("1.2").same_branch(&rev("1.2.2.1")));
    }
}
