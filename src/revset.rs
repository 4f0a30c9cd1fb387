// src/revset.rs

//! The set of revisions already present in a local RCS file, with the
//! current head of every branch that has members.
//!
//! `ci` only accepts a new revision when it extends the current head of its
//! branch (or starts a branch whose branch-point exists), so the central
//! question this type answers is: can this revision be checked in right
//! now, and which existing revision must be RCS-locked first?

use crate::revision::Revision;
use std::collections::{HashMap, HashSet};

/// Outcome of a positive [`RevisionSet::checkinable`] query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkinable {
    /// First revision in the file; nothing exists to lock.
    First,
    /// Inserts after this revision, which must be RCS-locked before `ci`:
    /// the current head when extending a branch, the branch-point when
    /// starting one.
    After(Revision),
}

/// Revisions known to exist locally, indexed by branch.
///
/// The trunk is keyed by `None`; every other branch by its branch prefix.
/// Invariant: `heads[branch(r)] >= r` for every member `r`.
#[derive(Debug, Clone, Default)]
pub struct RevisionSet {
    members: HashSet<Revision>,
    heads: HashMap<Option<Revision>, Revision>,
}

impl RevisionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_revisions<I: IntoIterator<Item = Revision>>(revs: I) -> Self {
        let mut set = Self::new();
        for rev in revs {
            set.insert(rev);
        }
        set
    }

    fn branch_key(rev: &Revision) -> Option<Revision> {
        if rev.is_trunk() {
            None
        } else {
            Some(rev.branch())
        }
    }

    pub fn insert(&mut self, rev: Revision) {
        let key = Self::branch_key(&rev);
        match self.heads.get(&key) {
            Some(head) if *head >= rev => {}
            _ => {
                self.heads.insert(key, rev.clone());
            }
        }
        self.members.insert(rev);
    }

    pub fn contains(&self, rev: &Revision) -> bool {
        self.members.contains(rev)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.members.iter()
    }

    /// Current head of the given branch (`None` = trunk).
    pub fn head(&self, branch: Option<&Revision>) -> Option<&Revision> {
        self.heads.get(&branch.cloned())
    }

    /// Whether `rev` can be inserted into the RCS file in its current
    /// state, and against which predecessor.
    ///
    /// Branch numbers themselves are never check-in-able. A revision
    /// extending an existing head is check-in-able iff it orders after that
    /// head. The first revision on a non-trunk branch requires its
    /// branch-point to be present, and forks from it.
    pub fn checkinable(&self, rev: &Revision) -> Option<Checkinable> {
        if rev.is_branch() {
            return None;
        }
        let key = Self::branch_key(rev);
        if let Some(head) = self.heads.get(&key) {
            if head < rev {
                Some(Checkinable::After(head.clone()))
            } else {
                None
            }
        } else if rev.is_trunk() {
            Some(Checkinable::First)
        } else {
            let point = rev.branch_point();
            if self.members.contains(&point) {
                Some(Checkinable::After(point))
            } else {
                None
            }
        }
    }
}
