// src/planner.rs

//! Planners turn a remote file's log into the ordered list of check-ins to
//! perform locally.
//!
//! The exact planner replays every delta. The skeleton planner wraps
//! another planner and keeps only the topologically significant revisions:
//! extremes, branch transitions and their branch-points, the vendor-branch
//! point 1.1, and tagged revisions.

use crate::logparse::{DeltaInfo, RcsInfo};
use crate::revision::Revision;
use std::collections::{BTreeSet, HashMap};

/// Epoch date handed to `ci -d` for the synthetic 1.1.
const SYNTHETIC_1_1_DATE: &str = "1970/01/01 00:00:00";

/// One planned check-in.
///
/// `remote` names the revision to fetch from the server; `local` is the
/// delta to record in the local RCS file. They are currently always equal
/// and kept separate as an extension point for re-attributed skeletons.
/// `attic` is set for trunk entries only: whether the file belongs in the
/// Attic once this revision is its head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub remote: DeltaInfo,
    pub local: DeltaInfo,
    pub attic: Option<bool>,
}

/// Strategy for choosing which revisions to materialise.
pub trait Planner {
    fn plan(&self, info: &RcsInfo, deltas: &[DeltaInfo]) -> Vec<PlanEntry>;
}

/// A file is in the Attic iff its head revision is dead; only the entry
/// that establishes the head can say so.
fn attic_flag(info: &RcsInfo, delta: &DeltaInfo) -> Option<bool> {
    if !delta.revision.is_trunk() {
        return None;
    }
    Some(delta.is_dead() && delta.revision == info.head && info.in_attic())
}

fn synthetic_1_1() -> DeltaInfo {
    DeltaInfo {
        revision: Revision::from_parts(vec![1, 1]),
        date: SYNTHETIC_1_1_DATE.to_string(),
        author: "cvssuck".to_string(),
        state: "dead".to_string(),
        branches: Vec::new(),
        log: String::new(),
    }
}

/// Replays every delta in revision order.
#[derive(Debug, Clone, Default)]
pub struct ExactPlanner {
    /// Insert a synthetic dead 1.1 when the remote history lacks one. Some
    /// vendor-branch layouts treat 1.1 as the conceptual branch-point of
    /// the vendor branch even when it never existed as a real revision.
    pub introduce_1_1: bool,
}

impl Planner for ExactPlanner {
    fn plan(&self, info: &RcsInfo, deltas: &[DeltaInfo]) -> Vec<PlanEntry> {
        let one_one = Revision::from_parts(vec![1, 1]);
        let mut deltas: Vec<DeltaInfo> = deltas.to_vec();
        if self.introduce_1_1 && !deltas.iter().any(|d| d.revision == one_one) {
            deltas.push(synthetic_1_1());
        }
        deltas.sort_by(|a, b| a.revision.cmp(&b.revision));
        deltas
            .into_iter()
            .map(|delta| PlanEntry {
                attic: attic_flag(info, &delta),
                local: delta.clone(),
                remote: delta,
            })
            .collect()
    }
}

/// Filters the delta list down to the interesting revisions, then hands it
/// to the wrapped planner.
pub struct SkeletonPlanner {
    inner: Box<dyn Planner>,
}

impl SkeletonPlanner {
    pub fn new(inner: Box<dyn Planner>) -> Self {
        Self { inner }
    }

    /// The set of revisions a skeleton preserves:
    /// the overall minimum and maximum; for every adjacent sorted pair that
    /// changes branch, the earlier revision and the later one's
    /// branch-point; 1.1 when present; branch-points of magic-branch tags;
    /// revisions of non-branch tags.
    fn interesting(info: &RcsInfo, sorted: &[&DeltaInfo]) -> BTreeSet<Revision> {
        let mut keep = BTreeSet::new();
        if let Some(first) = sorted.first() {
            keep.insert(first.revision.clone());
        }
        if let Some(last) = sorted.last() {
            keep.insert(last.revision.clone());
        }
        for pair in sorted.windows(2) {
            let (r1, r2) = (&pair[0].revision, &pair[1].revision);
            if !r1.same_branch(r2) {
                keep.insert(r1.clone());
                if !r2.is_trunk() {
                    keep.insert(r2.branch_point());
                }
            }
        }
        let one_one = Revision::from_parts(vec![1, 1]);
        if sorted.iter().any(|d| d.revision == one_one) {
            keep.insert(one_one);
        }
        for (_, rev) in &info.tags {
            if rev.is_magic_branch() {
                keep.insert(rev.branch_point());
            } else if !rev.is_branch() {
                keep.insert(rev.clone());
            }
        }
        keep
    }
}

impl Planner for SkeletonPlanner {
    fn plan(&self, info: &RcsInfo, deltas: &[DeltaInfo]) -> Vec<PlanEntry> {
        let mut sorted: Vec<&DeltaInfo> = deltas.iter().collect();
        sorted.sort_by(|a, b| a.revision.cmp(&b.revision));

        let by_rev: HashMap<&Revision, &DeltaInfo> =
            sorted.iter().map(|d| (&d.revision, *d)).collect();

        // Revisions without a matching delta (tag targets that were never
        // fetched, pruned branch-points) are dropped silently.
        let filtered: Vec<DeltaInfo> = Self::interesting(info, &sorted)
            .into_iter()
            .filter_map(|rev| by_rev.get(&rev).map(|d| (*d).clone()))
            .collect();

        self.inner.plan(info, &filtered)
    }
}

/// Stack `skeleton` wrappers on top of the exact planner.
pub fn build_planner(skeleton: u32, introduce_1_1: bool) -> Box<dyn Planner> {
    let mut planner: Box<dyn Planner> = Box::new(ExactPlanner { introduce_1_1 });
    for _ in 0..skeleton {
        planner = Box::new(SkeletonPlanner::new(planner));
    }
    planner
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> Revision {
        s.parse().unwrap()
    }

    fn delta(r: &str, state: &str) -> DeltaInfo {
        DeltaInfo {
            revision: rev(r),
            date: format!("2004/01/0{} 12:00:00", r.len() % 9 + 1),
            author: "alice".to_string(),
            state: state.to_string(),
            branches: Vec::new(),
            log: format!("change {r}"),
        }
    }

    fn info(head: &str, attic: bool, tags: &[(&str, &str)]) -> RcsInfo {
        let path = if attic {
            "/cvsroot/proj/Attic/file.c,v"
        } else {
            "/cvsroot/proj/file.c,v"
        };
        RcsInfo {
            rcs_path: path.to_string(),
            working_file: "file.c".to_string(),
            head: rev(head),
            default_branch: None,
            tags: tags
                .iter()
                .map(|(n, r)| (n.to_string(), rev(r)))
                .collect(),
            keyword_mode: "kv".to_string(),
            description: String::new(),
        }
    }

    fn planned_revisions(plan: &[PlanEntry]) -> Vec<String> {
        plan.iter().map(|e| e.local.revision.to_string()).collect()
    }

    #[test]
    fn test_exact_orders_trunk_history() {
        // S1: three live trunk revisions.
        let deltas = vec![delta("1.3", "Exp"), delta("1.1", "Exp"), delta("1.2", "Exp")];
        let plan = ExactPlanner::default().plan(&info("1.3", false, &[]), &deltas);
        assert_eq!(planned_revisions(&plan), ["1.1", "1.2", "1.3"]);
        assert!(plan.iter().all(|e| e.attic == Some(false)));
        assert!(plan.iter().all(|e| e.remote == e.local));
    }

    #[test]
    fn test_dead_head_goes_to_attic() {
        // S2: head 1.3 is dead and the server keeps the file in the Attic.
        let deltas = vec![delta("1.1", "Exp"), delta("1.2", "Exp"), delta("1.3", "dead")];
        let plan = ExactPlanner::default().plan(&info("1.3", true, &[]), &deltas);
        assert_eq!(plan[0].attic, Some(false));
        assert_eq!(plan[1].attic, Some(false));
        assert_eq!(plan[2].attic, Some(true));
    }

    #[test]
    fn test_dead_non_head_stays_out_of_attic() {
        let deltas = vec![delta("1.1", "dead"), delta("1.2", "Exp")];
        let plan = ExactPlanner::default().plan(&info("1.2", false, &[]), &deltas);
        assert_eq!(plan[0].attic, Some(false));
        assert_eq!(plan[1].attic, Some(false));
    }

    #[test]
    fn test_branch_revisions_leave_attic_alone() {
        // S3: branch revisions never carry an attic decision.
        let deltas = vec![
            delta("1.1", "Exp"),
            delta("1.2", "Exp"),
            delta("1.2.2.1", "Exp"),
            delta("1.2.2.2", "Exp"),
        ];
        let plan = ExactPlanner::default().plan(&info("1.2", false, &[]), &deltas);
        assert_eq!(
            planned_revisions(&plan),
            ["1.1", "1.2", "1.2.2.1", "1.2.2.2"]
        );
        assert_eq!(plan[2].attic, None);
        assert_eq!(plan[3].attic, None);
    }

    #[test]
    fn test_skeleton_keeps_extremes_and_tags() {
        // S4: skeleton keeps {1.1, 1.3 (tagged), 1.5}.
        let deltas = vec![
            delta("1.1", "Exp"),
            delta("1.2", "Exp"),
            delta("1.3", "Exp"),
            delta("1.4", "Exp"),
            delta("1.5", "Exp"),
        ];
        let planner = SkeletonPlanner::new(Box::new(ExactPlanner::default()));
        let plan = planner.plan(&info("1.5", false, &[("REL", "1.3")]), &deltas);
        assert_eq!(planned_revisions(&plan), ["1.1", "1.3", "1.5"]);
    }

    #[test]
    fn test_skeleton_keeps_branch_transitions() {
        let deltas = vec![
            delta("1.1", "Exp"),
            delta("1.2", "Exp"),
            delta("1.2.2.1", "Exp"),
            delta("1.2.2.2", "Exp"),
            delta("1.3", "Exp"),
        ];
        let planner = SkeletonPlanner::new(Box::new(ExactPlanner::default()));
        let plan = planner.plan(&info("1.3", false, &[]), &deltas);
        // 1.2 enters as the branch-point of 1.2.2.1; 1.2.2.2 as the last
        // revision before the branch switch back to trunk.
        assert_eq!(
            planned_revisions(&plan),
            ["1.1", "1.2", "1.2.2.2", "1.3"]
        );
    }

    #[test]
    fn test_skeleton_magic_branch_tag_keeps_branch_point() {
        let deltas = vec![delta("1.1", "Exp"), delta("1.2", "Exp"), delta("1.3", "Exp")];
        let planner = SkeletonPlanner::new(Box::new(ExactPlanner::default()));
        let plan = planner.plan(&info("1.3", false, &[("stable", "1.2.0.2")]), &deltas);
        assert_eq!(planned_revisions(&plan), ["1.1", "1.2", "1.3"]);
    }

    #[test]
    fn test_skeleton_drops_unmatched_tag_revisions() {
        let deltas = vec![delta("1.1", "Exp"), delta("1.3", "Exp")];
        let planner = SkeletonPlanner::new(Box::new(ExactPlanner::default()));
        // REL points at a revision the server no longer reports.
        let plan = planner.plan(&info("1.3", false, &[("REL", "1.2")]), &deltas);
        assert_eq!(planned_revisions(&plan), ["1.1", "1.3"]);
    }

    #[test]
    fn test_skeleton_idempotent() {
        let deltas = vec![
            delta("1.1", "Exp"),
            delta("1.2", "Exp"),
            delta("1.3", "Exp"),
            delta("1.4", "Exp"),
            delta("1.5", "Exp"),
        ];
        let the_info = info("1.5", false, &[("REL", "1.3")]);
        let once = SkeletonPlanner::new(Box::new(ExactPlanner::default()));
        let twice = SkeletonPlanner::new(Box::new(SkeletonPlanner::new(Box::new(
            ExactPlanner::default(),
        ))));
        assert_eq!(
            planned_revisions(&once.plan(&the_info, &deltas)),
            planned_revisions(&twice.plan(&the_info, &deltas))
        );
    }

    #[test]
    fn test_introduce_1_1() {
        // S5: remote history starts at 1.2; -1 inserts a dead 1.1 first.
        let deltas = vec![delta("1.2", "Exp")];
        let planner = ExactPlanner { introduce_1_1: true };
        let plan = planner.plan(&info("1.2", false, &[]), &deltas);
        assert_eq!(planned_revisions(&plan), ["1.1", "1.2"]);
        let first = &plan[0].local;
        assert!(first.is_dead());
        assert_eq!(first.author, "cvssuck");
        assert_eq!(first.date, "1970/01/01 00:00:00");
        assert_eq!(plan[0].attic, Some(false));
    }

    #[test]
    fn test_introduce_1_1_noop_when_present() {
        let deltas = vec![delta("1.1", "Exp"), delta("1.2", "Exp")];
        let planner = ExactPlanner { introduce_1_1: true };
        let plan = planner.plan(&info("1.2", false, &[]), &deltas);
        assert_eq!(planned_revisions(&plan), ["1.1", "1.2"]);
        assert!(!plan[0].local.is_dead());
    }

    #[test]
    fn test_build_planner_stacks_skeletons() {
        let deltas = vec![
            delta("1.1", "Exp"),
            delta("1.2", "Exp"),
            delta("1.3", "Exp"),
        ];
        let the_info = info("1.3", false, &[]);
        let exact = build_planner(0, false);
        assert_eq!(
            planned_revisions(&exact.plan(&the_info, &deltas)),
            ["1.1", "1.2", "1.3"]
        );
        let skeleton = build_planner(2, false);
        assert_eq!(
            planned_revisions(&skeleton.plan(&the_info, &deltas)),
            ["1.1", "1.3"]
        );
    }
}
