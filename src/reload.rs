use crate::config::GroupConfig;
use crate::task::GroupId;
use crate::worker::WorkerId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    Stopped,
    Preparing,
    WorkersDone,
}

/// Tracks a pending worker-generation swap: which replacement workers have
/// registered per group, and whether every group has reached its configured
/// headcount. The dispatcher consults this to decide when the cutover may
/// run; this type itself never touches the live worker sets.
#[derive(Debug)]
pub struct ReloadHelper {
    status: ReloadStatus,
    // Expected replacement headcount per group, fixed at construction.
    expected: HashMap<GroupId, usize>,
    candidates: HashMap<GroupId, HashSet<WorkerId>>,
}

impl ReloadHelper {
    pub fn new(groups: &[GroupConfig]) -> Self {
        let expected = groups.iter().map(|g| (g.id.clone(), g.count)).collect();
        Self {
            status: ReloadStatus::Stopped,
            expected,
            candidates: HashMap::new(),
        }
    }

    pub fn status(&self) -> ReloadStatus {
        self.status
    }

    /// True while a reload cycle is underway, staged or not.
    pub fn running(&self) -> bool {
        matches!(
            self.status,
            ReloadStatus::Preparing | ReloadStatus::WorkersDone
        )
    }

    /// True once every group has its full replacement generation registered.
    pub fn workers_done(&self) -> bool {
        self.status == ReloadStatus::WorkersDone
    }

    /// Begins a reload cycle. Returns false when one is already underway;
    /// the caller is expected to check.
    pub fn start(&mut self) -> bool {
        if self.status != ReloadStatus::Stopped {
            return false;
        }
        self.status = ReloadStatus::Preparing;
        true
    }

    /// Ends the cycle from any state and forgets all staged candidates.
    /// Idempotent.
    pub fn stop(&mut self) {
        self.status = ReloadStatus::Stopped;
        self.candidates.clear();
    }

    /// Stages a candidate worker for its group and advances to WorkersDone
    /// once every configured group is at its expected headcount.
    pub fn add_worker(&mut self, id: WorkerId, group_id: &str) {
        self.candidates
            .entry(group_id.to_string())
            .or_default()
            .insert(id);
        if self.status == ReloadStatus::Preparing && self.all_groups_staffed() {
            log::info!("reload staging complete, all groups at expected headcount");
            self.status = ReloadStatus::WorkersDone;
        }
    }

    /// Withdraws a staged candidate, returning whether it was present. A
    /// withdrawal that breaks the headcount match reverts to Preparing.
    pub fn remove_worker(&mut self, id: WorkerId, group_id: &str) -> bool {
        let removed = self
            .candidates
            .get_mut(group_id)
            .map_or(false, |set| set.remove(&id));
        if removed && self.status == ReloadStatus::WorkersDone && !self.all_groups_staffed() {
            self.status = ReloadStatus::Preparing;
        }
        removed
    }

    pub(crate) fn candidates(&self) -> &HashMap<GroupId, HashSet<WorkerId>> {
        &self.candidates
    }

    // A group with an expected count of zero is staffed by definition.
    fn all_groups_staffed(&self) -> bool {
        self.expected.iter().all(|(group, count)| {
            self.candidates.get(group).map_or(0, |set| set.len()) == *count
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, count: usize) -> GroupConfig {
        GroupConfig {
            id: id.to_string(),
            count,
        }
    }

    #[test]
    fn test_start_only_from_stopped() {
        let mut helper = ReloadHelper::new(&[group("g1", 1)]);
        assert_eq!(helper.status(), ReloadStatus::Stopped);
        assert!(!helper.running());

        assert!(helper.start());
        assert_eq!(helper.status(), ReloadStatus::Preparing);
        assert!(helper.running());

        // A second start while preparing is a no-op.
        assert!(!helper.start());
        assert_eq!(helper.status(), ReloadStatus::Preparing);
    }

    #[test]
    fn test_staging_completes_when_all_groups_staffed() {
        let mut helper = ReloadHelper::new(&[group("g1", 2), group("g2", 1)]);
        assert!(helper.start());

        helper.add_worker(1, "g1");
        assert!(!helper.workers_done());
        helper.add_worker(2, "g2");
        assert!(!helper.workers_done());
        helper.add_worker(3, "g1");
        assert!(helper.workers_done());
        assert!(helper.running());
    }

    #[test]
    fn test_zero_count_group_is_trivially_staffed() {
        let mut helper = ReloadHelper::new(&[group("g1", 1), group("empty", 0)]);
        assert!(helper.start());
        helper.add_worker(1, "g1");
        assert!(helper.workers_done());
    }

    #[test]
    fn test_removal_reverts_workers_done() {
        let mut helper = ReloadHelper::new(&[group("g1", 2)]);
        assert!(helper.start());
        helper.add_worker(1, "g1");
        helper.add_worker(2, "g1");
        assert!(helper.workers_done());

        assert!(helper.remove_worker(2, "g1"));
        assert_eq!(helper.status(), ReloadStatus::Preparing);

        // Removing a worker that was never staged reports not found.
        assert!(!helper.remove_worker(99, "g1"));
        assert!(!helper.remove_worker(1, "unknown"));
    }

    #[test]
    fn test_stop_clears_candidates_and_is_idempotent() {
        let mut helper = ReloadHelper::new(&[group("g1", 1)]);
        assert!(helper.start());
        helper.add_worker(1, "g1");
        assert!(helper.workers_done());

        helper.stop();
        assert_eq!(helper.status(), ReloadStatus::Stopped);
        assert!(helper.candidates().is_empty());

        helper.stop();
        assert_eq!(helper.status(), ReloadStatus::Stopped);

        // A fresh cycle starts with an empty slate.
        assert!(helper.start());
        assert!(!helper.workers_done());
    }

    #[test]
    fn test_add_worker_while_stopped_counts_toward_next_cycle() {
        let mut helper = ReloadHelper::new(&[group("g1", 1)]);
        // An early-arriving replacement registers before the operator
        // triggers the reload.
        helper.add_worker(7, "g1");
        assert_eq!(helper.status(), ReloadStatus::Stopped);

        assert!(helper.start());
        assert!(!helper.workers_done());
        helper.remove_worker(7, "g1");
        helper.add_worker(8, "g1");
        assert!(helper.workers_done());
    }
}
