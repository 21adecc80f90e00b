use crate::task::GroupId;
use dashmap::DashMap;

/// Operational counters for the dispatcher, kept outside its lock so the
/// surrounding application can read them at any time.
#[derive(Debug, Default)]
pub struct StatCounter {
    discarded: DashMap<GroupId, u64>,
    dispatched: DashMap<GroupId, u64>,
}

impl StatCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task dropped because the group's queue was full.
    pub fn add_discard_task(&self, group_id: &str) {
        *self.discarded.entry(group_id.to_string()).or_insert(0) += 1;
    }

    /// Records a task handed to a worker.
    pub fn add_dispatched_task(&self, group_id: &str) {
        *self.dispatched.entry(group_id.to_string()).or_insert(0) += 1;
    }

    pub fn discarded(&self, group_id: &str) -> u64 {
        self.discarded.get(group_id).map_or(0, |v| *v)
    }

    pub fn dispatched(&self, group_id: &str) -> u64 {
        self.dispatched.get(group_id).map_or(0, |v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = StatCounter::new();
        assert_eq!(stats.discarded("g1"), 0);
        assert_eq!(stats.dispatched("g1"), 0);
    }

    #[test]
    fn test_counters_are_per_group() {
        let stats = StatCounter::new();
        stats.add_discard_task("g1");
        stats.add_discard_task("g1");
        stats.add_dispatched_task("g2");

        assert_eq!(stats.discarded("g1"), 2);
        assert_eq!(stats.discarded("g2"), 0);
        assert_eq!(stats.dispatched("g2"), 1);
    }
}
