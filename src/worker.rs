use crate::task::{GroupId, Task};
use tokio::sync::mpsc;

pub type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// A connected worker as seen by the dispatcher. The worker's network and
/// process lifecycle live outside this crate; the dispatcher only tracks its
/// group, its status and a send handle for pushed assignments. The worker's
/// own loop holds the receiving half and calls back into the dispatcher when
/// it wants more work.
#[derive(Debug)]
pub struct Worker {
    pub id: WorkerId,
    pub group_id: GroupId,
    pub(crate) status: WorkerStatus,
    outbox: mpsc::UnboundedSender<Task>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        group_id: impl Into<GroupId>,
        outbox: mpsc::UnboundedSender<Task>,
    ) -> Self {
        Self {
            id,
            group_id: group_id.into(),
            status: WorkerStatus::Idle,
            outbox,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    // Fire-and-forget push. A closed channel means the worker is already
    // gone; the disconnect path removes it eventually, so the failed send is
    // only logged.
    pub(crate) fn assign(&self, task: Task) {
        if self.outbox.send(task).is_err() {
            log::warn!(
                "worker {} in group {} dropped its outbox, task lost in flight",
                self.id,
                self.group_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assign_delivers_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = Worker::new(1, "g1", tx);
        assert_eq!(worker.status(), WorkerStatus::Idle);

        worker.assign(Task::new("payload"));
        assert_eq!(rx.recv().await, Some(Task::new("payload")));
    }

    #[tokio::test]
    async fn test_assign_to_closed_outbox_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(2, "g1", tx);
        drop(rx);
        worker.assign(Task::new("payload"));
    }
}
