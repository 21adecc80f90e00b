use crate::config::Config;
use crate::group_queue::GroupQueue;
use crate::reload::ReloadHelper;
use crate::stats::StatCounter;
use crate::task::{GroupId, Task};
use crate::worker::{Worker, WorkerId, WorkerStatus};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

// Combined dispatcher state. Every public operation locks this once and runs
// to completion before releasing, so each call is atomic with respect to the
// others. Nothing here awaits while the lock is held.
#[derive(Debug)]
struct State {
    busy_workers: HashMap<GroupId, HashSet<WorkerId>>,
    idle_workers: HashMap<GroupId, HashSet<WorkerId>>,
    // Registry of connected workers, keyed by id. The busy/idle/candidate
    // sets hold ids only; this map is the one place a handle lives.
    workers: HashMap<WorkerId, Worker>,
    group_queue: GroupQueue,
    reload_helper: ReloadHelper,
}

/// Routes tasks to a group-partitioned worker pool and coordinates the live
/// replacement of a whole worker generation without dropping in-flight work.
///
/// Workers register through [`TaskDispatcher::add_ready_worker`] while a
/// reload cycle is staging; once every group is at its configured headcount
/// and every old worker has finished its current task, the staged generation
/// is promoted wholesale and the retired one is dropped.
pub struct TaskDispatcher {
    state: Mutex<State>,
    stats: Arc<StatCounter>,
    reload_over_callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskDispatcher {{ state: {:?} }}", self.state)
    }
}

impl TaskDispatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            state: Mutex::new(State {
                busy_workers: HashMap::new(),
                idle_workers: HashMap::new(),
                workers: HashMap::new(),
                group_queue: GroupQueue::new(config.dispatcher.queue_max_size),
                reload_helper: ReloadHelper::new(&config.groups),
            }),
            stats: Arc::new(StatCounter::new()),
            reload_over_callback: None,
        }
    }

    pub fn stats(&self) -> Arc<StatCounter> {
        Arc::clone(&self.stats)
    }

    /// Installs a hook invoked once per completed cutover. Set this before
    /// sharing the dispatcher; the hook runs after the state lock is
    /// released, so it may call back in.
    pub fn set_reload_over_callback(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.reload_over_callback = Some(Arc::new(callback));
    }

    /// Routes an incoming task: straight to an idle worker of the group when
    /// one exists, otherwise into the group's bounded queue. Lossy under
    /// backpressure: a full queue drops the task and bumps the discard
    /// counter. Never blocks the caller.
    pub async fn add_task(&self, group_id: &str, task: Task) {
        let mut state = self.state.lock().await;
        if state.reload_helper.workers_done() {
            // The old generation is being retired; nothing new is assigned
            // to it. Queue the task for the workers about to be promoted.
            if !state.group_queue.put(group_id, task) {
                log::warn!("queue full for group {group_id} during reload, task discarded");
                self.stats.add_discard_task(group_id);
            }
            let swapped = Self::try_replace_workers(&mut state, &self.stats);
            drop(state);
            if swapped {
                self.notify_reload_over();
            }
            return;
        }

        let idle_id = state
            .idle_workers
            .get(group_id)
            .and_then(|set| set.iter().next().copied());
        match idle_id {
            Some(worker_id) => Self::dispatch_to_worker(&mut state, &self.stats, worker_id, task),
            None => {
                if !state.group_queue.put(group_id, task) {
                    log::warn!("queue full for group {group_id}, task discarded");
                    self.stats.add_discard_task(group_id);
                }
            }
        }
    }

    /// Worker-side pull for the next unit of work. Returns None when the
    /// group's queue is empty or when a staged reload is retiring the
    /// calling worker.
    pub async fn alloc_task(&self, worker_id: WorkerId) -> Option<Task> {
        let mut state = self.state.lock().await;
        if state.reload_helper.workers_done() {
            // Old workers get no further work once the replacement
            // generation is fully staged.
            Self::set_worker_status(&mut state, worker_id, WorkerStatus::Idle);
            let swapped = Self::try_replace_workers(&mut state, &self.stats);
            drop(state);
            if swapped {
                self.notify_reload_over();
            }
            return None;
        }

        let (group_id, current) = match state.workers.get(&worker_id) {
            Some(worker) => (worker.group_id.clone(), worker.status),
            None => {
                log::warn!("alloc_task from unknown worker {worker_id}");
                return None;
            }
        };
        let task = state.group_queue.get(&group_id);
        let target = if task.is_some() {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        };
        if target != current {
            Self::set_worker_status(&mut state, worker_id, target);
        }
        if task.is_some() {
            self.stats.add_dispatched_task(&group_id);
        }
        task
    }

    /// Drops a disconnected worker from whichever live set tracks it.
    /// Returns false, with no other state change, when it was tracked in
    /// neither.
    pub async fn remove_worker(&self, worker_id: WorkerId) -> bool {
        let mut state = self.state.lock().await;
        let Some(group_id) = state.workers.get(&worker_id).map(|w| w.group_id.clone()) else {
            return false;
        };
        let in_busy = state
            .busy_workers
            .get_mut(&group_id)
            .map_or(false, |set| set.remove(&worker_id));
        let in_idle = state
            .idle_workers
            .get_mut(&group_id)
            .map_or(false, |set| set.remove(&worker_id));
        if !in_busy && !in_idle {
            return false;
        }
        state.workers.remove(&worker_id);
        log::info!("worker {worker_id} removed from group {group_id}");

        // A dead worker may have been the last thing holding up a staged
        // cutover.
        let swapped = if state.reload_helper.workers_done() {
            Self::try_replace_workers(&mut state, &self.stats)
        } else {
            false
        };
        drop(state);
        if swapped {
            self.notify_reload_over();
        }
        true
    }

    /// Discards every queued task for the group. Worker sets are untouched.
    pub async fn clear_tasks(&self, group_id: &str) {
        self.state.lock().await.group_queue.clear(group_id);
    }

    pub async fn clear_all_tasks(&self) {
        self.state.lock().await.group_queue.clear_all();
    }

    /// Registers a replacement worker for the current reload cycle. The
    /// worker stays staged until the cutover promotes its whole generation.
    pub async fn add_ready_worker(&self, worker: Worker) {
        let mut state = self.state.lock().await;
        let worker_id = worker.id;
        let group_id = worker.group_id.clone();
        state.workers.insert(worker_id, worker);
        state.reload_helper.add_worker(worker_id, &group_id);

        // Every busy worker may already have drained before staging
        // finished, in which case the cutover can run right now.
        let swapped = if state.reload_helper.workers_done() {
            Self::try_replace_workers(&mut state, &self.stats)
        } else {
            false
        };
        drop(state);
        if swapped {
            self.notify_reload_over();
        }
    }

    /// Withdraws a staged candidate that disconnected before promotion.
    pub async fn remove_ready_worker(&self, worker_id: WorkerId) -> bool {
        let mut state = self.state.lock().await;
        let Some(group_id) = state.workers.get(&worker_id).map(|w| w.group_id.clone()) else {
            return false;
        };
        let removed = state.reload_helper.remove_worker(worker_id, &group_id);
        if removed {
            state.workers.remove(&worker_id);
        }
        removed
    }

    /// Begins staging a replacement worker generation. Returns false when a
    /// cycle is already underway.
    pub async fn start_reload(&self) -> bool {
        let started = self.state.lock().await.reload_helper.start();
        if started {
            log::info!("reload started");
        }
        started
    }

    /// Aborts the current reload cycle. Staged candidates are forgotten;
    /// generations promoted by an already-completed cutover are unaffected.
    /// Idempotent.
    pub async fn stop_reload(&self) {
        let mut state = self.state.lock().await;
        // Candidates were never promoted; drop their registration alongside
        // the helper's bookkeeping.
        let staged: Vec<WorkerId> = state
            .reload_helper
            .candidates()
            .values()
            .flatten()
            .copied()
            .collect();
        for worker_id in staged {
            state.workers.remove(&worker_id);
        }
        state.reload_helper.stop();
    }

    pub async fn reloading(&self) -> bool {
        self.state.lock().await.reload_helper.running()
    }

    /// Number of tasks currently queued for the group.
    pub async fn queued_tasks(&self, group_id: &str) -> usize {
        self.state.lock().await.group_queue.qsize(group_id)
    }

    /// Current (idle, busy) worker counts for the group.
    pub async fn worker_counts(&self, group_id: &str) -> (usize, usize) {
        let state = self.state.lock().await;
        (
            state.idle_workers.get(group_id).map_or(0, |set| set.len()),
            state.busy_workers.get(group_id).map_or(0, |set| set.len()),
        )
    }

    // The cutover. Once no old worker is mid-task anywhere, promote the
    // staged generation wholesale and drain queued backlog to it. Callers
    // gate on workers_done; the quiescence check runs here unconditionally,
    // and an unmet precondition leaves all state untouched. Returns whether
    // the swap happened so the caller can fire the completion hook after
    // unlocking.
    fn try_replace_workers(state: &mut State, stats: &StatCounter) -> bool {
        if state.busy_workers.values().any(|set| !set.is_empty()) {
            return false;
        }

        // Retire the old idle generation. Dropping a registry entry closes
        // that worker's outbox, which its loop observes as a disconnect.
        let old_idle: Vec<WorkerId> = state.idle_workers.values().flatten().copied().collect();
        for worker_id in old_idle {
            state.workers.remove(&worker_id);
        }

        let staged = state.reload_helper.candidates().clone();
        state.idle_workers = staged;
        state.reload_helper.stop();
        log::info!("reload cutover complete, new worker generation promoted");

        // Hand queued backlog to the fresh workers. An empty queue result
        // means the group's backlog is drained, so stop walking that group.
        let promoted: Vec<(GroupId, Vec<WorkerId>)> = state
            .idle_workers
            .iter()
            .map(|(group, set)| (group.clone(), set.iter().copied().collect()))
            .collect();
        for (group_id, worker_ids) in promoted {
            for worker_id in worker_ids {
                let Some(task) = state.group_queue.get(&group_id) else {
                    break;
                };
                Self::dispatch_to_worker(state, stats, worker_id, task);
            }
        }
        true
    }

    // Marks the worker busy and pushes the task at it, fire-and-forget.
    fn dispatch_to_worker(state: &mut State, stats: &StatCounter, worker_id: WorkerId, task: Task) {
        Self::set_worker_status(state, worker_id, WorkerStatus::Busy);
        if let Some(worker) = state.workers.get(&worker_id) {
            log::debug!("assigning task to worker {} in group {}", worker_id, worker.group_id);
            stats.add_dispatched_task(&worker.group_id);
            worker.assign(task);
        }
    }

    // Moves the worker between the busy and idle sets to match its status.
    fn set_worker_status(state: &mut State, worker_id: WorkerId, status: WorkerStatus) {
        let group_id = match state.workers.get_mut(&worker_id) {
            Some(worker) => {
                worker.status = status;
                worker.group_id.clone()
            }
            None => {
                log::warn!("status update for unknown worker {worker_id}");
                return;
            }
        };
        let (target, other) = match status {
            WorkerStatus::Busy => (&mut state.busy_workers, &mut state.idle_workers),
            WorkerStatus::Idle => (&mut state.idle_workers, &mut state.busy_workers),
        };
        if let Some(set) = other.get_mut(&group_id) {
            set.remove(&worker_id);
        }
        target.entry(group_id).or_default().insert(worker_id);
    }

    fn notify_reload_over(&self) {
        if let Some(callback) = self.reload_over_callback.clone() {
            callback();
        }
    }
}
