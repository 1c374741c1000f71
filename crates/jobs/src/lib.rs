//! `surgecart-jobs`: the delayed-task collaborator interface.
//!
//! The checkout core only needs two guarantees from its task transport:
//! a scheduled task is *eventually invoked at or after* its due time, and
//! periodic claims come in *bounded batches*. Duplicate delivery is
//! explicitly allowed: every entry point a task can reach (`expire_hold`,
//! webhook `process`) is idempotent, so a lost-and-redelivered or
//! doubly-enqueued task is harmless.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surgecart_core::{HoldId, TaskId, WebhookEventId};

/// What a task invokes when claimed. Each variant names an idempotent
/// entry point plus the row it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Invoke `HoldManager::expire_hold` (one-shot, scheduled at TTL + grace).
    ExpireHold(HoldId),
    /// Invoke `WebhookReconciler::process` for a newly ingested event.
    ProcessWebhook(WebhookEventId),
}

/// A scheduled invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Earliest time the task may run.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Durable-enough work queue abstraction.
///
/// Implementations may lose a one-shot task (the periodic sweeps cover for
/// that) and may deliver a task more than once; they must never deliver
/// before `run_at`.
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task to run at or after `run_at`.
    fn schedule(&self, run_at: DateTime<Utc>, kind: TaskKind) -> TaskId;

    /// Claim up to `limit` tasks due at `now`, soonest first. Claimed tasks
    /// leave the queue; redelivery is the caller's concern.
    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<Task>;

    /// Number of tasks currently queued (due or not).
    fn pending(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedTask {
    run_at: DateTime<Utc>,
    seq: u64,
    task: Task,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.run_at, self.seq).cmp(&(other.run_at, other.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory task queue for tests/dev.
///
/// Single-process and non-durable; ordering is by due time, then FIFO.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    inner: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<QueuedTask>>,
    next_seq: u64,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn schedule(&self, run_at: DateTime<Utc>, kind: TaskKind) -> TaskId {
        let id = TaskId::new();
        let mut state = self.inner.lock().expect("queue lock poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse(QueuedTask {
            run_at,
            seq,
            task: Task {
                id,
                kind,
                run_at,
                created_at: Utc::now(),
            },
        }));
        id
    }

    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<Task> {
        let mut state = self.inner.lock().expect("queue lock poisoned");
        let mut claimed = Vec::new();
        while claimed.len() < limit {
            match state.heap.peek() {
                Some(Reverse(queued)) if queued.run_at <= now => {
                    let Reverse(queued) = state.heap.pop().expect("peeked entry vanished");
                    claimed.push(queued.task);
                }
                _ => break,
            }
        }
        claimed
    }

    fn pending(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn claims_only_due_tasks_soonest_first() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        let late = HoldId::new();
        let early = HoldId::new();
        let future = HoldId::new();
        queue.schedule(now + Duration::seconds(30), TaskKind::ExpireHold(late));
        queue.schedule(now - Duration::seconds(10), TaskKind::ExpireHold(early));
        queue.schedule(now + Duration::minutes(5), TaskKind::ExpireHold(future));

        let claimed = queue.claim_due(now + Duration::seconds(60), 10);
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].kind, TaskKind::ExpireHold(early));
        assert_eq!(claimed[1].kind, TaskKind::ExpireHold(late));
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn claim_is_bounded() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        for _ in 0..5 {
            queue.schedule(now, TaskKind::ExpireHold(HoldId::new()));
        }
        assert_eq!(queue.claim_due(now, 2).len(), 2);
        assert_eq!(queue.pending(), 3);
    }

    #[test]
    fn nothing_is_delivered_early() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        queue.schedule(now + Duration::seconds(1), TaskKind::ExpireHold(HoldId::new()));
        assert!(queue.claim_due(now, 10).is_empty());
    }
}
