//! Job Queue - priority-ordered pending retraining jobs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{JobPriority, ScheduledJob};

/// Dequeue order: priority, then scheduled time, then insertion sequence.
///
/// Field order matters: the derived `Ord` compares lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct JobOrderKey {
    pub priority: JobPriority,
    pub scheduled_time: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug)]
struct QueuedJob {
    key: JobOrderKey,
    job: ScheduledJob,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Min-heap of queued jobs keyed by [`JobOrderKey`]
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<Reverse<QueuedJob>>,
    sequence_counter: u64,
    enqueued_count: u64,
    dequeued_count: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, assigning the next sequence number
    pub fn push(&mut self, job: ScheduledJob) -> JobOrderKey {
        let key = JobOrderKey {
            priority: job.priority,
            scheduled_time: job.scheduled_time,
            sequence: self.sequence_counter,
        };
        self.sequence_counter += 1;
        self.enqueued_count += 1;

        debug!(
            job_id = %job.id,
            strategy = %job.strategy_name,
            priority = %job.priority,
            "Enqueuing retraining job"
        );

        self.heap.push(Reverse(QueuedJob { key, job }));
        key
    }

    /// Put a job back with the key it was originally given. The earlier `pop`
    /// no longer counts as a dequeue.
    pub fn requeue(&mut self, key: JobOrderKey, job: ScheduledJob) {
        self.dequeued_count = self.dequeued_count.saturating_sub(1);
        self.heap.push(Reverse(QueuedJob { key, job }));
    }

    pub fn pop(&mut self) -> Option<(JobOrderKey, ScheduledJob)> {
        let Reverse(queued) = self.heap.pop()?;
        self.dequeued_count += 1;
        Some((queued.key, queued.job))
    }

    /// Remove a job by id (rebuilds the heap)
    pub fn remove(&mut self, job_id: Uuid) -> Option<ScheduledJob> {
        let mut removed = None;
        let items = std::mem::take(&mut self.heap).into_vec();
        for Reverse(item) in items {
            if removed.is_none() && item.job.id == job_id {
                removed = Some(item.job);
            } else {
                self.heap.push(Reverse(item));
            }
        }
        removed
    }

    pub fn get(&self, job_id: Uuid) -> Option<&ScheduledJob> {
        self.heap
            .iter()
            .map(|Reverse(q)| &q.job)
            .find(|job| job.id == job_id)
    }

    pub fn contains_strategy(&self, strategy_name: &str) -> bool {
        self.heap
            .iter()
            .any(|Reverse(q)| q.job.strategy_name == strategy_name)
    }

    /// Queued jobs in dequeue order
    pub fn snapshot(&self) -> Vec<ScheduledJob> {
        let mut items: Vec<&QueuedJob> = self.heap.iter().map(|Reverse(q)| q).collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        items.into_iter().map(|q| q.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let mut priority_counts = [0usize; 4];
        for Reverse(item) in self.heap.iter() {
            priority_counts[item.job.priority as usize] += 1;
        }

        QueueStats {
            current_size: self.heap.len(),
            enqueued_total: self.enqueued_count,
            dequeued_total: self.dequeued_count,
            critical_count: priority_counts[0],
            high_count: priority_counts[1],
            normal_count: priority_counts[2],
            low_count: priority_counts[3],
        }
    }
}

/// Queue depth by priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub current_size: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub critical_count: usize,
    pub high_count: usize,
    pub normal_count: usize,
    pub low_count: usize,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[{}, enq={}, deq={}, C={}/H={}/N={}/L={}]",
            self.current_size,
            self.enqueued_total,
            self.dequeued_total,
            self.critical_count,
            self.high_count,
            self.normal_count,
            self.low_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobSource, RetrainingConfiguration, RetrainingKind};
    use chrono::Duration;
    use std::sync::Arc;

    fn make_job(strategy: &str, priority: JobPriority) -> ScheduledJob {
        ScheduledJob::new(
            strategy,
            priority,
            RetrainingKind::FullRetrain,
            Arc::new(RetrainingConfiguration::default()),
            Vec::new(),
            JobSource::Manual,
        )
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = JobQueue::new();

        queue.push(make_job("a1", JobPriority::Normal));
        queue.push(make_job("a2", JobPriority::Low));
        queue.push(make_job("a3", JobPriority::Critical));
        queue.push(make_job("a4", JobPriority::High));

        assert_eq!(queue.pop().unwrap().1.strategy_name, "a3");
        assert_eq!(queue.pop().unwrap().1.strategy_name, "a4");
        assert_eq!(queue.pop().unwrap().1.strategy_name, "a1");
        assert_eq!(queue.pop().unwrap().1.strategy_name, "a2");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_earlier_scheduled_time_first() {
        let mut queue = JobQueue::new();
        let now = Utc::now();

        queue.push(make_job("later", JobPriority::Normal).with_scheduled_time(now));
        queue.push(
            make_job("earlier", JobPriority::Normal).with_scheduled_time(now - Duration::hours(1)),
        );

        assert_eq!(queue.pop().unwrap().1.strategy_name, "earlier");
        assert_eq!(queue.pop().unwrap().1.strategy_name, "later");
    }

    #[test]
    fn test_fifo_on_equal_time() {
        let mut queue = JobQueue::new();
        let at = Utc::now();

        for name in ["first", "second", "third"] {
            queue.push(make_job(name, JobPriority::Normal).with_scheduled_time(at));
        }

        assert_eq!(queue.pop().unwrap().1.strategy_name, "first");
        assert_eq!(queue.pop().unwrap().1.strategy_name, "second");
        assert_eq!(queue.pop().unwrap().1.strategy_name, "third");
    }

    #[test]
    fn test_requeue_keeps_position() {
        let mut queue = JobQueue::new();
        let at = Utc::now();

        queue.push(make_job("first", JobPriority::Normal).with_scheduled_time(at));
        queue.push(make_job("second", JobPriority::Normal).with_scheduled_time(at));

        let (key, job) = queue.pop().unwrap();
        queue.requeue(key, job);
        assert_eq!(queue.stats().dequeued_total, 0);

        assert_eq!(queue.pop().unwrap().1.strategy_name, "first");
        let stats = queue.stats();
        assert_eq!(stats.enqueued_total, 2);
        assert_eq!(stats.dequeued_total, 1);
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut queue = JobQueue::new();
        let job = make_job("line_movement", JobPriority::High);
        let id = job.id;
        queue.push(job);
        queue.push(make_job("sharp_action", JobPriority::Normal));

        assert!(queue.get(id).is_some());
        assert!(queue.contains_strategy("line_movement"));
        assert_eq!(queue.remove(id).unwrap().id, id);
        assert!(queue.remove(id).is_none());
        assert!(!queue.contains_strategy("line_movement"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_stats_and_snapshot() {
        let mut queue = JobQueue::new();
        queue.push(make_job("a1", JobPriority::Low));
        queue.push(make_job("a2", JobPriority::Critical));
        queue.push(make_job("a3", JobPriority::Normal));

        let stats = queue.stats();
        assert_eq!(stats.current_size, 3);
        assert_eq!(stats.critical_count, 1);
        assert_eq!(stats.normal_count, 1);
        assert_eq!(stats.low_count, 1);
        assert_eq!(stats.high_count, 0);

        let order: Vec<_> = queue
            .snapshot()
            .into_iter()
            .map(|j| j.strategy_name)
            .collect();
        assert_eq!(order, vec!["a2", "a3", "a1"]);
    }
}
