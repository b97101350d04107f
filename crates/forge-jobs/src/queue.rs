//! The bounded job queue and dead-letter collection (`spec.md` §4.12,
//! §3 "Job queue" / "Job record").

use serde_json::Value as Json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Dead,
}

/// One deferred effect, created by a hook match (`spec.md` §3 "Job record").
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub name: String,
    pub input_data: Json,
    pub attempt: u32,
    pub max_attempts: u32,
    pub allowed_capabilities: Vec<String>,
    #[serde(skip, default = "SystemTime::now")]
    pub scheduled_at: SystemTime,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(name: impl Into<String>, input_data: Json, max_attempts: u32, allowed_capabilities: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            input_data,
            attempt: 0,
            max_attempts,
            allowed_capabilities,
            scheduled_at: SystemTime::now(),
            status: JobStatus::Pending,
            last_error: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("job queue at capacity ({0} pending)")]
    AtCapacity(usize),
}

/// A bounded FIFO of pending jobs, plus the dead-letter collection jobs move
/// to once they exhaust `max_attempts` (`spec.md` §4.12). Overflow on
/// enqueue is logged by the caller, never propagated to the HTTP response —
/// hook dispatch is fire-and-forget (`spec.md` §4.11 step 10).
pub struct JobQueue {
    capacity: usize,
    pending: Mutex<VecDeque<JobRecord>>,
    dead_letter: Mutex<Vec<JobRecord>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, pending: Mutex::new(VecDeque::new()), dead_letter: Mutex::new(Vec::new()) }
    }

    pub fn enqueue(&self, job: JobRecord) -> Result<(), EnqueueError> {
        let mut pending = self.pending.lock().expect("job queue poisoned");
        if pending.len() >= self.capacity {
            return Err(EnqueueError::AtCapacity(pending.len()));
        }
        tracing::info!(job_id = %job.id, job_name = %job.name, "job.enqueued");
        pending.push_back(job);
        Ok(())
    }

    /// Re-enqueue a job that failed transiently, for the worker's retry path.
    /// Goes to the back of the queue so one slow job can't starve the rest.
    pub fn requeue(&self, job: JobRecord) {
        self.pending.lock().expect("job queue poisoned").push_back(job);
    }

    pub fn dequeue(&self) -> Option<JobRecord> {
        self.pending.lock().expect("job queue poisoned").pop_front()
    }

    pub fn dead_letter(&self, job: JobRecord) {
        tracing::error!(job_id = %job.id, job_name = %job.name, attempts = job.attempt, "job.dead");
        self.dead_letter.lock().expect("dead letter queue poisoned").push(job);
    }

    pub fn dead_letters(&self) -> Vec<JobRecord> {
        self.dead_letter.lock().expect("dead letter queue poisoned").clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("job queue poisoned").len()
    }
}

/// Quadratic backoff with jitter, capped at five minutes (`spec.md` §4.12).
/// `attempt` is 1-based (the attempt that just failed).
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let base = Duration::from_secs((attempt as u64).saturating_mul(attempt as u64));
    let capped = base.min(Duration::from_secs(300));
    let jitter_ms = rand::random::<u64>() % 1000;
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_rejects_past_capacity() {
        let queue = JobQueue::new(1);
        queue.enqueue(JobRecord::new("notify", Json::Null, 3, vec!["email.send".to_string()])).unwrap();
        let err = queue.enqueue(JobRecord::new("notify", Json::Null, 3, vec![])).unwrap_err();
        assert!(matches!(err, EnqueueError::AtCapacity(1)));
    }

    #[test]
    fn dequeue_is_fifo() {
        let queue = JobQueue::new(10);
        queue.enqueue(JobRecord::new("first", Json::Null, 3, vec![])).unwrap();
        queue.enqueue(JobRecord::new("second", Json::Null, 3, vec![])).unwrap();
        assert_eq!(queue.dequeue().unwrap().name, "first");
        assert_eq!(queue.dequeue().unwrap().name, "second");
    }

    #[test]
    fn backoff_grows_quadratically_and_caps_at_five_minutes() {
        assert!(backoff_for_attempt(1) < Duration::from_secs(2));
        assert!(backoff_for_attempt(2) >= Duration::from_secs(4));
        assert!(backoff_for_attempt(100) <= Duration::from_secs(301));
    }

    #[test]
    fn dead_lettered_jobs_are_inspectable() {
        let queue = JobQueue::new(10);
        let job = JobRecord::new("notify", Json::Null, 1, vec![]);
        queue.dead_letter(job.clone());
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.dead_letters()[0].id, job.id);
    }
}
