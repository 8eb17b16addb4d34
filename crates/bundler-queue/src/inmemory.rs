//! In-memory `QueueBroker`, used by unit tests and small deployments without a Redis-like
//! backplane.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

use crate::backoff::backoff_for_attempt;
use crate::broker::{Job, Label, QueueBroker, QueueError};

struct Entry {
    job: Job,
    visible_at: Instant,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<Label, VecDeque<Entry>>,
    reserved: HashMap<String, Entry>,
}

/// Delayed visibility is modeled by simply not returning an entry from `reserve` until its
/// `visible_at` has passed; this mirrors the Redis implementation's sorted-set semantics
/// closely enough for pipeline tests that don't exercise Redis directly.
#[derive(Default)]
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_job_id() -> String {
    let mut rng = rand::rng();
    let n: u64 = rng.random();
    format!("job-{n:016x}")
}

#[async_trait]
impl QueueBroker for InMemoryQueue {
    async fn enqueue(&self, label: Label, payload: serde_json::Value, delay: Option<Duration>) -> Result<String, QueueError> {
        let id = new_job_id();
        let visible_at = Instant::now() + delay.unwrap_or_default();
        let job = Job {
            id: id.clone(),
            label,
            payload,
            attempt: 0,
        };
        self.inner.lock().unwrap().queues.entry(label).or_default().push_back(Entry { job, visible_at });
        Ok(id)
    }

    async fn reserve(&self, label: Label, max: usize) -> Result<Vec<Job>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let queue = inner.queues.entry(label).or_default();
        let mut ready_indices = Vec::new();
        for (i, entry) in queue.iter().enumerate() {
            if entry.visible_at <= now {
                ready_indices.push(i);
                if ready_indices.len() == max {
                    break;
                }
            }
        }
        let mut removed = Vec::with_capacity(ready_indices.len());
        for &i in ready_indices.iter().rev() {
            if let Some(entry) = queue.remove(i) {
                removed.push(entry);
            }
        }
        let mut jobs = Vec::with_capacity(removed.len());
        for entry in removed {
            jobs.push(entry.job.clone());
            inner.reserved.insert(entry.job.id.clone(), entry);
        }
        jobs.reverse();
        Ok(jobs)
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reserved.remove(job_id).ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        Ok(())
    }

    async fn nack(&self, job: &Job, max_attempts: u32) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reserved.remove(&job.id).ok_or_else(|| QueueError::NotFound(job.id.clone()))?;
        let next_attempt = job.attempt + 1;
        if next_attempt >= max_attempts {
            tracing::warn!(job_id = %job.id, label = job.label.as_str(), "job exhausted retry budget, dropping to dead letter");
            return Ok(());
        }
        let delay = backoff_for_attempt(next_attempt);
        let retried = Job {
            id: job.id.clone(),
            label: job.label,
            payload: job.payload.clone(),
            attempt: next_attempt,
        };
        inner.queues.entry(job.label).or_default().push_back(Entry {
            job: retried,
            visible_at: Instant::now() + delay,
        });
        Ok(())
    }
}
