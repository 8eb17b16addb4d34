//! The `QueueBroker` trait and the job labels routed through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A job label names exactly one durable queue; concurrency limits and retry budgets are
/// configured per label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    NewItem,
    PlanBundle,
    PrepareBundle,
    PostBundle,
    VerifyBundle,
    SeedBundle,
    PutOffsets,
    OpticalPost,
    UnbundleNested,
    FinalizeUpload,
    CleanupFs,
}

impl Label {
    /// Default maximum retry attempts before a job is abandoned, per the per-label defaults
    /// of 5-10 named for this queue.
    pub fn default_max_attempts(self) -> u32 {
        match self {
            Label::NewItem => 5,
            Label::PlanBundle => 5,
            Label::PrepareBundle => 8,
            Label::PostBundle => 10,
            Label::VerifyBundle => 10,
            Label::SeedBundle => 8,
            Label::PutOffsets => 8,
            Label::OpticalPost => 5,
            Label::UnbundleNested => 5,
            Label::FinalizeUpload => 8,
            Label::CleanupFs => 3,
        }
    }

    /// Default per-label worker concurrency.
    pub fn default_concurrency(self) -> usize {
        match self {
            Label::NewItem => 5,
            Label::PlanBundle => 1,
            Label::PrepareBundle => 2,
            Label::PostBundle => 2,
            Label::VerifyBundle => 2,
            Label::SeedBundle => 2,
            Label::PutOffsets => 2,
            Label::OpticalPost => 3,
            Label::UnbundleNested => 2,
            Label::FinalizeUpload => 2,
            Label::CleanupFs => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::NewItem => "new-item",
            Label::PlanBundle => "plan-bundle",
            Label::PrepareBundle => "prepare-bundle",
            Label::PostBundle => "post-bundle",
            Label::VerifyBundle => "verify-bundle",
            Label::SeedBundle => "seed-bundle",
            Label::PutOffsets => "put-offsets",
            Label::OpticalPost => "optical-post",
            Label::UnbundleNested => "unbundle-nested",
            Label::FinalizeUpload => "finalize-upload",
            Label::CleanupFs => "cleanup-fs",
        }
    }
}

/// A job handed back to a worker by [`QueueBroker::reserve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub label: Label,
    pub payload: serde_json::Value,
    pub attempt: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("job {0} not found (already acked, expired, or never enqueued)")]
    NotFound(String),
}

#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Enqueues a job for immediate (or, with `delay`, deferred) visibility.
    async fn enqueue(&self, label: Label, payload: serde_json::Value, delay: Option<Duration>) -> Result<String, QueueError>;

    /// Reserves up to `max` visible jobs for `label`, making them invisible to other
    /// reservers until acked, nacked, or their visibility timeout lapses.
    async fn reserve(&self, label: Label, max: usize) -> Result<Vec<Job>, QueueError>;

    /// Marks a job permanently complete.
    async fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    /// Marks a job failed; re-enqueues with exponential backoff unless `attempt` has reached
    /// the label's maximum, in which case the job is dropped to a dead-letter state.
    async fn nack(&self, job: &Job, max_attempts: u32) -> Result<(), QueueError>;
}
