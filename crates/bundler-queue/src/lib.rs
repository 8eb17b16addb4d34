//! Durable job queue broker for the bundling pipeline (C4).
//!
//! One queue per job [`Label`], all at-least-once with exponential-backoff retry and
//! delayed visibility. [`redis_backed::RedisQueue`] backs production deployments; the
//! `inmemory` module backs unit tests and small deployments without a Redis-like backplane.

pub mod backoff;
pub mod broker;
pub mod cron_schedule;
pub mod inmemory;
pub mod redis_backed;

pub use backoff::backoff_for_attempt;
pub use broker::{Job, Label, QueueBroker, QueueError};
pub use cron_schedule::CronTicker;
