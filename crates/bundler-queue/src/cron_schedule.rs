//! Tick loop for repeatable jobs (`cleanup-fs`), checked against a parsed `cron::Schedule`
//! rather than hand-rolled date arithmetic.

use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fires a callback on every tick of a cron expression until cancelled.
///
/// Polls once a second; this is cheap relative to any realistic cron granularity and keeps
/// the loop a plain `tokio::select!` rather than computing exact next-fire sleeps.
pub struct CronTicker {
    schedule: Schedule,
}

impl CronTicker {
    pub fn parse(expression: &str) -> Result<Self, cron::error::Error> {
        Ok(Self {
            schedule: Schedule::from_str(expression)?,
        })
    }

    /// Runs until `cancel` fires, invoking `on_tick` once per scheduled occurrence.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut on_tick: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut last_fired = Utc::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            let now = Utc::now();
            if self.schedule.after(&last_fired).next().is_some_and(|next| next <= now) {
                last_fired = now;
                on_tick().await;
            }
        }
    }
}
