//! Downstream indexer sinks and the fan-out call that posts a re-signed header to each.

use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::breaker::CircuitBreaker;

/// 3s per sink, or 7.7s when the deployment is in local/dev mode (slower local indexers).
pub fn per_call_timeout(local_mode: bool) -> Duration {
    if local_mode {
        Duration::from_millis(7700)
    } else {
        Duration::from_secs(3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkRole {
    /// Failure fails the enclosing `optical-post` job (it will be retried by the queue).
    Primary,
    /// Failure is logged only; never fails the job.
    Optional,
    /// Like `Optional`, but only receives a sampled fraction of traffic.
    Canary { sample_rate_percent: u8 },
}

pub struct Sink {
    pub name: String,
    pub endpoint: String,
    pub role: SinkRole,
    pub breaker: CircuitBreaker,
}

impl Sink {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, role: SinkRole, open_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            role,
            breaker: CircuitBreaker::new(open_timeout),
        }
    }

    fn sampled_in(&self) -> bool {
        match self.role {
            SinkRole::Canary { sample_rate_percent } => rand::rng().random_range(0..100) < sample_rate_percent,
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("primary sink {0} failed: {1}")]
    PrimaryFailed(String, String),
}

#[derive(Debug, Serialize)]
struct ResignedHeader<'a> {
    item_id: &'a str,
    owner_address: &'a str,
    signature_type: u16,
    tags: &'a [bundler_types::wire::Tag],
    resigned_signature: &'a [u8],
}

/// Forwards `header` to every configured sink. A primary sink failure (including a breaker
/// refusing the call) surfaces as [`FanOutError::PrimaryFailed`] so the caller can fail and
/// retry the `optical-post` job; optional/canary failures are only logged.
pub async fn fan_out(
    client: &Client,
    sinks: &[Sink],
    local_mode: bool,
    item_id: &str,
    owner_address: &str,
    signature_type: u16,
    tags: &[bundler_types::wire::Tag],
    resigned_signature: &[u8],
) -> Result<(), FanOutError> {
    let body = ResignedHeader {
        item_id,
        owner_address,
        signature_type,
        tags,
        resigned_signature,
    };
    let timeout = per_call_timeout(local_mode);

    for sink in sinks {
        if !sink.sampled_in() {
            continue;
        }
        if !sink.breaker.allow_call() {
            if sink.role == SinkRole::Primary {
                return Err(FanOutError::PrimaryFailed(sink.name.clone(), "circuit breaker open".to_string()));
            }
            tracing::warn!(sink = %sink.name, "skipping optional sink, circuit breaker open");
            continue;
        }

        let result = client.post(&sink.endpoint).json(&body).timeout(timeout).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                sink.breaker.record_success();
            }
            Ok(response) => {
                sink.breaker.record_failure();
                let status = response.status();
                if sink.role == SinkRole::Primary {
                    return Err(FanOutError::PrimaryFailed(sink.name.clone(), format!("status {status}")));
                }
                tracing::warn!(sink = %sink.name, %status, "optional sink returned non-success status");
            }
            Err(err) => {
                sink.breaker.record_failure();
                if sink.role == SinkRole::Primary {
                    return Err(FanOutError::PrimaryFailed(sink.name.clone(), err.to_string()));
                }
                tracing::warn!(sink = %sink.name, error = %err, "optional sink request failed");
            }
        }
    }
    Ok(())
}
