//! Optical bridge (C10): best-effort, out-of-band delivery of re-signed item headers to
//! downstream indexers, each sink independently circuit-broken.

pub mod breaker;
pub mod sink;

pub use breaker::{BreakerState, CircuitBreaker};
pub use sink::{FanOutError, Sink, SinkRole, fan_out, per_call_timeout};
