//! Admission service (C7): the payment-gated HTTP boundary of the bundling pipeline.
//!
//! Accepts signed data items over `POST /v1/tx`, quotes and settles an x402 stable-coin
//! payment when the item isn't free or allow-listed, verifies the item's own signature,
//! and hands the admitted item off to the bundle-packing pipeline (`worker/`) via the
//! metadata store (C3) and queue broker (C4).
//!
//! # Modules
//!
//! - [`config`] — admission service configuration (limits, allow/block lists, payments)
//! - [`state`] — shared application state passed to every handler
//! - [`handlers`] — the HTTP surface: upload, status, offsets, price quotes
//! - [`receipt`] — signed upload receipts and the `X-Payment-Response` header
//! - [`telemetry`] — tracing/OpenTelemetry setup, carried from the reference facilitator
//! - [`sig_down`] — graceful shutdown on SIGINT/SIGTERM
//!
//! The production [`bundler_payments::pricing::PriceSource`] (`GatewayPriceSource`) lives in
//! `bundler-payments` itself so the bundle-packer worker can construct a [`PaymentEngine`]
//! without depending on this crate.

pub mod config;
pub mod handlers;
pub mod receipt;
pub mod sig_down;
pub mod state;
pub mod telemetry;
