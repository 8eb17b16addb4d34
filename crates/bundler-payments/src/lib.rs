#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! x402 HTTP-402 payment engine for the bundling service (C5 Pricing Oracle + C6 Payment
//! Engine).
//!
//! Unlike a facilitator, this crate plays the *client* role of the x402 protocol: it builds
//! `PaymentRequirements` quotes, verifies a client's `X-PAYMENT` envelope locally (EOA
//! recovery or ERC-1271 smart-wallet check), then forwards the envelope to one or more
//! externally configured facilitators for `/verify` and `/settle` rather than submitting
//! the on-chain transfer itself.
//!
//! # Modules
//!
//! - [`chain`] - EVM address/chain-id wire types
//! - [`networks`] - known stable-coin deployments
//! - [`types`] - x402 wire types (`PaymentRequirements`, `X-PAYMENT` envelope, facilitator
//!   request/response bodies)
//! - [`verify`] - local preconditions and the EOA/ERC-1271 signature-verification paths
//! - [`facilitator_client`] - ordered multi-facilitator HTTP fallback
//! - [`pricing`] - bounded-staleness chain-unit/stable-coin pricing oracle
//! - [`config`] - per-network payment configuration
//! - [`engine`] - orchestrates quote generation, verification, settlement, and finalization
//! - [`gateway_source`] - the production [`PriceSource`] backed by the chain's HTTP gateway

pub mod chain;
pub mod config;
pub mod engine;
pub mod facilitator_client;
pub mod gateway_source;
pub mod networks;
pub mod pricing;
pub mod types;
pub mod verify;

pub use config::{NetworkConfig, NetworkLookupError, PaymentsConfig};
pub use engine::{PaymentEngine, PaymentEngineError};
pub use facilitator_client::{FacilitatorClient, FacilitatorError};
pub use gateway_source::GatewayPriceSource;
pub use pricing::{PriceSource, PricingError, PricingOracle};
pub use types::{PaymentPayload, PaymentRequirements};
pub use verify::VerificationError;
