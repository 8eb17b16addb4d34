#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Wire codec and persisted data model for the bundling service.
//!
//! This crate is blockchain-agnostic in the sense that it does not talk to any particular
//! chain gateway or payment facilitator; it owns the on-wire data-item format and the
//! entities that a bundling pipeline persists as items move from upload to permanence.
//!
//! # Modules
//!
//! - [`sigtypes`] - static registry of signature schemes keyed by their 2-byte wire code
//! - [`wire`] - streaming header decoder/encoder and bundle packing
//! - [`item`] - `DataItem` and its lifecycle state machine
//! - [`bundle`] - `BundlePlan`, `PostedBundle`, `ItemOffset`
//! - [`timestamp`] - Unix timestamp utilities shared across persisted records
//! - [`util`] - small helper types (base64 bytes)

pub mod bundle;
pub mod item;
pub mod payment;
pub mod sigtypes;
pub mod timestamp;
pub mod util;
pub mod wire;

pub use bundle::{BundlePlan, ItemOffset, PostedBundle};
pub use item::{DataItem, ItemState};
pub use payment::{Payment, PaymentStatus, Quote};
