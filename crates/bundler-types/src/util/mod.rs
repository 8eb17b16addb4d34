//! Small helper types shared across the wire codec and data model.
//!
//! - [`b64`] - base64 encoding/decoding for header fields and envelope payloads
//! - [`money_amount`] - human-readable currency amount parsing for config-supplied prices

pub mod b64;
pub mod money_amount;

pub use b64::*;
