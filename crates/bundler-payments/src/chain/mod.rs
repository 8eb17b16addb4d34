//! EVM address/chain-id wire types shared by payment requirements, settlement envelopes,
//! and the ERC-1271 contract-wallet verification path.

pub mod types;
pub use types::*;
