//! Known stable-coin deployments for networks this service is commonly configured against.
//! Deployment configuration can always override these with an explicit `tokenAddress` in
//! `Config`; this module exists so the defaults don't need to be typed out per-deployment.

use crate::chain::types::{Eip155ChainReference, Eip155TokenDeployment};
use alloy_primitives::address;

/// USDC on Base mainnet.
pub fn usdc_base() -> Eip155TokenDeployment {
    Eip155TokenDeployment {
        chain_reference: Eip155ChainReference::new(8453),
        address: address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913"),
        decimals: 6,
        eip712_name: "USD Coin".into(),
        eip712_version: "2".into(),
    }
}

/// USDC on Base Sepolia testnet.
pub fn usdc_base_sepolia() -> Eip155TokenDeployment {
    Eip155TokenDeployment {
        chain_reference: Eip155ChainReference::new(84532),
        address: address!("036cbd53842c5426634e7929541ec2318f3dcf7e"),
        decimals: 6,
        eip712_name: "USDC".into(),
        eip712_version: "2".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_usdc_has_six_decimals() {
        assert_eq!(usdc_base().decimals, 6);
        assert_eq!(usdc_base().chain_reference.inner(), 8453);
    }
}
