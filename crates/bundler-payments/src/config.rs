//! Per-network payment configuration: the stable-coin deployment, the service's receiving
//! address, an ordered facilitator list, and whether the network accepts payments at all.

use crate::chain::types::{ChecksummedAddress, Eip155ChainReference};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub token_address: ChecksummedAddress,
    pub pay_to: ChecksummedAddress,
    /// Tried in order for both `/verify` and `/settle`; the first success wins.
    pub facilitators: Vec<String>,
    #[serde(default = "network_config_defaults::default_enabled")]
    pub enabled: bool,
    #[serde(default = "network_config_defaults::default_eip712_name")]
    pub eip712_name: String,
    #[serde(default = "network_config_defaults::default_eip712_version")]
    pub eip712_version: String,
}

mod network_config_defaults {
    pub fn default_enabled() -> bool {
        true
    }
    pub fn default_eip712_name() -> String {
        "USD Coin".into()
    }
    pub fn default_eip712_version() -> String {
        "2".into()
    }
}

impl NetworkConfig {
    pub fn chain_reference(&self) -> Eip155ChainReference {
        Eip155ChainReference::new(self.chain_id)
    }

    pub fn caip2(&self) -> String {
        self.chain_reference().as_caip2()
    }
}

/// All configured networks, keyed by their CAIP-2 identifier (`"eip155:8453"`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PaymentsConfig {
    pub networks: HashMap<String, NetworkConfig>,
    #[serde(default = "payments_config_defaults::default_bundler_fee_percent")]
    pub bundler_fee_percent: u64,
}

mod payments_config_defaults {
    pub fn default_bundler_fee_percent() -> u64 {
        30
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkLookupError {
    #[error("network {0} is not configured")]
    Unknown(String),
    #[error("network {0} is configured but disabled")]
    Disabled(String),
}

impl PaymentsConfig {
    pub fn network(&self, caip2: &str) -> Result<&NetworkConfig, NetworkLookupError> {
        let config = self
            .networks
            .get(caip2)
            .ok_or_else(|| NetworkLookupError::Unknown(caip2.to_string()))?;
        if !config.enabled {
            return Err(NetworkLookupError::Disabled(caip2.to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_network() -> NetworkConfig {
        NetworkConfig {
            chain_id: 8453,
            rpc_url: "https://mainnet.base.org".into(),
            token_address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap(),
            pay_to: "0x0000000000000000000000000000000000000002".parse().unwrap(),
            facilitators: vec!["https://facilitator.example".into()],
            enabled: true,
            eip712_name: "USD Coin".into(),
            eip712_version: "2".into(),
        }
    }

    #[test]
    fn disabled_network_is_rejected() {
        let mut network = sample_network();
        network.enabled = false;
        let mut config = PaymentsConfig::default();
        config.networks.insert("eip155:8453".into(), network);
        assert!(matches!(
            config.network("eip155:8453"),
            Err(NetworkLookupError::Disabled(_))
        ));
    }

    #[test]
    fn unknown_network_is_rejected() {
        let config = PaymentsConfig::default();
        assert!(matches!(
            config.network("eip155:1"),
            Err(NetworkLookupError::Unknown(_))
        ));
    }

    #[test]
    fn enabled_network_resolves() {
        let mut config = PaymentsConfig::default();
        config.networks.insert("eip155:8453".into(), sample_network());
        assert!(config.network("eip155:8453").is_ok());
    }
}
