//! Configuration for the admission service binary.
//!
//! Loaded from environment variables via `dotenvy` + `std::env`, following the teacher's
//! `Config::load()` pattern, rather than a mandatory JSON file: this binary has a much
//! smaller surface than the facilitator's per-chain scheme table.

use bundler_payments::PaymentsConfig;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read payments config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse payments config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("invalid value for env var {0}: {1}")]
    InvalidEnv(&'static str, String),
}

/// A spam heuristic entry: reject uploads matching this exact shape as 403, per
/// SPEC_FULL.md's resolution of the spam-heuristic open question (configurable rather than
/// a hard-coded constant).
#[derive(Debug, Clone, Deserialize)]
pub struct SpamHeuristic {
    pub exact_byte_count: Option<u64>,
    #[serde(default)]
    pub require_no_tags: bool,
}

impl SpamHeuristic {
    pub fn matches(&self, byte_count: u64, tag_count: usize) -> bool {
        let size_matches = self.exact_byte_count.is_none_or(|n| n == byte_count);
        let tags_match = !self.require_no_tags || tag_count == 0;
        size_matches && tags_match
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: IpAddr,
    /// Uploads at or below this size skip payment entirely. Default 0 (no free tier).
    pub free_upload_limit_bytes: u64,
    /// Hard ceiling on a single item's wire size. Default 4 GiB.
    pub max_single_item_bytes: u64,
    pub allow_listed_owners: Vec<String>,
    pub block_listed_owners: Vec<String>,
    pub spam_heuristics: Vec<SpamHeuristic>,
    pub optical_bridge_enabled: bool,
    pub optical_skip_list: Vec<String>,
    pub deadline_height_increment: u64,
    pub payments: PaymentsConfig,
    /// Hex-encoded 32-byte seed for the service's Ed25519 receipt-signing key.
    pub receipt_signing_key_hex: String,
    pub gateway_url: String,
}

mod defaults {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_FREE_UPLOAD_LIMIT_BYTES: u64 = 0;
    pub const DEFAULT_MAX_SINGLE_ITEM_BYTES: u64 = 4 * 1024 * 1024 * 1024;
    pub const DEFAULT_DEADLINE_HEIGHT_INCREMENT: u64 = 200;
}

impl Config {
    /// Loads configuration: scalar settings from environment variables (with production
    /// defaults matching SPEC_FULL.md §6's "Fees / limits defaults" table), the per-network
    /// payment configuration from a JSON file named by `PAYMENTS_CONFIG` (default
    /// `payments.json`).
    pub fn load() -> Result<Self, ConfigError> {
        let port = env_parsed("PORT", defaults::DEFAULT_PORT)?;
        let host = env_parsed("HOST", IpAddr::from_str(defaults::DEFAULT_HOST).unwrap())?;
        let free_upload_limit_bytes =
            env_parsed("FREE_UPLOAD_LIMIT_BYTES", defaults::DEFAULT_FREE_UPLOAD_LIMIT_BYTES)?;
        let max_single_item_bytes =
            env_parsed("MAX_SINGLE_ITEM_BYTES", defaults::DEFAULT_MAX_SINGLE_ITEM_BYTES)?;
        let deadline_height_increment =
            env_parsed("DEADLINE_HEIGHT_INCREMENT", defaults::DEFAULT_DEADLINE_HEIGHT_INCREMENT)?;
        let allow_listed_owners = env_list("ALLOW_LISTED_OWNERS");
        let block_listed_owners = env_list("BLOCK_LISTED_OWNERS");
        let optical_skip_list = env_list("OPTICAL_SKIP_LIST");
        let optical_bridge_enabled = env_parsed("OPTICAL_BRIDGE_ENABLED", true)?;
        let receipt_signing_key_hex = std::env::var("RECEIPT_SIGNING_KEY")
            .map_err(|_| ConfigError::InvalidEnv("RECEIPT_SIGNING_KEY", "not set".into()))?;
        let gateway_url = std::env::var("GATEWAY_URL")
            .unwrap_or_else(|_| "http://localhost:1984".to_string());

        let payments_config_path = std::env::var("PAYMENTS_CONFIG")
            .unwrap_or_else(|_| "payments.json".to_string());
        let payments = Self::load_payments(PathBuf::from(payments_config_path))?;

        let spam_heuristics = std::env::var("SPAM_HEURISTICS")
            .ok()
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            port,
            host,
            free_upload_limit_bytes,
            max_single_item_bytes,
            allow_listed_owners,
            block_listed_owners,
            spam_heuristics,
            optical_bridge_enabled,
            optical_skip_list,
            deadline_height_increment,
            payments,
            receipt_signing_key_hex,
            gateway_url,
        })
    }

    fn load_payments(path: PathBuf) -> Result<PaymentsConfig, ConfigError> {
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn is_allow_listed(&self, owner_address: &str) -> bool {
        self.allow_listed_owners.iter().any(|a| a == owner_address)
    }

    pub fn is_block_listed(&self, owner_address: &str) -> bool {
        self.block_listed_owners.iter().any(|a| a == owner_address)
    }

    pub fn skips_optical(&self, owner_address: &str) -> bool {
        self.optical_skip_list.iter().any(|a| a == owner_address)
    }

    pub fn matches_spam_heuristic(&self, byte_count: u64, tag_count: usize) -> bool {
        self.spam_heuristics.iter().any(|h| h.matches(byte_count, tag_count))
    }
}

fn env_parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidEnv(name, format!("{e}"))),
        Err(_) => Ok(default),
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default()
}
