//! Worker configuration: bundle packing budgets, cleanup thresholds, and the cron schedules
//! for `plan-bundle` and `cleanup-fs`, loaded the same env-var way as the admission
//! service's `Config::load()`.

use bundler_payments::PaymentsConfig;
use bundler_types::bundle::{DEFAULT_MAX_BUNDLE_BYTE_COUNT, DEFAULT_MAX_ITEMS_PER_BUNDLE};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("required env var {0} is not set")]
    Missing(&'static str),
    #[error("failed to read payments config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse payments config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub local_mode: bool,
    pub local_data_dir: String,
    pub gateway_url: String,
    pub receipt_signing_key_hex: String,
    pub max_bundle_byte_count: u64,
    pub max_items_per_bundle: usize,
    /// Age, in seconds, after which the oldest member of a held-back plan forces a flush.
    pub overdue_threshold_secs: u64,
    pub confirmation_depth: u64,
    /// How long `verify-bundle` keeps polling before reverting the plan, in seconds.
    pub verify_timeout_secs: u64,
    pub filesystem_cleanup_days: u64,
    pub minio_cleanup_days: u64,
    pub plan_bundle_cron: String,
    pub cleanup_cron: String,
    pub cleanup_batch_size: usize,
    /// Per-network payment configuration, shared with the admission service so
    /// `finalize_payment`'s fraud-tolerance math uses the same bundler fee percent.
    pub payments: PaymentsConfig,
}

mod defaults {
    pub const OVERDUE_THRESHOLD_SECS: u64 = 15 * 60;
    pub const CONFIRMATION_DEPTH: u64 = 18;
    pub const VERIFY_TIMEOUT_SECS: u64 = 6 * 60 * 60;
    pub const FILESYSTEM_CLEANUP_DAYS: u64 = 7;
    pub const MINIO_CLEANUP_DAYS: u64 = 90;
    pub const PLAN_BUNDLE_CRON: &str = "0 * * * * *";
    pub const CLEANUP_CRON: &str = "0 0 2 * * *";
    pub const CLEANUP_BATCH_SIZE: usize = 500;
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let local_mode = env_parsed("LOCAL_MODE", false)?;
        let payments_config_path =
            std::env::var("PAYMENTS_CONFIG").unwrap_or_else(|_| "payments.json".to_string());
        let payments = Self::load_payments(PathBuf::from(payments_config_path))?;
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            local_mode,
            local_data_dir: std::env::var("LOCAL_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            gateway_url: std::env::var("GATEWAY_URL").unwrap_or_else(|_| "http://localhost:1984".to_string()),
            receipt_signing_key_hex: std::env::var("RECEIPT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("RECEIPT_SIGNING_KEY"))?,
            max_bundle_byte_count: env_parsed("MAX_BUNDLE_BYTE_COUNT", DEFAULT_MAX_BUNDLE_BYTE_COUNT)?,
            max_items_per_bundle: env_parsed("MAX_ITEMS_PER_BUNDLE", DEFAULT_MAX_ITEMS_PER_BUNDLE)?,
            overdue_threshold_secs: env_parsed("OVERDUE_THRESHOLD_SECS", defaults::OVERDUE_THRESHOLD_SECS)?,
            confirmation_depth: env_parsed("CONFIRMATION_DEPTH", defaults::CONFIRMATION_DEPTH)?,
            verify_timeout_secs: env_parsed("VERIFY_TIMEOUT_SECS", defaults::VERIFY_TIMEOUT_SECS)?,
            filesystem_cleanup_days: env_parsed("FILESYSTEM_CLEANUP_DAYS", defaults::FILESYSTEM_CLEANUP_DAYS)?,
            minio_cleanup_days: env_parsed("MINIO_CLEANUP_DAYS", defaults::MINIO_CLEANUP_DAYS)?,
            plan_bundle_cron: std::env::var("PLAN_BUNDLE_CRON").unwrap_or_else(|_| defaults::PLAN_BUNDLE_CRON.to_string()),
            cleanup_cron: std::env::var("CLEANUP_CRON").unwrap_or_else(|_| defaults::CLEANUP_CRON.to_string()),
            cleanup_batch_size: env_parsed("CLEANUP_BATCH_SIZE", defaults::CLEANUP_BATCH_SIZE)?,
            payments,
        })
    }

    fn load_payments(path: PathBuf) -> Result<PaymentsConfig, ConfigError> {
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Ok(serde_json::from_str(&content)?)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsed_falls_back_to_default_when_unset() {
        unsafe {
            std::env::remove_var("ARBUNDLER_WORKER_TEST_UNSET");
        }
        let value: u64 = env_parsed("ARBUNDLER_WORKER_TEST_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }
}
