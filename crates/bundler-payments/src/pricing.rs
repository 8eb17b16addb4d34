//! Pricing oracle (C5): chain-native byte pricing, stable-coin conversion with bundler fee,
//! and the inverse lookup used when recording a received payment's chain-unit equivalent.
//!
//! The chain-unit price and the chain→USD FX rate are each cached behind a bounded-staleness
//! `tokio::sync::RwLock` guard, refreshed lazily on read once the cached value is older than
//! [`CACHE_TTL`] — the same bounded-staleness-cache shape the corpus uses for provider state
//! that's expensive to fetch but safe to serve slightly stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

const CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_BUNDLER_FEE_PERCENT: u64 = 30;
/// $0.001 in 6-decimal atomic stable units.
const MIN_STABLE_QUOTE_FLOOR: u64 = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("failed to fetch chain-native byte price: {0}")]
    ChainGateway(String),
    #[error("failed to fetch chain-to-usd FX rate: {0}")]
    FxGateway(String),
}

/// Fetches a price quantity from an external source. Implemented by an HTTP-backed gateway
/// client in production and a fixed-value stub in tests.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn chain_unit_price_per_byte(&self) -> Result<u128, PricingError>;
    async fn chain_unit_to_usd_micros(&self) -> Result<u128, PricingError>;
}

struct CachedValue {
    value: u128,
    fetched_at_secs: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Oracle wrapping a [`PriceSource`] with bounded-staleness caches for the chain-unit byte
/// price and the chain→USD FX rate, plus a configurable bundler fee percentage.
pub struct PricingOracle<S: PriceSource> {
    source: S,
    byte_price_cache: RwLock<Option<CachedValue>>,
    fx_rate_cache: RwLock<Option<CachedValue>>,
    bundler_fee_percent: AtomicU64,
}

impl<S: PriceSource> PricingOracle<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            byte_price_cache: RwLock::new(None),
            fx_rate_cache: RwLock::new(None),
            bundler_fee_percent: AtomicU64::new(DEFAULT_BUNDLER_FEE_PERCENT),
        }
    }

    pub fn with_bundler_fee_percent(self, percent: u64) -> Self {
        self.bundler_fee_percent.store(percent, Ordering::Relaxed);
        self
    }

    async fn cached_value(cache: &RwLock<Option<CachedValue>>) -> Option<u128> {
        let guard = cache.read().await;
        guard.as_ref().and_then(|cached| {
            if now_secs().saturating_sub(cached.fetched_at_secs) < CACHE_TTL.as_secs() {
                Some(cached.value)
            } else {
                None
            }
        })
    }

    async fn store_cached_value(cache: &RwLock<Option<CachedValue>>, value: u128) {
        let mut guard = cache.write().await;
        *guard = Some(CachedValue {
            value,
            fetched_at_secs: now_secs(),
        });
    }

    /// Price of one byte in chain-native atomic units, refreshed at most once per
    /// [`CACHE_TTL`].
    pub async fn chain_unit_price_for_bytes(&self, byte_count: u64) -> Result<u128, PricingError> {
        let per_byte = if let Some(cached) = Self::cached_value(&self.byte_price_cache).await {
            cached
        } else {
            let fetched = self.source.chain_unit_price_per_byte().await?;
            Self::store_cached_value(&self.byte_price_cache, fetched).await;
            fetched
        };
        Ok(per_byte.saturating_mul(byte_count as u128))
    }

    async fn fx_rate_usd_micros(&self) -> Result<u128, PricingError> {
        if let Some(cached) = Self::cached_value(&self.fx_rate_cache).await {
            return Ok(cached);
        }
        let fetched = self.source.chain_unit_to_usd_micros().await?;
        Self::store_cached_value(&self.fx_rate_cache, fetched).await;
        Ok(fetched)
    }

    /// Converts a chain-native amount to atomic stable-coin units (6 decimals), applying the
    /// bundler fee and the per-quote minimum floor.
    pub async fn stable_for_chain_units(&self, chain_units: u128) -> Result<u64, PricingError> {
        let fx_micros = self.fx_rate_usd_micros().await?;
        // chain_units * (usd-per-chain-unit in micros) / 1_000_000 gives USD; x 1_000_000 again
        // for 6-decimal atomic stable units cancels out, so this is chain_units * fx_micros.
        let base = chain_units.saturating_mul(fx_micros) / 1_000_000;
        let fee_percent = self.bundler_fee_percent.load(Ordering::Relaxed) as u128;
        let with_fee = base + (base.saturating_mul(fee_percent) / 100);
        let floored = with_fee.max(MIN_STABLE_QUOTE_FLOOR as u128);
        Ok(floored.min(u64::MAX as u128) as u64)
    }

    /// Inverse of [`Self::stable_for_chain_units`] without the fee markup, used to record the
    /// chain-unit equivalent of a stable-coin payment that was actually received.
    pub async fn chain_units_for_stable(&self, atomic_stable: u64) -> Result<u128, PricingError> {
        let fx_micros = self.fx_rate_usd_micros().await?;
        if fx_micros == 0 {
            return Ok(0);
        }
        Ok((atomic_stable as u128).saturating_mul(1_000_000) / fx_micros)
    }
}
