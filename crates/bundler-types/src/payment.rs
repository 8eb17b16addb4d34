//! `Payment`: the persisted record of an x402 stable-coin settlement and its eventual
//! fraud-tolerance reconciliation against the item it paid for.

use crate::timestamp::UnixTimestamp;
use serde::{Deserialize, Serialize};

/// Fraud-tolerance band applied when reconciling a payment's declared byte count against
/// the item's actual byte count once known (prepare-bundle time).
pub const FRAUD_TOLERANCE_PERCENT: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    PendingValidation,
    Confirmed,
    Refunded,
    FraudPenalty,
    Failed,
}

/// The only payment mode this service currently supports: pay-as-you-go per upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Payg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub tx_hash: String,
    pub network: String,
    pub token_address: String,
    pub payer_address: String,
    pub recipient_address: String,
    /// Atomic units of the stable-coin (6-decimal), e.g. USDC.
    pub stable_amount: u64,
    /// The chain-native-unit equivalent at the oracle FX rate used for the quote.
    pub chain_unit_amount: u128,
    pub mode: PaymentMode,
    pub declared_byte_count: u64,
    pub actual_byte_count: Option<u64>,
    pub status: PaymentStatus,
    pub linked_item_id: Option<String>,
    pub created_at: UnixTimestamp,
    pub finalized_at: Option<UnixTimestamp>,
    /// Amount of `chain_unit_amount` attributed to a refund; recorded only, never sent
    /// on-chain (refund delivery is out of scope for this service).
    pub refund_amount: Option<u128>,
}

/// Outcome of reconciling a payment's declared size against the item's actual size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationOutcome {
    Confirmed,
    Refunded { refund_amount: u128 },
    FraudPenalty,
}

impl Payment {
    /// Applies the 5% fraud-tolerance band described in the payment engine's finalization
    /// step: within the band confirms the payment outright, below it refunds the
    /// proportional shortfall, above it penalizes (no refund, caller rejects the item).
    pub fn reconcile(&self, actual_byte_count: u64) -> FinalizationOutcome {
        let declared = self.declared_byte_count.max(1);
        let tolerance = declared * FRAUD_TOLERANCE_PERCENT / 100;
        let lower = declared.saturating_sub(tolerance);
        let upper = declared + tolerance;
        if actual_byte_count >= lower && actual_byte_count <= upper {
            FinalizationOutcome::Confirmed
        } else if actual_byte_count < lower {
            let shortfall_ratio = 1.0 - (actual_byte_count as f64 / declared as f64);
            let refund_amount = (self.chain_unit_amount as f64 * shortfall_ratio) as u128;
            FinalizationOutcome::Refunded { refund_amount }
        } else {
            FinalizationOutcome::FraudPenalty
        }
    }
}

/// `{byteCount, chainUnitPrice, bundlerFeePct, stableAmount, network, asset, payTo,
/// maxTimeoutSeconds, validBefore}` — ephemeral, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub byte_count: u64,
    pub chain_unit_price: u128,
    pub bundler_fee_pct: u8,
    pub stable_amount: u64,
    pub network: String,
    pub asset: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub valid_before: UnixTimestamp,
}
