//! Payment engine (C6): quote generation, envelope verification, facilitator settlement,
//! and fraud-tolerance finalization, orchestrated against the metadata store (C3).

use crate::config::{NetworkConfig, NetworkLookupError, PaymentsConfig};
use crate::facilitator_client::{FacilitatorClient, FacilitatorError};
use crate::pricing::{PriceSource, PricingError, PricingOracle};
use crate::types::{PaymentPayload, PaymentRequirements, PaymentRequirementsExtra};
use crate::verify::{self, VerificationError};
use alloy_primitives::U256;
use bundler_store::{MetadataStore, StoreError};
use bundler_types::payment::{FinalizationOutcome, Payment, PaymentMode, PaymentStatus, Quote};
use bundler_types::timestamp::UnixTimestamp;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PaymentEngineError {
    #[error(transparent)]
    NetworkLookup(#[from] NetworkLookupError),
    #[error("payment envelope could not be decoded")]
    PaymentDecode,
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct PaymentEngine<S: PriceSource> {
    config: PaymentsConfig,
    pricing: PricingOracle<S>,
    store: Arc<dyn MetadataStore>,
}

impl<S: PriceSource> PaymentEngine<S> {
    pub fn new(config: PaymentsConfig, pricing: PricingOracle<S>, store: Arc<dyn MetadataStore>) -> Self {
        Self { config, pricing, store }
    }

    /// CAIP-2 identifiers of every configured network with `enabled: true`, for endpoints
    /// that quote against all of them at once (the legacy multi-`accepts` price endpoint).
    pub fn enabled_networks(&self) -> impl Iterator<Item = &str> {
        self.config.networks.iter().filter(|(_, net)| net.enabled).map(|(caip2, _)| caip2.as_str())
    }

    /// `(network, payToAddress)` for every enabled network, for `GET /v1/info`'s `addresses`
    /// field.
    pub fn enabled_network_pay_tos(&self) -> impl Iterator<Item = (&str, String)> {
        self.config
            .networks
            .iter()
            .filter(|(_, net)| net.enabled)
            .map(|(caip2, net)| (caip2.as_str(), net.pay_to.to_string()))
    }

    /// Builds the `PaymentRequirements` quote for an upload of `byte_count` bytes on
    /// `network` (a CAIP-2 identifier, e.g. `"eip155:8453"`).
    pub async fn quote(
        &self,
        byte_count: u64,
        network: &str,
        resource: &str,
    ) -> Result<(Quote, PaymentRequirements), PaymentEngineError> {
        let net = self.config.network(network)?;
        let chain_units = self.pricing.chain_unit_price_for_bytes(byte_count).await?;
        let stable_amount = self.pricing.stable_for_chain_units(chain_units).await?;
        let valid_before = UnixTimestamp::now().as_secs() + PaymentRequirements::DEFAULT_MAX_TIMEOUT_SECONDS;

        let quote = Quote {
            byte_count,
            chain_unit_price: chain_units,
            bundler_fee_pct: self.config.bundler_fee_percent as u8,
            stable_amount,
            network: network.to_string(),
            asset: net.token_address.to_string(),
            pay_to: net.pay_to.to_string(),
            max_timeout_seconds: PaymentRequirements::DEFAULT_MAX_TIMEOUT_SECONDS,
            valid_before: UnixTimestamp::from_secs(valid_before),
        };
        let requirements = PaymentRequirements {
            scheme: PaymentRequirements::SCHEME_EXACT.to_string(),
            network: network.to_string(),
            max_amount_required: U256::from(stable_amount),
            resource: resource.to_string(),
            pay_to: net.pay_to,
            asset: net.token_address,
            max_timeout_seconds: PaymentRequirements::DEFAULT_MAX_TIMEOUT_SECONDS,
            extra: PaymentRequirementsExtra {
                name: net.eip712_name.clone(),
                version: net.eip712_version.clone(),
            },
        };
        Ok((quote, requirements))
    }

    /// Decodes, locally validates, signature-verifies, and settles an `X-PAYMENT` envelope
    /// against the quoted `requirements`, returning the inserted `Payment`'s id.
    pub async fn verify_and_settle(
        &self,
        x_payment_header: &str,
        requirements: &PaymentRequirements,
        declared_byte_count: u64,
    ) -> Result<String, PaymentEngineError> {
        let payload = PaymentPayload::decode_base64(x_payment_header)
            .map_err(|_| PaymentEngineError::PaymentDecode)?;
        let net = self.config.network(&requirements.network)?;

        verify::check_preconditions(&payload, requirements)?;
        verify::verify_signature(&payload, requirements, &net.rpc_url).await?;

        let client = FacilitatorClient::new(net.facilitators.clone());
        client.verify(&payload, requirements).await?;
        let settlement = client.settle(&payload, requirements).await?;

        let tx_hash = settlement
            .transaction_hash()
            .expect("settle client guarantees a non-empty transaction hash on success")
            .to_string();

        let payment_id = format!("pay-{}-{}", requirements.network, &tx_hash);
        let stable_amount = u64::try_from(requirements.max_amount_required).unwrap_or(u64::MAX);
        let chain_unit_amount = self.pricing.chain_units_for_stable(stable_amount).await?;
        let payment = Payment {
            payment_id: payment_id.clone(),
            tx_hash,
            network: requirements.network.clone(),
            token_address: requirements.asset.to_string(),
            payer_address: payload.payload.authorization.from.to_string(),
            recipient_address: requirements.pay_to.to_string(),
            stable_amount,
            chain_unit_amount,
            mode: PaymentMode::Payg,
            declared_byte_count,
            actual_byte_count: None,
            status: PaymentStatus::PendingValidation,
            linked_item_id: None,
            created_at: UnixTimestamp::now(),
            finalized_at: None,
            refund_amount: None,
        };
        self.store.insert_payment(payment).await?;
        Ok(payment_id)
    }

    /// Links a settled payment to the admitted item once its id is known.
    pub async fn link_payment(&self, payment_id: &str, item_id: &str) -> Result<(), PaymentEngineError> {
        self.store.link_payment_to_item(payment_id, item_id).await?;
        Ok(())
    }

    /// Finalizes a payment against the item's actual byte count once known
    /// (`prepare-bundle` time): confirms within the fraud-tolerance band, refunds
    /// proportionally below it, penalizes above it.
    pub async fn finalize_payment(
        &self,
        payment_id: &str,
        actual_byte_count: u64,
    ) -> Result<FinalizationOutcome, PaymentEngineError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| StoreError::PaymentNotFound(payment_id.to_string()))?;
        let outcome = payment.reconcile(actual_byte_count);
        let (status, refund_amount) = match outcome {
            FinalizationOutcome::Confirmed => (PaymentStatus::Confirmed, None),
            FinalizationOutcome::Refunded { refund_amount } => (PaymentStatus::Refunded, Some(refund_amount)),
            FinalizationOutcome::FraudPenalty => (PaymentStatus::FraudPenalty, None),
        };
        self.store
            .finalize_payment(payment_id, actual_byte_count, status, refund_amount)
            .await?;
        Ok(outcome)
    }

    pub fn network_config(&self, caip2: &str) -> Result<&NetworkConfig, NetworkLookupError> {
        self.config.network(caip2)
    }
}
