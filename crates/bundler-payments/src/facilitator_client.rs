//! HTTP client for the x402 facilitator `/verify` and `/settle` endpoints: tries each
//! configured facilitator in order, accepting the first success and logging non-final
//! failures at `warn`.

use crate::types::{FacilitatorRequest, PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};
use std::time::Duration;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("no facilitators configured for this network")]
    NoFacilitatorsConfigured,
    #[error("all facilitators failed: {0}")]
    AllFailed(String),
}

pub struct FacilitatorClient {
    http: reqwest::Client,
    facilitators: Vec<String>,
}

impl FacilitatorClient {
    pub fn new(facilitators: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            facilitators,
        }
    }

    /// Forwards the envelope to each facilitator's `/verify` in order, returning the first
    /// response with `isValid: true`. A facilitator that rejects the payment does not end
    /// the attempt sequence unless it is the last one configured.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorError> {
        if self.facilitators.is_empty() {
            return Err(FacilitatorError::NoFacilitatorsConfigured);
        }
        let body = FacilitatorRequest {
            x402_version: PaymentPayload::SUPPORTED_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        };
        let mut errors = Vec::new();
        for base_url in &self.facilitators {
            let url = format!("{}/verify", base_url.trim_end_matches('/'));
            match self
                .http
                .post(&url)
                .timeout(VERIFY_TIMEOUT)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => match response.json::<VerifyResponse>().await {
                    Ok(parsed) if parsed.is_valid => return Ok(parsed),
                    Ok(parsed) => {
                        tracing::warn!(facilitator = %base_url, reason = ?parsed.invalid_reason, "facilitator rejected payment");
                        errors.push(format!("{base_url}: rejected"));
                    }
                    Err(e) => {
                        tracing::warn!(facilitator = %base_url, error = %e, "facilitator verify response malformed");
                        errors.push(format!("{base_url}: {e}"));
                    }
                },
                Err(e) => {
                    tracing::warn!(facilitator = %base_url, error = %e, "facilitator verify call failed");
                    errors.push(format!("{base_url}: {e}"));
                }
            }
        }
        Err(FacilitatorError::AllFailed(errors.join("; ")))
    }

    /// Posts the envelope to each facilitator's `/settle` in order, accepting the first 2xx
    /// response that carries a non-empty transaction hash.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorError> {
        if self.facilitators.is_empty() {
            return Err(FacilitatorError::NoFacilitatorsConfigured);
        }
        let body = FacilitatorRequest {
            x402_version: PaymentPayload::SUPPORTED_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        };
        let mut errors = Vec::new();
        for base_url in &self.facilitators {
            let url = format!("{}/settle", base_url.trim_end_matches('/'));
            match self
                .http
                .post(&url)
                .timeout(SETTLE_TIMEOUT)
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    match response.json::<SettleResponse>().await {
                        Ok(parsed) if parsed.success && parsed.transaction_hash().is_some() => {
                            return Ok(parsed);
                        }
                        Ok(_) => {
                            tracing::warn!(facilitator = %base_url, "facilitator settle returned no transaction hash");
                            errors.push(format!("{base_url}: no transaction hash"));
                        }
                        Err(e) => {
                            tracing::warn!(facilitator = %base_url, error = %e, "facilitator settle response malformed");
                            errors.push(format!("{base_url}: {e}"));
                        }
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    tracing::warn!(facilitator = %base_url, %status, "facilitator settle call rejected");
                    errors.push(format!("{base_url}: status {status}"));
                }
                Err(e) => {
                    tracing::warn!(facilitator = %base_url, error = %e, "facilitator settle call failed");
                    errors.push(format!("{base_url}: {e}"));
                }
            }
        }
        Err(FacilitatorError::AllFailed(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_facilitator_list_is_rejected_up_front() {
        let client = FacilitatorClient::new(vec![]);
        assert!(matches!(
            tokio_test_block_on(client.verify(&dummy_payload(), &dummy_requirements())),
            Err(FacilitatorError::NoFacilitatorsConfigured)
        ));
    }

    fn dummy_payload() -> PaymentPayload {
        use crate::types::{ExactPayload, TransferAuthorization};
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".into(),
            network: "eip155:8453".into(),
            payload: ExactPayload {
                signature: "0x00".into(),
                authorization: TransferAuthorization {
                    from: "0x0000000000000000000000000000000000000001".parse().unwrap(),
                    to: "0x0000000000000000000000000000000000000002".parse().unwrap(),
                    value: alloy_primitives::U256::from(1u64),
                    valid_after: 0,
                    valid_before: 1,
                    nonce: "0x01".into(),
                },
            },
        }
    }

    fn dummy_requirements() -> PaymentRequirements {
        use crate::types::PaymentRequirementsExtra;
        PaymentRequirements {
            scheme: "exact".into(),
            network: "eip155:8453".into(),
            max_amount_required: alloy_primitives::U256::from(1u64),
            resource: "ar://abc".into(),
            pay_to: "0x0000000000000000000000000000000000000002".parse().unwrap(),
            asset: "0x0000000000000000000000000000000000000003".parse().unwrap(),
            max_timeout_seconds: 3600,
            extra: PaymentRequirementsExtra {
                name: "USD Coin".into(),
                version: "2".into(),
            },
        }
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }
}
