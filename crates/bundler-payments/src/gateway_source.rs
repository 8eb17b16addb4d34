//! Production [`PriceSource`]: fetches the chain-native per-byte storage price and the
//! chain-unit-to-USD FX rate from the chain's HTTP gateway, an external collaborator the
//! admission service and the bundle-packer worker both depend on.

use serde::Deserialize;

use crate::pricing::{PriceSource, PricingError};

pub struct GatewayPriceSource {
    client: reqwest::Client,
    gateway_url: String,
}

impl GatewayPriceSource {
    pub fn new(gateway_url: String) -> Self {
        Self { client: reqwest::Client::new(), gateway_url }
    }
}

#[derive(Debug, Deserialize)]
struct PricePerByteResponse {
    price: u128,
}

#[derive(Debug, Deserialize)]
struct FxRateResponse {
    usd_micros_per_chain_unit: u128,
}

#[async_trait::async_trait]
impl PriceSource for GatewayPriceSource {
    async fn chain_unit_price_per_byte(&self) -> Result<u128, PricingError> {
        let url = format!("{}/price/1", self.gateway_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PricingError::ChainGateway(e.to_string()))?
            .json::<PricePerByteResponse>()
            .await
            .map_err(|e| PricingError::ChainGateway(e.to_string()))?;
        Ok(response.price)
    }

    async fn chain_unit_to_usd_micros(&self) -> Result<u128, PricingError> {
        let url = format!("{}/rates/chain-unit-usd", self.gateway_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PricingError::FxGateway(e.to_string()))?
            .json::<FxRateResponse>()
            .await
            .map_err(|e| PricingError::FxGateway(e.to_string()))?;
        Ok(response.usd_micros_per_chain_unit)
    }
}
