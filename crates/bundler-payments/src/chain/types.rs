//! Wire format types for EVM chain interactions: checksummed addresses, decimal-string
//! `U256` amounts, and CAIP-2 chain references.

use alloy_primitives::{Address, U256, hex};
use bundler_types::util::money_amount::{MoneyAmount, MoneyAmountParseError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Mul;
use std::str::FromStr;

/// An Ethereum address that serializes with EIP-55 checksum encoding, matching the
/// `payTo`/`from`/`to` fields of the x402 wire format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChecksummedAddress(pub Address);

impl FromStr for ChecksummedAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address::from_str(s)?;
        Ok(Self(address))
    }
}

impl Display for ChecksummedAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl Serialize for ChecksummedAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_checksum(None))
    }
}

impl<'de> Deserialize<'de> for ChecksummedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<ChecksummedAddress> for Address {
    fn from(value: ChecksummedAddress) -> Self {
        value.0
    }
}

impl From<Address> for ChecksummedAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl PartialEq<ChecksummedAddress> for Address {
    fn eq(&self, other: &ChecksummedAddress) -> bool {
        self.eq(&other.0)
    }
}

/// Serializes a `U256` as a decimal string, matching the x402 wire format's requirement
/// that numeric authorization fields be strings.
pub mod decimal_u256 {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}

/// CAIP-2 namespace for EVM-compatible chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// A numeric chain ID for EVM networks (e.g. `8453` for Base), convertible to/from the
/// `"eip155:8453"` CAIP-2 string carried on the wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Eip155ChainReference(u64);

#[derive(Debug, thiserror::Error)]
pub enum Eip155ChainReferenceFormatError {
    #[error("invalid namespace {0}, expected eip155")]
    InvalidNamespace(String),
    #[error("invalid eip155 chain reference {0}")]
    InvalidReference(String),
}

impl Eip155ChainReference {
    pub fn new(chain_id: u64) -> Self {
        Self(chain_id)
    }

    pub fn inner(&self) -> u64 {
        self.0
    }

    pub fn as_caip2(&self) -> String {
        format!("{EIP155_NAMESPACE}:{}", self.0)
    }
}

impl FromStr for Eip155ChainReference {
    type Err = Eip155ChainReferenceFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .ok_or_else(|| Eip155ChainReferenceFormatError::InvalidReference(s.to_string()))?;
        if namespace != EIP155_NAMESPACE {
            return Err(Eip155ChainReferenceFormatError::InvalidNamespace(namespace.to_string()));
        }
        let chain_id: u64 = reference
            .parse()
            .map_err(|_| Eip155ChainReferenceFormatError::InvalidReference(reference.to_string()))?;
        Ok(Eip155ChainReference(chain_id))
    }
}

impl Display for Eip155ChainReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_caip2())
    }
}

/// A stable-coin deployment on an EVM chain: its contract address, decimals, and EIP-712
/// domain parameters needed to verify an ERC-3009 `transferWithAuthorization` signature.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Eip155TokenDeployment {
    pub chain_reference: Eip155ChainReference,
    pub address: Address,
    pub decimals: u8,
    pub eip712_name: String,
    pub eip712_version: String,
}

impl Eip155TokenDeployment {
    /// Parses a human-readable amount string (e.g. config-supplied minimum quote floor)
    /// into the token's atomic unit, scaled by its decimal places.
    pub fn parse<V>(&self, v: V) -> Result<U256, MoneyAmountParseError>
    where
        V: TryInto<MoneyAmount>,
        MoneyAmountParseError: From<<V as TryInto<MoneyAmount>>::Error>,
    {
        let money_amount = v.try_into()?;
        let scale = money_amount.scale();
        let token_scale = self.decimals as u32;
        if scale > token_scale {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: token_scale,
            });
        }
        let scale_diff = token_scale - scale;
        let multiplier = U256::from(10).pow(U256::from(scale_diff));
        let digits = money_amount.mantissa();
        Ok(U256::from(digits).mul(multiplier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc_base() -> Eip155TokenDeployment {
        Eip155TokenDeployment {
            chain_reference: Eip155ChainReference::new(8453),
            address: Address::ZERO,
            decimals: 6,
            eip712_name: "USD Coin".into(),
            eip712_version: "2".into(),
        }
    }

    #[test]
    fn parses_whole_and_fractional_amounts() {
        let usdc = usdc_base();
        assert_eq!(usdc.parse("100").unwrap(), U256::from(100_000_000u64));
        assert_eq!(usdc.parse("1.50").unwrap(), U256::from(1_500_000u64));
        assert_eq!(usdc.parse("$10.50").unwrap(), U256::from(10_500_000u64));
    }

    #[test]
    fn rejects_precision_beyond_token_decimals() {
        let usdc = usdc_base();
        assert!(usdc.parse("1.2345678").is_err());
    }

    #[test]
    fn chain_reference_round_trips_through_caip2() {
        let base = Eip155ChainReference::new(8453);
        assert_eq!(base.as_caip2(), "eip155:8453");
        assert_eq!(Eip155ChainReference::from_str("eip155:8453").unwrap(), base);
    }
}
