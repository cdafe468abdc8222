// src/types.rs
use std::collections::BTreeMap;

use ethers::types::{Address, Log, H256, U256, U64};
use serde::{Deserialize, Serialize};

use crate::error::BundlerError;

/// Signed EIP-7702 delegation, in the `eip7702Auth` wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Contract whose code the EOA delegates to.
    pub address: Address,
    pub chain_id: U256,
    pub nonce: U256,
    pub y_parity: U64,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Named fee tiers returned by the bundler (`slow`, `standard`, `fast`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GasPriceTiers(pub BTreeMap<String, GasPrice>);

impl GasPriceTiers {
    pub const PREFERRED_TIER: &'static str = "standard";

    /// Picks `standard`, falling back to the alphabetically first tier name
    /// for bundlers that name their tiers differently. Tiers are keyed in a
    /// `BTreeMap`, so the bundler's own response order is not kept.
    pub fn select(&self) -> Option<(&str, GasPrice)> {
        self.0
            .get_key_value(Self::PREFERRED_TIER)
            .or_else(|| self.0.iter().next())
            .map(|(name, price)| (name.as_str(), *price))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// Paymaster fields returned by `pm_sponsorUserOperation`.
///
/// The paymaster may re-estimate the account gas limits, in which case
/// those take precedence over the earlier estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipData {
    pub paymaster: Address,
    pub paymaster_data: ethers::types::Bytes,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    #[serde(default)]
    pub pre_verification_gas: Option<U256>,
    #[serde(default)]
    pub verification_gas_limit: Option<U256>,
    #[serde(default)]
    pub call_gas_limit: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipContext {
    pub sponsorship_policy_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyValidation {
    pub sponsorship_policy_id: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// The mined transaction that carried a user operation. Bundlers differ in
/// how much of it they report, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedTransaction {
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub block_hash: Option<H256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub receipt: MinedTransaction,
}

/// Successful outcome of the sponsored pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsoredDeployment {
    /// Falls back to the user operation hash when the bundler leaves the
    /// transaction hash out of its receipt.
    pub transaction_hash: H256,
    pub user_op_hash: H256,
    pub block_number: Option<U64>,
    pub receipt: UserOperationReceipt,
}

impl SponsoredDeployment {
    pub fn from_receipt(receipt: UserOperationReceipt) -> Self {
        Self {
            transaction_hash: receipt
                .receipt
                .transaction_hash
                .unwrap_or(receipt.user_op_hash),
            user_op_hash: receipt.user_op_hash,
            block_number: receipt.receipt.block_number,
            receipt,
        }
    }
}

pub(crate) fn decode_value<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, BundlerError> {
    serde_json::from_value(value).map_err(|e| BundlerError::Decode(e.to_string()))
}
