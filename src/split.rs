// src/split.rs
use ethers::abi::Token;
use ethers::types::{Address, U256};
use rand::RngCore;

use crate::encoding::parse_address;
use crate::error::SplitError;

/// Allocations are expressed in millionths of the total.
pub const PERCENTAGE_SCALE: u64 = 1_000_000;
/// Distributor fee percent to on-chain incentive units.
pub const FEE_SCALE: f64 = 10_000.0;

const TOTAL_TOLERANCE: std::ops::RangeInclusive<f64> = 99.9..=100.1;
const FEE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub address: String,
    pub percent_allocation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub recipients: Vec<Recipient>,
    pub salt: Option<String>,
    pub distributor_fee_percent: f64,
}

impl SplitConfig {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients,
            salt: None,
            distributor_fee_percent: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), SplitError> {
        if self.recipients.is_empty() {
            return Err(SplitError::Validation("Recipients required".to_string()));
        }
        for recipient in &self.recipients {
            if recipient.address.trim().is_empty() {
                return Err(SplitError::Validation(
                    "Recipient address is required".to_string(),
                ));
            }
            parse_address(&recipient.address).map_err(|e| {
                SplitError::Validation(format!("Invalid Ethereum address format: {e}"))
            })?;
        }

        let total: f64 = self.recipients.iter().map(|r| r.percent_allocation).sum();
        if !TOTAL_TOLERANCE.contains(&total) {
            return Err(SplitError::Validation("Total must be ~100%".to_string()));
        }
        if !FEE_RANGE.contains(&self.distributor_fee_percent) {
            return Err(SplitError::Validation(
                "Distributor fee must be 0-10%".to_string(),
            ));
        }
        Ok(())
    }
}

/// The `(address[],uint256[],uint256,uint16)` tuple Splits V2 takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitParams {
    pub recipients: Vec<Address>,
    pub allocations: Vec<U256>,
    pub total_allocation: U256,
    pub distribution_incentive: u16,
}

impl SplitParams {
    pub fn new(recipients: Vec<Address>, allocations: Vec<U256>, distribution_incentive: u16) -> Self {
        let total_allocation = allocations.iter().fold(U256::zero(), |acc, a| acc + *a);
        Self {
            recipients,
            allocations,
            total_allocation,
            distribution_incentive,
        }
    }

    pub fn from_config(config: &SplitConfig) -> Result<Self, SplitError> {
        let recipients = config
            .recipients
            .iter()
            .map(|r| parse_address(&r.address))
            .collect::<Result<Vec<_>, _>>()?;
        let allocations = config
            .recipients
            .iter()
            .map(|r| U256::from(scaled_allocation(r.percent_allocation)))
            .collect();
        Ok(Self::new(
            recipients,
            allocations,
            scaled_fee(config.distributor_fee_percent)?,
        ))
    }

    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Array(self.recipients.iter().copied().map(Token::Address).collect()),
            Token::Array(self.allocations.iter().copied().map(Token::Uint).collect()),
            Token::Uint(self.total_allocation),
            Token::Uint(U256::from(self.distribution_incentive)),
        ])
    }
}

pub fn scaled_allocation(percent: f64) -> u64 {
    (percent * PERCENTAGE_SCALE as f64 / 100.0).round() as u64
}

pub fn scaled_fee(percent: f64) -> Result<u16, SplitError> {
    let scaled = (percent * FEE_SCALE).round();
    if scaled < 0.0 || scaled > u16::MAX as f64 {
        return Err(SplitError::Validation(format!(
            "Distributor fee {percent}% does not fit the on-chain incentive field"
        )));
    }
    Ok(scaled as u16)
}

/// Fresh 32 byte salt for a deterministic deployment.
pub fn random_salt() -> String {
    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);
    format!("0x{}", hex::encode(salt))
}
