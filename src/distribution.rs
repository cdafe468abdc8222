// src/distribution.rs
use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::{Address, Log, H256, U256, U64};
use ethers::utils::{format_units, keccak256};
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::encoding::{encode_call, wrap_execute};
use crate::error::SplitError;
use crate::split::SplitParams;
use crate::sponsor::SponsoredDeployer;

pub const DISTRIBUTE_SIGNATURE: &str =
    "distribute((address[],uint256[],uint256,uint16),address,address)";
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

const DISTRIBUTE_GAS_LIMIT: u64 = 200_000;
/// Payout tokens are USDC-style stablecoins.
const TOKEN_DECIMALS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    pub split_address: Address,
    pub params: SplitParams,
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub value_formatted: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionResult {
    pub transaction_hash: H256,
    pub block_number: Option<U64>,
    pub user_op_hash: Option<H256>,
    pub transfers: Vec<Transfer>,
    pub sponsored: bool,
}

pub struct DistributionService {
    operator: Address,
    chain: Arc<dyn ChainClient>,
    sponsor: Option<Arc<SponsoredDeployer>>,
}

impl DistributionService {
    pub fn new(operator: Address, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            operator,
            chain,
            sponsor: None,
        }
    }

    pub fn with_sponsor(mut self, sponsor: Arc<SponsoredDeployer>) -> Self {
        self.sponsor = Some(sponsor);
        self
    }

    /// Pushes the split's `token` balance out to its recipients, with the
    /// operator collecting the distribution incentive.
    pub async fn distribute(&self, request: &DistributionRequest) -> Result<DistributionResult, SplitError> {
        if request.params.recipients.len() != request.params.allocations.len() {
            return Err(SplitError::Validation(
                "Recipients and allocations must have the same length".to_string(),
            ));
        }
        let call = encode_call(
            DISTRIBUTE_SIGNATURE,
            &[
                request.params.to_token(),
                Token::Address(request.token),
                Token::Address(self.operator),
            ],
        );

        let result = match &self.sponsor {
            Some(sponsor) => {
                let deployment = sponsor.deploy(wrap_execute(request.split_address, call)).await?;
                if !deployment.receipt.success {
                    return Err(SplitError::TransactionFailed(deployment.transaction_hash));
                }
                DistributionResult {
                    transaction_hash: deployment.transaction_hash,
                    block_number: deployment.block_number,
                    user_op_hash: Some(deployment.user_op_hash),
                    transfers: decode_transfers(&deployment.receipt.logs, request.token),
                    sponsored: true,
                }
            }
            None => {
                let receipt = self
                    .chain
                    .send_transaction(request.split_address, call, U256::from(DISTRIBUTE_GAS_LIMIT))
                    .await?;
                if receipt.status != Some(U64::one()) {
                    warn!(tx_hash = ?receipt.transaction_hash, "distribution reverted");
                    return Err(SplitError::TransactionFailed(receipt.transaction_hash));
                }
                DistributionResult {
                    transaction_hash: receipt.transaction_hash,
                    block_number: receipt.block_number,
                    user_op_hash: None,
                    transfers: decode_transfers(&receipt.logs, request.token),
                    sponsored: false,
                }
            }
        };

        info!(
            split = ?request.split_address,
            tx_hash = ?result.transaction_hash,
            transfers = result.transfers.len(),
            "distribution confirmed"
        );
        Ok(result)
    }
}

/// ERC-20 `Transfer` events emitted by `token`. Logs from other contracts
/// and malformed entries are skipped.
pub fn decode_transfers(logs: &[Log], token: Address) -> Vec<Transfer> {
    let topic = H256::from(keccak256(TRANSFER_EVENT_SIGNATURE));
    logs.iter()
        .filter(|log| log.address == token && log.topics.first() == Some(&topic))
        .filter_map(|log| {
            if log.topics.len() != 3 || log.data.len() < 32 {
                debug!(tx_hash = ?log.transaction_hash, "skipping malformed transfer log");
                return None;
            }
            let value = U256::from_big_endian(&log.data[..32]);
            Some(Transfer {
                from: Address::from(log.topics[1]),
                to: Address::from(log.topics[2]),
                value,
                value_formatted: format_units(value, TOKEN_DECIMALS).ok()?,
            })
        })
        .collect()
}
