// src/chain.rs
use async_trait::async_trait;
use ethers::abi::{decode, ParamType, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
    TransactionReceipt, TransactionRequest, U256,
};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::encoding::encode_call;
use crate::error::{ChainError, ConfigError};

pub const GET_NONCE_SIGNATURE: &str = "getNonce(address,uint192)";

const GWEI: u64 = 1_000_000_000;

/// Read and write access to the base chain for one operator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Transaction count (EOA nonce) of `address` at the latest block.
    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError>;

    /// Read-only `eth_call`.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Signs and sends a transaction from the operator, waiting for its receipt.
    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        gas_limit: U256,
    ) -> Result<TransactionReceipt, ChainError>;
}

/// Fee caps for transactions the operator pays for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl Default for DirectFees {
    fn default() -> Self {
        Self {
            max_fee_per_gas: U256::from(50 * GWEI),
            max_priority_fee_per_gas: U256::from(30 * GWEI),
        }
    }
}

pub struct EthersChainClient {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    fees: DirectFees,
}

impl EthersChainClient {
    pub fn new(rpc_url: &str, wallet: LocalWallet) -> Result<Self, ConfigError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ConfigError::InvalidRpcUrl(format!("{rpc_url}: {e}")))?;
        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            fees: DirectFees::default(),
        })
    }

    pub fn with_fees(mut self, fees: DirectFees) -> Self {
        self.fees = fees;
        self
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError> {
        self.client
            .get_transaction_count(address, None)
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.client
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        gas_limit: U256,
    ) -> Result<TransactionReceipt, ChainError> {
        let tx = Eip1559TransactionRequest::new()
            .to(to)
            .data(data)
            .value(0)
            .gas(gas_limit)
            .max_fee_per_gas(self.fees.max_fee_per_gas)
            .max_priority_fee_per_gas(self.fees.max_priority_fee_per_gas);

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        info!(?tx_hash, "transaction sent");

        pending
            .await
            .map_err(|e| ChainError::Provider(e.to_string()))?
            .ok_or_else(|| ChainError::Provider(format!("transaction {tx_hash:?} dropped")))
    }
}

/// Reads the sender's entry point nonce for key 0.
///
/// Never fails: a failed read degrades to nonce 0, which the entry point
/// accepts for a fresh sender and rejects as a replay otherwise.
pub async fn resolve_entry_point_nonce<C>(chain: &C, entry_point: Address, sender: Address) -> U256
where
    C: ChainClient + ?Sized,
{
    let data = encode_call(
        GET_NONCE_SIGNATURE,
        &[Token::Address(sender), Token::Uint(U256::zero())],
    );

    match chain.call(entry_point, data).await.and_then(|raw| decode_uint(&raw)) {
        Ok(nonce) => {
            debug!(%nonce, ?sender, "nonce resolved");
            nonce
        }
        Err(e) => {
            warn!(error = %e, ?sender, "failed to read entry point nonce, falling back to 0");
            U256::zero()
        }
    }
}

pub(crate) fn decode_uint(raw: &[u8]) -> Result<U256, ChainError> {
    match decode(&[ParamType::Uint(256)], raw)
        .map_err(|e| ChainError::Decode(e.to_string()))?
        .as_slice()
    {
        [Token::Uint(value)] => Ok(*value),
        other => Err(ChainError::Decode(format!("expected uint256, got {other:?}"))),
    }
}
