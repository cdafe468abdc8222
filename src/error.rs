// src/error.rs
use ethers::types::H256;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Operator key must be provided")]
    MissingOperatorKey,

    #[error("Invalid operator key: {0}")]
    InvalidOperatorKey(String),

    #[error("RPC URL for chain_id {0} not configured")]
    MissingRpcUrl(u64),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid bytes32 value: {0}")]
    InvalidBytes32(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Ethereum provider error: {0}")]
    Provider(String),

    #[error("Malformed call result: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundlerError {
    /// Transport or JSON-RPC error, message kept as reported upstream.
    #[error("{0}")]
    Rpc(String),

    #[error("Unexpected bundler response: {0}")]
    Decode(String),
}

impl BundlerError {
    pub fn message(&self) -> &str {
        match self {
            Self::Rpc(msg) | Self::Decode(msg) => msg,
        }
    }
}

/// Terminal failures of the sponsored pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SponsorError {
    #[error("Gas price fetch failed: {0}")]
    GasPrice(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimate(String),

    #[error("{0}")]
    Sponsorship(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("{0}")]
    Submission(String),

    /// Not a failure: the operation may still land, the outcome is unknown.
    #[error("Could not confirm user operation {user_op_hash:?} after {attempts} attempts")]
    ConfirmationTimeout { user_op_hash: H256, attempts: u32 },
}

#[derive(Error, Debug)]
pub enum SplitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Sponsored deployment failed: {0}")]
    Sponsor(#[from] SponsorError),

    #[error("{0}")]
    Validation(String),

    #[error("TX failed: {0:?}")]
    TransactionFailed(H256),
}
