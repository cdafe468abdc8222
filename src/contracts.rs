// src/contracts.rs
//! Static addresses of the contracts this crate talks to.
//!
//! Splits V2 is deployed through CREATE2, so factories and split
//! implementations share one address on every supported chain.

use ethers::types::{Address, H160};
use hex_literal::hex;

use crate::error::ConfigError;

pub const PUSH_FACTORY_ADDRESS: Address = H160(hex!("8E8eB0cC6AE34A38B67D5Cf91ACa38f60bc3Ecf4"));
pub const PULL_FACTORY_ADDRESS: Address = H160(hex!("6B9118074aB15142d7524E8c4ea8f62A3Bdb98f1"));
pub const PUSH_SPLIT_ADDRESS: Address = H160(hex!("1e2086A7e84a32482ac03000D56925F607CCB708"));
pub const PULL_SPLIT_ADDRESS: Address = H160(hex!("98254AeDb6B2c30b70483064367f0BA24ca86244"));

pub const ENTRY_POINT_V07: Address = H160(hex!("0000000071727De22E5E9d8BAf0edAc6f37da032"));

/// ERC-4337 EntryPoint v0.8, the first version that understands EIP-7702 senders.
pub const ENTRY_POINT_V08: Address = H160(hex!("4337084D9E255Ff0702461CF8895CE9E3b5Ff108"));

/// Simple7702Account, the code the operator EOA delegates to.
pub const SIMPLE_7702_ACCOUNT: Address = H160(hex!("e6Cae83BdE06E4c305530e199D7217f42808555B"));

/// Pseudo-factory signalling an EIP-7702 sender in `initCode`.
pub const EIP7702_FACTORY_MARKER: Address = H160(hex!("7702000000000000000000000000000000000000"));

/// Native token pseudo-address used by Splits for ETH/MATIC distributions.
pub const NATIVE_TOKEN: Address = H160(hex!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE"));

pub const SUPPORTED_CHAINS: &[u64] = &[
    1,          // Ethereum
    10,         // Optimism
    56,         // BSC
    100,        // Gnosis
    137,        // Polygon
    360,        // Shape
    480,        // World Chain
    2020,       // Ronin
    8453,       // Base
    42_161,     // Arbitrum
    42_220,     // Celo
    98_866,     // Plume
    7_777_777,  // Zora
    11_155_111, // Sepolia
    9998,       // ScionX testnet
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    Push,
    Pull,
}

pub fn is_supported(chain_id: u64) -> bool {
    SUPPORTED_CHAINS.contains(&chain_id)
}

pub fn factory_address(kind: SplitKind, chain_id: u64) -> Result<Address, ConfigError> {
    if !is_supported(chain_id) {
        return Err(ConfigError::UnsupportedChain(chain_id));
    }
    Ok(match kind {
        SplitKind::Push => PUSH_FACTORY_ADDRESS,
        SplitKind::Pull => PULL_FACTORY_ADDRESS,
    })
}

pub fn split_implementation(kind: SplitKind, chain_id: u64) -> Result<Address, ConfigError> {
    if !is_supported(chain_id) {
        return Err(ConfigError::UnsupportedChain(chain_id));
    }
    Ok(match kind {
        SplitKind::Push => PUSH_SPLIT_ADDRESS,
        SplitKind::Pull => PULL_SPLIT_ADDRESS,
    })
}
