// src/encoding.rs
//! Contract call encoding.
//!
//! Every call the operator makes through its delegated account is an
//! `execute(target, 0, inner)` call on the account itself, where `inner`
//! is the selector plus ABI-encoded arguments of the real contract call.

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::{id, to_checksum};

use crate::error::EncodingError;

pub const EXECUTE_SIGNATURE: &str = "execute(address,uint256,bytes)";

/// First four bytes of the keccak hash of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(args));
    Bytes::from(data)
}

/// Wraps an inner call in the smart account's generic executor.
pub fn wrap_execute(target: Address, inner: Bytes) -> Bytes {
    encode_call(
        EXECUTE_SIGNATURE,
        &[
            Token::Address(target),
            Token::Uint(U256::zero()),
            Token::Bytes(inner.to_vec()),
        ],
    )
}

pub fn encode_execute(target: Address, signature: &str, args: &[Token]) -> Bytes {
    wrap_execute(target, encode_call(signature, args))
}

/// Parses a `0x`-prefixed 20 byte hex address.
///
/// Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_address(value: &str) -> Result<Address, EncodingError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(EncodingError::InvalidAddress(value.to_string()));
    }
    let bytes = hex::decode(digits).map_err(|_| EncodingError::InvalidAddress(value.to_string()))?;
    let address = Address::from_slice(&bytes);

    let mixed_case = digits.chars().any(|c| c.is_ascii_lowercase())
        && digits.chars().any(|c| c.is_ascii_uppercase());
    if mixed_case && to_checksum(&address, None)[2..] != *digits {
        return Err(EncodingError::InvalidAddress(value.to_string()));
    }
    Ok(address)
}

/// Parses up to 32 bytes of hex, left-padding with zeros.
pub fn parse_bytes32(value: &str) -> Result<[u8; 32], EncodingError> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.len() > 64 {
        return Err(EncodingError::InvalidBytes32(value.to_string()));
    }
    let padded = format!("{digits:0>64}");
    let bytes =
        hex::decode(padded).map_err(|_| EncodingError::InvalidBytes32(value.to_string()))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
