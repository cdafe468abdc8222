// src/user_op.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use hex_literal::hex;
use serde::{Deserialize, Serialize};

use crate::contracts::{EIP7702_FACTORY_MARKER, ENTRY_POINT_V07, ENTRY_POINT_V08};
use crate::types::{Authorization, GasEstimate, GasPrice, SponsorshipData};

/// 65 byte ECDSA placeholder that recovers to some address, so bundler
/// simulation of the account's signature check does not revert.
pub const DUMMY_SIGNATURE: [u8; 65] = hex!(
    "fffffffffffffffffffffffffffffff000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

const PACKED_USER_OP_TYPE: &str = "PackedUserOperation(address sender,uint256 nonce,bytes initCode,bytes callData,bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,bytes paymasterAndData)";
const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const DOMAIN_NAME: &str = "ERC4337";
const DOMAIN_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointVersion {
    V0_7,
    V0_8,
}

impl EntryPointVersion {
    pub fn address(&self) -> Address {
        match self {
            Self::V0_7 => ENTRY_POINT_V07,
            Self::V0_8 => ENTRY_POINT_V08,
        }
    }
}

/// Unpacked (RPC form) user operation for EntryPoint v0.7 and later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
    #[serde(
        rename = "eip7702Auth",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization: Option<Authorization>,
}

impl UserOperation {
    pub fn apply_gas_price(&mut self, price: &GasPrice) {
        self.max_fee_per_gas = price.max_fee_per_gas;
        self.max_priority_fee_per_gas = price.max_priority_fee_per_gas;
    }

    pub fn apply_gas_estimate(&mut self, estimate: &GasEstimate) {
        self.pre_verification_gas = estimate.pre_verification_gas;
        self.verification_gas_limit = estimate.verification_gas_limit;
        self.call_gas_limit = estimate.call_gas_limit;
        if let Some(limit) = estimate.paymaster_verification_gas_limit {
            self.paymaster_verification_gas_limit = Some(limit);
        }
        if let Some(limit) = estimate.paymaster_post_op_gas_limit {
            self.paymaster_post_op_gas_limit = Some(limit);
        }
    }

    pub fn apply_sponsorship(&mut self, sponsorship: &SponsorshipData) {
        self.paymaster = Some(sponsorship.paymaster);
        self.paymaster_data = Some(sponsorship.paymaster_data.clone());
        self.paymaster_verification_gas_limit = Some(sponsorship.paymaster_verification_gas_limit);
        self.paymaster_post_op_gas_limit = Some(sponsorship.paymaster_post_op_gas_limit);
        if let Some(gas) = sponsorship.pre_verification_gas {
            self.pre_verification_gas = gas;
        }
        if let Some(gas) = sponsorship.verification_gas_limit {
            self.verification_gas_limit = gas;
        }
        if let Some(gas) = sponsorship.call_gas_limit {
            self.call_gas_limit = gas;
        }
    }

    /// `factory ‖ factoryData`, empty when the sender already exists.
    pub fn init_code(&self) -> Bytes {
        match self.factory {
            Some(factory) => {
                let mut init_code = factory.as_bytes().to_vec();
                if let Some(data) = &self.factory_data {
                    init_code.extend_from_slice(data);
                }
                Bytes::from(init_code)
            }
            None => Bytes::new(),
        }
    }

    pub fn paymaster_and_data(&self) -> Bytes {
        match self.paymaster {
            Some(paymaster) => {
                let mut data = paymaster.as_bytes().to_vec();
                data.extend_from_slice(&low_u128_be(
                    self.paymaster_verification_gas_limit.unwrap_or_default(),
                ));
                data.extend_from_slice(&low_u128_be(
                    self.paymaster_post_op_gas_limit.unwrap_or_default(),
                ));
                if let Some(paymaster_data) = &self.paymaster_data {
                    data.extend_from_slice(paymaster_data);
                }
                Bytes::from(data)
            }
            None => Bytes::new(),
        }
    }

    pub fn account_gas_limits(&self) -> [u8; 32] {
        concat_128(self.verification_gas_limit, self.call_gas_limit)
    }

    pub fn gas_fees(&self) -> [u8; 32] {
        concat_128(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    fn is_eip7702(&self) -> bool {
        self.factory == Some(EIP7702_FACTORY_MARKER)
    }
}

/// Assembles user operations for one sender on one chain and derives their
/// entry point hashes.
#[derive(Debug, Clone)]
pub struct UserOperationBuilder {
    sender: Address,
    chain_id: u64,
}

impl UserOperationBuilder {
    pub fn new(sender: Address, chain_id: u64) -> Self {
        Self { sender, chain_id }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Initial operation: gas, fee and paymaster fields unset, signature a
    /// placeholder until the operation is signed.
    pub fn build(
        &self,
        call_data: Bytes,
        nonce: U256,
        authorization: Option<Authorization>,
    ) -> UserOperation {
        let (factory, factory_data) = match authorization {
            Some(_) => (Some(EIP7702_FACTORY_MARKER), Some(Bytes::new())),
            None => (None, None),
        };

        UserOperation {
            sender: self.sender,
            nonce,
            factory,
            factory_data,
            call_data,
            call_gas_limit: U256::zero(),
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
            signature: Bytes::from(DUMMY_SIGNATURE.to_vec()),
            authorization,
        }
    }

    /// Hash the entry point recomputes on-chain and the account verifies
    /// the signature against.
    pub fn compute_hash(&self, op: &UserOperation, version: EntryPointVersion) -> H256 {
        hash_user_operation(op, version, self.chain_id)
    }
}

pub fn hash_user_operation(op: &UserOperation, version: EntryPointVersion, chain_id: u64) -> H256 {
    let entry_point = version.address();
    match version {
        EntryPointVersion::V0_7 => {
            let packed = keccak256(encode(&packed_fields(op, keccak256(op.init_code()))));
            keccak256(encode(&[
                Token::FixedBytes(packed.to_vec()),
                Token::Address(entry_point),
                Token::Uint(chain_id.into()),
            ]))
            .into()
        }
        EntryPointVersion::V0_8 => {
            let mut fields = vec![Token::FixedBytes(
                keccak256(PACKED_USER_OP_TYPE.as_bytes()).to_vec(),
            )];
            fields.extend(packed_fields(op, eip7702_init_code_hash(op)));
            let struct_hash = keccak256(encode(&fields));

            let mut digest = Vec::with_capacity(66);
            digest.extend_from_slice(&[0x19, 0x01]);
            digest.extend_from_slice(&domain_separator(chain_id, entry_point));
            digest.extend_from_slice(&struct_hash);
            keccak256(digest).into()
        }
    }
}

fn packed_fields(op: &UserOperation, init_code_hash: [u8; 32]) -> Vec<Token> {
    vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(init_code_hash.to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::FixedBytes(op.account_gas_limits().to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees().to_vec()),
        Token::FixedBytes(keccak256(op.paymaster_and_data()).to_vec()),
    ]
}

// The v0.8 entry point hashes a 7702 init code with the delegate address
// in place of the marker.
fn eip7702_init_code_hash(op: &UserOperation) -> [u8; 32] {
    let init_code = op.init_code();
    match (&op.authorization, op.is_eip7702()) {
        (Some(authorization), true) => {
            let mut substituted = authorization.address.as_bytes().to_vec();
            substituted.extend_from_slice(&init_code[20..]);
            keccak256(substituted)
        }
        _ => keccak256(init_code),
    }
}

fn domain_separator(chain_id: u64, entry_point: Address) -> [u8; 32] {
    keccak256(encode(&[
        Token::FixedBytes(keccak256(EIP712_DOMAIN_TYPE.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_NAME.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_VERSION.as_bytes()).to_vec()),
        Token::Uint(chain_id.into()),
        Token::Address(entry_point),
    ]))
}

fn low_u128_be(value: U256) -> [u8; 16] {
    value.low_u128().to_be_bytes()
}

fn concat_128(high: U256, low: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&low_u128_be(high));
    out[16..].copy_from_slice(&low_u128_be(low));
    out
}
