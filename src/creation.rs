// src/creation.rs
use std::sync::Arc;

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256, U64};
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::contracts::{factory_address, SplitKind};
use crate::encoding::{encode_call, parse_bytes32, wrap_execute};
use crate::error::{ChainError, SplitError};
use crate::split::{random_salt, SplitConfig, SplitParams};
use crate::sponsor::SponsoredDeployer;

pub const CREATE_SPLIT_SIGNATURE: &str =
    "createSplitDeterministic((address[],uint256[],uint256,uint16),address,address,bytes32)";
pub const IS_DEPLOYED_SIGNATURE: &str = "isDeployed((address[],uint256[],uint256,uint16),address,bytes32)";
pub const PREDICT_ADDRESS_SIGNATURE: &str =
    "predictDeterministicAddress((address[],uint256[],uint256,uint16),address,bytes32)";

const CREATE_GAS_LIMIT: u64 = 300_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationResult {
    pub split_address: Address,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<U64>,
    pub user_op_hash: Option<H256>,
    pub already_existed: bool,
    pub sponsored: bool,
}

/// Deploys push splits through the factory, sponsored when a deployer
/// session is attached and paid by the operator otherwise.
pub struct CreationService {
    chain_id: u64,
    operator: Address,
    chain: Arc<dyn ChainClient>,
    sponsor: Option<Arc<SponsoredDeployer>>,
}

impl CreationService {
    pub fn new(chain_id: u64, operator: Address, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain_id,
            operator,
            chain,
            sponsor: None,
        }
    }

    pub fn with_sponsor(mut self, sponsor: Arc<SponsoredDeployer>) -> Self {
        self.sponsor = Some(sponsor);
        self
    }

    pub async fn create(&self, config: &SplitConfig) -> Result<CreationResult, SplitError> {
        config.validate()?;
        let factory = factory_address(SplitKind::Push, self.chain_id)?;
        let params = SplitParams::from_config(config)?;
        let salt = match &config.salt {
            Some(salt) => parse_bytes32(salt)?,
            None => parse_bytes32(&random_salt())?,
        };

        let (existing, deployed) = self.is_deployed(factory, &params, salt).await?;
        if deployed {
            info!(split = ?existing, "split already deployed");
            return Ok(CreationResult {
                split_address: existing,
                transaction_hash: None,
                block_number: None,
                user_op_hash: None,
                already_existed: true,
                sponsored: false,
            });
        }
        let split_address = self.predict_address(factory, &params, salt).await?;

        let create_call = encode_call(
            CREATE_SPLIT_SIGNATURE,
            &[
                params.to_token(),
                Token::Address(self.operator),
                Token::Address(self.operator),
                Token::FixedBytes(salt.to_vec()),
            ],
        );

        match &self.sponsor {
            Some(sponsor) => {
                let deployment = sponsor.deploy(wrap_execute(factory, create_call)).await?;
                if !deployment.receipt.success {
                    return Err(SplitError::TransactionFailed(deployment.transaction_hash));
                }
                info!(split = ?split_address, tx_hash = ?deployment.transaction_hash, "split created (sponsored)");
                Ok(CreationResult {
                    split_address,
                    transaction_hash: Some(deployment.transaction_hash),
                    block_number: deployment.block_number,
                    user_op_hash: Some(deployment.user_op_hash),
                    already_existed: false,
                    sponsored: true,
                })
            }
            None => {
                let receipt = self
                    .chain
                    .send_transaction(factory, create_call, U256::from(CREATE_GAS_LIMIT))
                    .await?;
                if receipt.status != Some(U64::one()) {
                    warn!(tx_hash = ?receipt.transaction_hash, "split creation reverted");
                    return Err(SplitError::TransactionFailed(receipt.transaction_hash));
                }
                info!(split = ?split_address, tx_hash = ?receipt.transaction_hash, "split created");
                Ok(CreationResult {
                    split_address,
                    transaction_hash: Some(receipt.transaction_hash),
                    block_number: receipt.block_number,
                    user_op_hash: None,
                    already_existed: false,
                    sponsored: false,
                })
            }
        }
    }

    async fn is_deployed(
        &self,
        factory: Address,
        params: &SplitParams,
        salt: [u8; 32],
    ) -> Result<(Address, bool), SplitError> {
        let raw = self
            .chain
            .call(factory, self.lookup_call(IS_DEPLOYED_SIGNATURE, params, salt))
            .await?;
        match decode(&[ParamType::Address, ParamType::Bool], &raw)
            .map_err(|e| ChainError::Decode(e.to_string()))?
            .as_slice()
        {
            [Token::Address(split), Token::Bool(deployed)] => Ok((*split, *deployed)),
            other => Err(ChainError::Decode(format!("isDeployed returned {other:?}")).into()),
        }
    }

    async fn predict_address(
        &self,
        factory: Address,
        params: &SplitParams,
        salt: [u8; 32],
    ) -> Result<Address, SplitError> {
        let raw = self
            .chain
            .call(factory, self.lookup_call(PREDICT_ADDRESS_SIGNATURE, params, salt))
            .await?;
        match decode(&[ParamType::Address], &raw)
            .map_err(|e| ChainError::Decode(e.to_string()))?
            .as_slice()
        {
            [Token::Address(split)] => Ok(*split),
            other => Err(ChainError::Decode(format!(
                "predictDeterministicAddress returned {other:?}"
            ))
            .into()),
        }
    }

    fn lookup_call(&self, signature: &str, params: &SplitParams, salt: [u8; 32]) -> Bytes {
        encode_call(
            signature,
            &[
                params.to_token(),
                Token::Address(self.operator),
                Token::FixedBytes(salt.to_vec()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use ethers::abi::encode;
    use ethers::types::TransactionReceipt;

    use super::*;
    use crate::chain::MockChainClient;
    use crate::contracts::PUSH_FACTORY_ADDRESS;
    use crate::encoding::selector;
    use crate::split::Recipient;

    const SALT: &str = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";

    fn config() -> SplitConfig {
        SplitConfig {
            recipients: vec![
                Recipient {
                    address: "0x1234567890123456789012345678901234567890".to_string(),
                    percent_allocation: 70.0,
                },
                Recipient {
                    address: "0x0987654321098765432109876543210987654321".to_string(),
                    percent_allocation: 30.0,
                },
            ],
            salt: Some(SALT.to_string()),
            distributor_fee_percent: 1.0,
        }
    }

    fn expect_lookups(chain: &mut MockChainClient, deployed: bool) {
        let split = Address::repeat_byte(0x5a);
        chain
            .expect_call()
            .withf(|to, data| *to == PUSH_FACTORY_ADDRESS && data[..4] == selector(IS_DEPLOYED_SIGNATURE))
            .times(1)
            .returning(move |_, _| {
                Ok(Bytes::from(encode(&[Token::Address(split), Token::Bool(deployed)])))
            });
        chain
            .expect_call()
            .withf(|_, data| data[..4] == selector(PREDICT_ADDRESS_SIGNATURE))
            .returning(move |_, _| Ok(Bytes::from(encode(&[Token::Address(split)]))));
    }

    #[tokio::test]
    async fn test_existing_split_short_circuits() {
        let mut chain = MockChainClient::new();
        expect_lookups(&mut chain, true);
        chain.expect_send_transaction().never();

        let service = CreationService::new(137, Address::repeat_byte(1), Arc::new(chain));
        let result = service.create(&config()).await.unwrap();
        assert!(result.already_existed);
        assert_eq!(result.split_address, Address::repeat_byte(0x5a));
        assert_eq!(result.transaction_hash, None);
    }

    #[tokio::test]
    async fn test_direct_creation() {
        let operator = Address::repeat_byte(1);
        let mut chain = MockChainClient::new();
        expect_lookups(&mut chain, false);
        chain
            .expect_send_transaction()
            .withf(move |to, data, gas| {
                let args = decode(
                    &[
                        ParamType::Tuple(vec![
                            ParamType::Array(Box::new(ParamType::Address)),
                            ParamType::Array(Box::new(ParamType::Uint(256))),
                            ParamType::Uint(256),
                            ParamType::Uint(16),
                        ]),
                        ParamType::Address,
                        ParamType::Address,
                        ParamType::FixedBytes(32),
                    ],
                    &data[4..],
                )
                .unwrap();
                *to == PUSH_FACTORY_ADDRESS
                    && data[..4] == selector(CREATE_SPLIT_SIGNATURE)
                    && *gas == U256::from(CREATE_GAS_LIMIT)
                    && args[1] == Token::Address(operator)
                    && args[3] == Token::FixedBytes(parse_bytes32(SALT).unwrap().to_vec())
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(TransactionReceipt {
                    transaction_hash: H256::repeat_byte(0xcc),
                    block_number: Some(U64::from(77)),
                    status: Some(U64::one()),
                    ..Default::default()
                })
            });

        let service = CreationService::new(137, operator, Arc::new(chain));
        let result = service.create(&config()).await.unwrap();
        assert!(!result.already_existed);
        assert!(!result.sponsored);
        assert_eq!(result.split_address, Address::repeat_byte(0x5a));
        assert_eq!(result.transaction_hash, Some(H256::repeat_byte(0xcc)));
        assert_eq!(result.block_number, Some(U64::from(77)));
    }

    #[tokio::test]
    async fn test_reverted_creation_is_an_error() {
        let mut chain = MockChainClient::new();
        expect_lookups(&mut chain, false);
        chain.expect_send_transaction().returning(|_, _, _| {
            Ok(TransactionReceipt {
                transaction_hash: H256::repeat_byte(0xdd),
                status: Some(U64::zero()),
                ..Default::default()
            })
        });

        let service = CreationService::new(137, Address::repeat_byte(1), Arc::new(chain));
        let result = service.create(&config()).await;
        assert!(matches!(result, Err(SplitError::TransactionFailed(h)) if h == H256::repeat_byte(0xdd)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sponsored_creation_wraps_execute() {
        use crate::bundler::MockBundlerClient;
        use crate::chain::GET_NONCE_SIGNATURE;
        use crate::encoding::EXECUTE_SIGNATURE;
        use crate::types::{GasEstimate, GasPrice, GasPriceTiers, MinedTransaction, SponsorshipData, UserOperationReceipt};
        use ethers::signers::{LocalWallet, Signer};

        let wallet: LocalWallet = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
            .parse()
            .unwrap();
        let operator = wallet.address();

        let mut chain = MockChainClient::new();
        expect_lookups(&mut chain, false);
        chain
            .expect_call()
            .withf(|_, data| data[..4] == selector(GET_NONCE_SIGNATURE))
            .returning(|_, _| Ok(Bytes::from(encode(&[Token::Uint(U256::zero())]))));
        chain.expect_transaction_count().returning(|_| Ok(U256::zero()));
        chain.expect_send_transaction().never();
        let chain = Arc::new(chain);

        let mut bundler = MockBundlerClient::new();
        bundler.expect_gas_price().returning(|| {
            Ok(GasPriceTiers(
                [(
                    "standard".to_string(),
                    GasPrice {
                        max_fee_per_gas: U256::from(10),
                        max_priority_fee_per_gas: U256::from(1),
                    },
                )]
                .into_iter()
                .collect(),
            ))
        });
        bundler
            .expect_estimate_user_operation_gas()
            .returning(|_, _| Ok(GasEstimate::default()));
        bundler.expect_sponsor_user_operation().returning(|_, _, _| {
            Ok(SponsorshipData {
                paymaster: Address::repeat_byte(0x77),
                paymaster_data: Bytes::default(),
                paymaster_verification_gas_limit: U256::from(1),
                paymaster_post_op_gas_limit: U256::from(1),
                pre_verification_gas: None,
                verification_gas_limit: None,
                call_gas_limit: None,
            })
        });
        bundler
            .expect_send_user_operation()
            .withf(|op, _| {
                op.call_data[..4] == selector(EXECUTE_SIGNATURE)
                    && op.call_data[16..36] == PUSH_FACTORY_ADDRESS.as_bytes()[..]
            })
            .times(1)
            .returning(|_, _| Ok(H256::repeat_byte(0x44)));
        bundler.expect_user_operation_receipt().returning(|hash| {
            Ok(Some(UserOperationReceipt {
                user_op_hash: hash,
                success: false,
                reason: Some("0x".to_string()),
                logs: vec![],
                receipt: MinedTransaction {
                    transaction_hash: Some(H256::repeat_byte(0x45)),
                    block_number: Some(U64::from(5)),
                    block_hash: None,
                },
            }))
        });

        let sponsor = SponsoredDeployer::new(wallet, 137, chain.clone(), Arc::new(bundler));
        let service = CreationService::new(137, operator, chain).with_sponsor(Arc::new(sponsor));
        let result = service.create(&config()).await;
        assert!(matches!(result, Err(SplitError::TransactionFailed(h)) if h == H256::repeat_byte(0x45)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_network() {
        let chain = MockChainClient::new();
        let mut cfg = config();
        cfg.recipients.pop();

        let service = CreationService::new(137, Address::repeat_byte(1), Arc::new(chain));
        assert!(matches!(service.create(&cfg).await, Err(SplitError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unsupported_chain() {
        let service = CreationService::new(31337, Address::zero(), Arc::new(MockChainClient::new()));
        assert!(matches!(service.create(&config()).await, Err(SplitError::Config(_))));
    }
}
