// src/sponsor.rs
//! Sponsored execution of a contract call through the operator's
//! EIP-7702 delegated account.
//!
//! The stages run strictly in order, each feeding the next:
//! authorization, nonce, build, price, estimate, sponsor, sign, submit,
//! confirm. Only confirmation is retried.

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use tracing::{debug, error, info, warn};

use crate::authorization::AuthorizationManager;
use crate::bundler::BundlerClient;
use crate::chain::{resolve_entry_point_nonce, ChainClient};
use crate::contracts::SIMPLE_7702_ACCOUNT;
use crate::error::SponsorError;
use crate::types::SponsoredDeployment;
use crate::user_op::{EntryPointVersion, UserOperation, UserOperationBuilder};

pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_RECEIPT_ATTEMPTS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: RECEIPT_POLL_INTERVAL,
            max_attempts: MAX_RECEIPT_ATTEMPTS,
        }
    }
}

/// A user operation in its final, signed form. Read-only, so nothing can
/// be changed after the signature was computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUserOperation {
    op: UserOperation,
    hash: H256,
}

impl SignedUserOperation {
    pub fn operation(&self) -> &UserOperation {
        &self.op
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }
}

/// One sponsored-deployment session: a single signer on a single chain.
///
/// The delegation authorization is created on first use and reused by
/// every later call on the same session.
pub struct SponsoredDeployer {
    wallet: LocalWallet,
    chain: Arc<dyn ChainClient>,
    bundler: Arc<dyn BundlerClient>,
    builder: UserOperationBuilder,
    authorization: AuthorizationManager,
    entry_point: EntryPointVersion,
    sponsorship_policy_id: Option<String>,
    confirmation: ConfirmationPolicy,
}

impl SponsoredDeployer {
    pub fn new(
        wallet: LocalWallet,
        chain_id: u64,
        chain: Arc<dyn ChainClient>,
        bundler: Arc<dyn BundlerClient>,
    ) -> Self {
        let sender = wallet.address();
        Self {
            authorization: AuthorizationManager::new(wallet.clone(), chain_id, SIMPLE_7702_ACCOUNT),
            builder: UserOperationBuilder::new(sender, chain_id),
            wallet,
            chain,
            bundler,
            entry_point: EntryPointVersion::V0_8,
            sponsorship_policy_id: None,
            confirmation: ConfirmationPolicy::default(),
        }
    }

    pub fn with_sponsorship_policy(mut self, policy_id: Option<String>) -> Self {
        self.sponsorship_policy_id = policy_id;
        self
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn sender(&self) -> Address {
        self.builder.sender()
    }

    /// Executes `call_data` from the operator account with gas paid by the
    /// paymaster, returning once the operation is mined.
    pub async fn deploy(&self, call_data: Bytes) -> Result<SponsoredDeployment, SponsorError> {
        let sender = self.sender();
        let entry_point = self.entry_point.address();
        info!(?sender, "starting sponsored deployment");

        let authorization = self.authorization.get_or_create(self.chain.as_ref()).await?;
        let nonce = resolve_entry_point_nonce(self.chain.as_ref(), entry_point, sender).await;

        let mut op = self.builder.build(call_data, nonce, Some(authorization));
        self.price(&mut op).await?;
        self.estimate(&mut op, entry_point).await?;
        self.sponsor(&mut op, entry_point).await?;

        let signed = self.sign(op)?;
        let user_op_hash = self.submit(&signed, entry_point).await?;
        wait_for_receipt(self.bundler.as_ref(), user_op_hash, self.confirmation).await
    }

    async fn price(&self, op: &mut UserOperation) -> Result<(), SponsorError> {
        let tiers = self
            .bundler
            .gas_price()
            .await
            .map_err(|e| SponsorError::GasPrice(e.message().to_string()))?;
        let (tier, price) = tiers
            .select()
            .ok_or_else(|| SponsorError::GasPrice("no fee tiers returned".to_string()))?;

        op.apply_gas_price(&price);
        info!(
            tier,
            max_fee_per_gas = %price.max_fee_per_gas,
            max_priority_fee_per_gas = %price.max_priority_fee_per_gas,
            "gas priced"
        );
        Ok(())
    }

    async fn estimate(&self, op: &mut UserOperation, entry_point: Address) -> Result<(), SponsorError> {
        let estimate = self
            .bundler
            .estimate_user_operation_gas(op, entry_point)
            .await
            .map_err(|e| SponsorError::GasEstimate(e.message().to_string()))?;

        op.apply_gas_estimate(&estimate);
        info!(
            call_gas_limit = %op.call_gas_limit,
            verification_gas_limit = %op.verification_gas_limit,
            pre_verification_gas = %op.pre_verification_gas,
            "gas estimated"
        );
        Ok(())
    }

    async fn sponsor(&self, op: &mut UserOperation, entry_point: Address) -> Result<(), SponsorError> {
        if let Some(policy_id) = &self.sponsorship_policy_id {
            // Advisory only: the sponsorship request below is authoritative.
            match self
                .bundler
                .validate_sponsorship_policies(op, entry_point, vec![policy_id.clone()])
                .await
            {
                Ok(accepted) if accepted.iter().any(|p| &p.sponsorship_policy_id == policy_id) => {
                    debug!(%policy_id, "sponsorship policy accepted");
                }
                Ok(_) => warn!(%policy_id, "sponsorship policy not accepted for this operation"),
                Err(e) => warn!(%policy_id, error = %e, "sponsorship policy validation failed"),
            }
        }

        let sponsorship = self
            .bundler
            .sponsor_user_operation(op, entry_point, self.sponsorship_policy_id.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "paymaster refused sponsorship");
                SponsorError::Sponsorship(e.message().to_string())
            })?;

        op.apply_sponsorship(&sponsorship);
        info!(paymaster = ?sponsorship.paymaster, "sponsored");
        Ok(())
    }

    /// Signs the fully merged operation. Consumes it so no field can be
    /// written after the hash is taken.
    fn sign(&self, mut op: UserOperation) -> Result<SignedUserOperation, SponsorError> {
        let hash = self.builder.compute_hash(&op, self.entry_point);
        let signature = self
            .wallet
            .sign_hash(hash)
            .map_err(|e| SponsorError::Signing(e.to_string()))?;
        op.signature = Bytes::from(signature.to_vec());
        info!(user_op_hash = ?hash, "signed");
        Ok(SignedUserOperation { op, hash })
    }

    async fn submit(
        &self,
        signed: &SignedUserOperation,
        entry_point: Address,
    ) -> Result<H256, SponsorError> {
        let user_op_hash = self
            .bundler
            .send_user_operation(signed.operation(), entry_point)
            .await
            .map_err(|e| SponsorError::Submission(e.message().to_string()))?;

        if user_op_hash != signed.hash() {
            warn!(
                ?user_op_hash,
                local_hash = ?signed.hash(),
                "bundler reported a different user operation hash"
            );
        }
        info!(?user_op_hash, "submitted");
        Ok(user_op_hash)
    }
}

/// Polls for the receipt of `user_op_hash`, sleeping `poll_interval`
/// between attempts.
///
/// Exhausting the attempts yields [`SponsorError::ConfirmationTimeout`]:
/// the operation may still be mined later.
pub async fn wait_for_receipt(
    bundler: &dyn BundlerClient,
    user_op_hash: H256,
    policy: ConfirmationPolicy,
) -> Result<SponsoredDeployment, SponsorError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!(attempt = attempts, ?user_op_hash, "poll attempt");

        match bundler.user_operation_receipt(user_op_hash).await {
            Ok(Some(receipt)) => {
                let deployment = SponsoredDeployment::from_receipt(receipt);
                info!(
                    tx_hash = ?deployment.transaction_hash,
                    block = ?deployment.block_number,
                    success = deployment.receipt.success,
                    "confirmed"
                );
                return Ok(deployment);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, attempt = attempts, "receipt lookup failed"),
        }

        if attempts >= max_attempts {
            warn!(?user_op_hash, attempts, "confirmation timed out");
            return Err(SponsorError::ConfirmationTimeout {
                user_op_hash,
                attempts,
            });
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use ethers::abi::{encode, Token};
    use ethers::types::{Signature, U256, U64};
    use tokio::time::Instant;

    use super::*;
    use crate::bundler::MockBundlerClient;
    use crate::chain::MockChainClient;
    use crate::contracts::ENTRY_POINT_V08;
    use crate::error::BundlerError;
    use crate::types::{
        GasEstimate, GasPrice, GasPriceTiers, MinedTransaction, SponsorshipData,
        UserOperationReceipt,
    };
    use crate::user_op::hash_user_operation;

    const KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const CHAIN_ID: u64 = 137;

    fn wallet() -> LocalWallet {
        KEY.parse().unwrap()
    }

    fn tiers() -> GasPriceTiers {
        let tier = |fee: u64| GasPrice {
            max_fee_per_gas: U256::from(fee),
            max_priority_fee_per_gas: U256::from(fee / 2),
        };
        GasPriceTiers(
            [
                ("slow".to_string(), tier(100)),
                ("standard".to_string(), tier(200)),
                ("fast".to_string(), tier(300)),
            ]
            .into_iter()
            .collect(),
        )
    }

    fn estimate() -> GasEstimate {
        GasEstimate {
            pre_verification_gas: U256::from(50_000),
            verification_gas_limit: U256::from(120_000),
            call_gas_limit: U256::from(80_000),
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
        }
    }

    fn sponsorship() -> SponsorshipData {
        SponsorshipData {
            paymaster: Address::repeat_byte(0x77),
            paymaster_data: Bytes::from(vec![0xaa; 8]),
            paymaster_verification_gas_limit: U256::from(40_000),
            paymaster_post_op_gas_limit: U256::from(1),
            pre_verification_gas: Some(U256::from(55_000)),
            verification_gas_limit: None,
            call_gas_limit: None,
        }
    }

    fn receipt(user_op_hash: H256, tx_hash: H256) -> UserOperationReceipt {
        UserOperationReceipt {
            user_op_hash,
            success: true,
            reason: None,
            logs: vec![],
            receipt: MinedTransaction {
                transaction_hash: Some(tx_hash),
                block_number: Some(U64::from(1234)),
                block_hash: None,
            },
        }
    }

    fn chain(eoa_nonce: u64) -> MockChainClient {
        let mut chain = MockChainClient::new();
        chain
            .expect_transaction_count()
            .times(1)
            .returning(move |_| Ok(U256::from(eoa_nonce)));
        chain
            .expect_call()
            .returning(|_, _| Ok(Bytes::from(encode(&[Token::Uint(U256::from(2))]))));
        chain
    }

    /// Bundler that succeeds at every stage and returns a receipt on the
    /// `receipt_on`-th poll (1-based).
    fn bundler(
        receipt_on: u32,
        polls: Arc<AtomicU32>,
        sent: Arc<Mutex<Vec<UserOperation>>>,
    ) -> MockBundlerClient {
        let mut bundler = MockBundlerClient::new();
        bundler.expect_gas_price().returning(|| Ok(tiers()));
        bundler
            .expect_estimate_user_operation_gas()
            .returning(|_, _| Ok(estimate()));
        bundler
            .expect_sponsor_user_operation()
            .returning(|_, _, _| Ok(sponsorship()));
        bundler
            .expect_send_user_operation()
            .withf(|_, ep| *ep == ENTRY_POINT_V08)
            .returning(move |op, _| {
                sent.lock().unwrap().push(op.clone());
                Ok(hash_user_operation(op, EntryPointVersion::V0_8, CHAIN_ID))
            });
        bundler.expect_user_operation_receipt().returning(move |hash| {
            let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < receipt_on {
                Ok(None)
            } else {
                Ok(Some(receipt(hash, H256::repeat_byte(0xab))))
            }
        });
        bundler
    }

    fn deployer(chain: MockChainClient, bundler: MockBundlerClient) -> SponsoredDeployer {
        SponsoredDeployer::new(wallet(), CHAIN_ID, Arc::new(chain), Arc::new(bundler))
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_reuses_authorization() {
        let polls = Arc::new(AtomicU32::new(0));
        let sent = Arc::new(Mutex::new(vec![]));
        // `chain(5)` allows exactly one EOA nonce read
        let deployer = deployer(chain(5), bundler(1, polls, sent.clone()));

        deployer.deploy(Bytes::from(vec![1])).await.unwrap();
        deployer.deploy(Bytes::from(vec![2])).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let first = sent[0].authorization.clone().unwrap();
        assert_eq!(first.nonce, U256::from(5));
        assert_eq!(sent[1].authorization.as_ref(), Some(&first));
        assert_eq!(first.authority(), Some(wallet().address()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_selects_standard_fee_tier() {
        let sent = Arc::new(Mutex::new(vec![]));
        let deployer = deployer(chain(0), bundler(1, Arc::default(), sent.clone()));

        deployer.deploy(Bytes::from(vec![1])).await.unwrap();

        let op = &sent.lock().unwrap()[0];
        assert_eq!(op.max_fee_per_gas, U256::from(200));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sponsorship_error_aborts_before_submission() {
        let mut bundler = MockBundlerClient::new();
        bundler.expect_gas_price().returning(|| Ok(tiers()));
        bundler
            .expect_estimate_user_operation_gas()
            .returning(|_, _| Ok(estimate()));
        bundler.expect_sponsor_user_operation().returning(|_, _, _| {
            Err(BundlerError::Rpc("UserOperation reverted during simulation".to_string()))
        });
        bundler.expect_send_user_operation().never();
        bundler.expect_user_operation_receipt().never();

        let result = deployer(chain(0), bundler).deploy(Bytes::from(vec![1])).await;
        assert_eq!(
            result,
            Err(SponsorError::Sponsorship(
                "UserOperation reverted during simulation".to_string()
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_on_third_poll() {
        let polls = Arc::new(AtomicU32::new(0));
        let sent = Arc::new(Mutex::new(vec![]));
        let deployer = deployer(chain(0), bundler(3, polls.clone(), sent.clone()));

        let deployment = deployer.deploy(Bytes::from(vec![1])).await.unwrap();

        assert_eq!(deployment.transaction_hash, H256::repeat_byte(0xab));
        assert_eq!(deployment.block_number, Some(U64::from(1234)));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        let op = &sent.lock().unwrap()[0];
        assert_eq!(
            deployment.user_op_hash,
            hash_user_operation(op, EntryPointVersion::V0_8, CHAIN_ID)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_signature_covers_sponsored_operation() {
        let sent = Arc::new(Mutex::new(vec![]));
        let deployer = deployer(chain(0), bundler(1, Arc::default(), sent.clone()));
        deployer.deploy(Bytes::from(vec![1, 2, 3])).await.unwrap();

        let op = sent.lock().unwrap()[0].clone();
        assert_eq!(op.paymaster, Some(Address::repeat_byte(0x77)));
        assert_eq!(op.pre_verification_gas, U256::from(55_000));
        assert_eq!(op.call_gas_limit, U256::from(80_000));
        assert_eq!(op.nonce, U256::from(2));

        let signature = Signature::try_from(op.signature.as_ref()).unwrap();
        let hash = hash_user_operation(&op, EntryPointVersion::V0_8, CHAIN_ID);
        signature.verify(hash, wallet().address()).unwrap();

        let mut mutated = op.clone();
        mutated.call_gas_limit += U256::one();
        let mutated_hash = hash_user_operation(&mutated, EntryPointVersion::V0_8, CHAIN_ID);
        assert!(signature.verify(mutated_hash, wallet().address()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_validation_is_advisory() {
        let deployer = deployer(chain(0), bundler_with_policy_check())
            .with_sponsorship_policy(Some("sp_policy".to_string()));
        assert!(deployer.deploy(Bytes::from(vec![1])).await.is_ok());
    }

    fn bundler_with_policy_check() -> MockBundlerClient {
        let mut bundler = bundler(1, Arc::default(), Arc::default());
        bundler
            .expect_validate_sponsorship_policies()
            .withf(|_, _, ids| ids == &vec!["sp_policy".to_string()])
            .times(1)
            .returning(|_, _, _| Err(BundlerError::Rpc("policy not found".to_string())));
        bundler
    }

    #[tokio::test(start_paused = true)]
    async fn test_gas_price_failure_is_fatal() {
        let mut bundler = MockBundlerClient::new();
        bundler
            .expect_gas_price()
            .returning(|| Err(BundlerError::Rpc("rate limited".to_string())));
        bundler.expect_estimate_user_operation_gas().never();

        let result = deployer(chain(0), bundler).deploy(Bytes::new()).await;
        assert_eq!(result, Err(SponsorError::GasPrice("rate limited".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimation_failure_is_fatal() {
        let mut bundler = MockBundlerClient::new();
        bundler.expect_gas_price().returning(|| Ok(tiers()));
        bundler
            .expect_estimate_user_operation_gas()
            .returning(|_, _| Err(BundlerError::Rpc("AA23 reverted".to_string())));
        bundler.expect_sponsor_user_operation().never();

        let result = deployer(chain(0), bundler).deploy(Bytes::new()).await;
        assert_eq!(result, Err(SponsorError::GasEstimate("AA23 reverted".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_is_fatal() {
        let mut bundler = MockBundlerClient::new();
        bundler.expect_gas_price().returning(|| Ok(tiers()));
        bundler
            .expect_estimate_user_operation_gas()
            .returning(|_, _| Ok(estimate()));
        bundler
            .expect_sponsor_user_operation()
            .returning(|_, _, _| Ok(sponsorship()));
        bundler
            .expect_send_user_operation()
            .returning(|_, _| Err(BundlerError::Rpc("AA25 invalid account nonce".to_string())));
        bundler.expect_user_operation_receipt().never();

        let result = deployer(chain(0), bundler).deploy(Bytes::new()).await;
        assert_eq!(
            result,
            Err(SponsorError::Submission("AA25 invalid account nonce".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_after_k_plus_one_calls() {
        let polls = Arc::new(AtomicU32::new(0));
        let bundler = bundler(5, polls.clone(), Arc::default());
        let start = Instant::now();

        let hash = H256::repeat_byte(1);
        let deployment = wait_for_receipt(&bundler, hash, ConfirmationPolicy::default())
            .await
            .unwrap();

        assert_eq!(deployment.user_op_hash, hash);
        assert_eq!(polls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), RECEIPT_POLL_INTERVAL * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_after_attempt_cap() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let mut bundler = MockBundlerClient::new();
        bundler
            .expect_user_operation_receipt()
            .times(MAX_RECEIPT_ATTEMPTS as usize)
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            });
        let start = Instant::now();

        let hash = H256::repeat_byte(9);
        let result = wait_for_receipt(&bundler, hash, ConfirmationPolicy::default()).await;

        assert_eq!(
            result,
            Err(SponsorError::ConfirmationTimeout {
                user_op_hash: hash,
                attempts: MAX_RECEIPT_ATTEMPTS,
            })
        );
        assert_eq!(polls.load(Ordering::SeqCst), MAX_RECEIPT_ATTEMPTS);
        assert_eq!(
            start.elapsed(),
            RECEIPT_POLL_INTERVAL * (MAX_RECEIPT_ATTEMPTS - 1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tolerates_lookup_errors() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let mut bundler = MockBundlerClient::new();
        bundler.expect_user_operation_receipt().returning(move |hash| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BundlerError::Rpc("502 Bad Gateway".to_string()))
            } else {
                Ok(Some(receipt(hash, H256::repeat_byte(3))))
            }
        });

        let policy = ConfirmationPolicy {
            poll_interval: Duration::from_millis(10),
            max_attempts: 3,
        };
        let deployment = wait_for_receipt(&bundler, H256::zero(), policy).await.unwrap();
        assert_eq!(deployment.transaction_hash, H256::repeat_byte(3));
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }
}
