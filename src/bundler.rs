// src/bundler.rs
use async_trait::async_trait;
use ethers::types::{Address, H256};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::debug;

use crate::error::{BundlerError, ConfigError};
use crate::types::{
    decode_value, GasEstimate, GasPriceTiers, PolicyValidation, SponsorshipContext,
    SponsorshipData, UserOperationReceipt,
};
use crate::user_op::UserOperation;

const SPONSOR_METHOD: &str = "pm_sponsorUserOperation";

// Results come back as raw JSON and are decoded into fixed shapes by
// `decode_value`, so a malformed response is reported as such instead of
// as a transport error.
#[rpc(client)]
pub trait BundlerRpc {
    #[method(name = "pimlico_getUserOperationGasPrice")]
    async fn get_user_operation_gas_price(&self) -> RpcResult<Value>;

    #[method(name = "eth_estimateUserOperationGas")]
    async fn estimate_user_operation_gas(
        &self,
        op: UserOperation,
        entry_point: Address,
    ) -> RpcResult<Value>;

    #[method(name = "pm_validateSponsorshipPolicies")]
    async fn validate_sponsorship_policies(
        &self,
        op: UserOperation,
        entry_point: Address,
        policy_ids: Vec<String>,
    ) -> RpcResult<Value>;

    #[method(name = "eth_sendUserOperation")]
    async fn send_user_operation(&self, op: UserOperation, entry_point: Address) -> RpcResult<H256>;

    #[method(name = "eth_getUserOperationReceipt")]
    async fn get_user_operation_receipt(&self, hash: H256) -> RpcResult<Option<Value>>;
}

/// Bundler and paymaster endpoints the sponsored pipeline depends on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundlerClient: Send + Sync {
    async fn gas_price(&self) -> Result<GasPriceTiers, BundlerError>;

    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, BundlerError>;

    async fn validate_sponsorship_policies(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_ids: Vec<String>,
    ) -> Result<Vec<PolicyValidation>, BundlerError>;

    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: Option<String>,
    ) -> Result<SponsorshipData, BundlerError>;

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, BundlerError>;

    /// `None` until the operation has been mined.
    async fn user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, BundlerError>;
}

/// JSON-RPC client for a Pimlico-compatible bundler and paymaster.
#[derive(Clone)]
pub struct PimlicoClient {
    client: HttpClient,
}

impl PimlicoClient {
    pub fn new(url: &str) -> Result<Self, ConfigError> {
        let client = HttpClientBuilder::default()
            .build(url)
            .map_err(|e| ConfigError::InvalidRpcUrl(format!("{url}: {e}")))?;
        Ok(Self { client })
    }

    pub fn for_chain(api_key: &str, chain_id: u64) -> Result<Self, ConfigError> {
        Self::new(&endpoint(api_key, chain_id))
    }
}

pub fn endpoint(api_key: &str, chain_id: u64) -> String {
    format!("https://api.pimlico.io/v2/{chain_id}/rpc?apikey={api_key}")
}

fn rpc_error(e: jsonrpsee::core::Error) -> BundlerError {
    BundlerError::Rpc(e.to_string())
}

#[async_trait]
impl BundlerClient for PimlicoClient {
    async fn gas_price(&self) -> Result<GasPriceTiers, BundlerError> {
        let raw = self
            .client
            .get_user_operation_gas_price()
            .await
            .map_err(rpc_error)?;
        decode_value(raw)
    }

    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, BundlerError> {
        let raw = BundlerRpcClient::estimate_user_operation_gas(&self.client, op.clone(), entry_point)
            .await
            .map_err(rpc_error)?;
        decode_value(raw)
    }

    async fn validate_sponsorship_policies(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_ids: Vec<String>,
    ) -> Result<Vec<PolicyValidation>, BundlerError> {
        let raw = BundlerRpcClient::validate_sponsorship_policies(
            &self.client,
            op.clone(),
            entry_point,
            policy_ids,
        )
        .await
        .map_err(rpc_error)?;
        decode_value(raw)
    }

    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: Option<String>,
    ) -> Result<SponsorshipData, BundlerError> {
        // The policy context is a trailing optional positional parameter;
        // it is omitted rather than sent as null.
        let mut params = ArrayParams::new();
        let encode = |e: serde_json::Error| BundlerError::Decode(e.to_string());
        params.insert(op).map_err(encode)?;
        params.insert(entry_point).map_err(encode)?;
        if let Some(sponsorship_policy_id) = policy_id {
            params
                .insert(SponsorshipContext {
                    sponsorship_policy_id,
                })
                .map_err(encode)?;
        }

        let raw: Value = self
            .client
            .request(SPONSOR_METHOD, params)
            .await
            .map_err(rpc_error)?;
        decode_value(raw)
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, BundlerError> {
        BundlerRpcClient::send_user_operation(&self.client, op.clone(), entry_point)
            .await
            .map_err(rpc_error)
    }

    async fn user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, BundlerError> {
        let raw = self
            .client
            .get_user_operation_receipt(user_op_hash)
            .await
            .map_err(rpc_error)?;
        match raw {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                debug!(?user_op_hash, "receipt available");
                decode_value(value).map(Some)
            }
        }
    }
}
