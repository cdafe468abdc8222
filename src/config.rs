// src/config.rs
use std::collections::HashMap;
use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use tracing::info;

use crate::bundler::PimlicoClient;
use crate::chain::EthersChainClient;
use crate::contracts::is_supported;
use crate::creation::CreationService;
use crate::distribution::DistributionService;
use crate::error::ConfigError;
use crate::sponsor::{ConfirmationPolicy, SponsoredDeployer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterSettings {
    pub api_key: String,
    pub sponsorship_policy_id: Option<String>,
    /// Replaces the hosted Pimlico endpoint, e.g. for a self-hosted bundler.
    pub bundler_url: Option<String>,
}

/// Operator credentials and per-chain endpoints.
#[derive(Debug, Clone)]
pub struct Settings {
    operator_key: String,
    rpc_urls: HashMap<u64, String>,
    paymaster: Option<PaymasterSettings>,
    confirmation: ConfirmationPolicy,
}

impl Settings {
    pub fn new(operator_key: impl Into<String>) -> Result<Self, ConfigError> {
        let operator_key = operator_key.into();
        let trimmed = operator_key.trim().trim_start_matches("0x");
        if trimmed.is_empty() {
            return Err(ConfigError::MissingOperatorKey);
        }
        trimmed
            .parse::<LocalWallet>()
            .map_err(|e| ConfigError::InvalidOperatorKey(e.to_string()))?;

        Ok(Self {
            operator_key: trimmed.to_string(),
            rpc_urls: HashMap::new(),
            paymaster: None,
            confirmation: ConfirmationPolicy::default(),
        })
    }

    pub fn with_rpc_url(mut self, chain_id: u64, url: impl Into<String>) -> Self {
        self.rpc_urls.insert(chain_id, url.into());
        self
    }

    /// Enables sponsored execution. An empty key leaves it disabled.
    pub fn with_paymaster(mut self, paymaster: PaymasterSettings) -> Self {
        self.paymaster = (!paymaster.api_key.trim().is_empty()).then_some(paymaster);
        self
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn paymaster_enabled(&self) -> bool {
        self.paymaster.is_some()
    }

    pub fn wallet(&self, chain_id: u64) -> Result<LocalWallet, ConfigError> {
        let wallet = self
            .operator_key
            .parse::<LocalWallet>()
            .map_err(|e| ConfigError::InvalidOperatorKey(e.to_string()))?;
        Ok(wallet.with_chain_id(chain_id))
    }

    pub fn operator_address(&self) -> Result<Address, ConfigError> {
        Ok(self.wallet(1)?.address())
    }

    pub fn rpc_url(&self, chain_id: u64) -> Result<&str, ConfigError> {
        self.rpc_urls
            .get(&chain_id)
            .map(String::as_str)
            .ok_or(ConfigError::MissingRpcUrl(chain_id))
    }
}

/// Creation and distribution services for one chain, sharing a single
/// sponsored session when a paymaster is configured.
pub struct SplitClient {
    pub creation: CreationService,
    pub distribution: DistributionService,
    pub sponsored: bool,
}

impl SplitClient {
    pub fn connect(settings: &Settings, chain_id: u64) -> Result<Self, ConfigError> {
        if !is_supported(chain_id) {
            return Err(ConfigError::UnsupportedChain(chain_id));
        }
        let wallet = settings.wallet(chain_id)?;
        let operator = wallet.address();
        let chain = Arc::new(EthersChainClient::new(settings.rpc_url(chain_id)?, wallet.clone())?);

        let mut creation = CreationService::new(chain_id, operator, chain.clone());
        let mut distribution = DistributionService::new(operator, chain.clone());

        if let Some(paymaster) = &settings.paymaster {
            let bundler = Arc::new(match &paymaster.bundler_url {
                Some(url) => PimlicoClient::new(url)?,
                None => PimlicoClient::for_chain(&paymaster.api_key, chain_id)?,
            });
            let sponsor = Arc::new(
                SponsoredDeployer::new(wallet, chain_id, chain, bundler)
                    .with_sponsorship_policy(paymaster.sponsorship_policy_id.clone())
                    .with_confirmation(settings.confirmation),
            );
            creation = creation.with_sponsor(sponsor.clone());
            distribution = distribution.with_sponsor(sponsor);
        }

        info!(
            chain_id,
            ?operator,
            sponsored = settings.paymaster_enabled(),
            "split client ready"
        );
        Ok(Self {
            creation,
            distribution,
            sponsored: settings.paymaster_enabled(),
        })
    }
}
