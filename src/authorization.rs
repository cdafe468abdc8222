// src/authorization.rs
use ethers::signers::{LocalWallet, Signer, WalletError};
use ethers::types::{Address, Signature, H256, U256, U64};
use ethers::utils::{keccak256, rlp::RlpStream};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::error::SponsorError;
use crate::types::Authorization;

/// EIP-7702 signing domain byte.
const AUTHORIZATION_MAGIC: u8 = 0x05;

/// `keccak256(0x05 ‖ rlp([chain_id, delegate, nonce]))`
pub fn authorization_hash(chain_id: u64, delegate: Address, nonce: U256) -> H256 {
    let mut stream = RlpStream::new_list(3);
    stream.append(&U256::from(chain_id));
    stream.append(&delegate);
    stream.append(&nonce);

    let mut preimage = vec![AUTHORIZATION_MAGIC];
    preimage.extend_from_slice(&stream.out());
    keccak256(preimage).into()
}

pub fn sign_authorization(
    wallet: &LocalWallet,
    chain_id: u64,
    delegate: Address,
    nonce: U256,
) -> Result<Authorization, WalletError> {
    let signature = wallet.sign_hash(authorization_hash(chain_id, delegate, nonce))?;
    Ok(Authorization {
        address: delegate,
        chain_id: U256::from(chain_id),
        nonce,
        y_parity: U64::from(signature.v.saturating_sub(27)),
        r: signature.r,
        s: signature.s,
    })
}

impl Authorization {
    pub fn signature(&self) -> Signature {
        Signature {
            r: self.r,
            s: self.s,
            v: self.y_parity.as_u64() + 27,
        }
    }

    /// Address that signed the delegation. `None` when the signature does
    /// not recover or the chain id does not fit in 64 bits.
    pub fn authority(&self) -> Option<Address> {
        if self.chain_id > U256::from(u64::MAX) {
            return None;
        }
        let hash = authorization_hash(self.chain_id.low_u64(), self.address, self.nonce);
        self.signature().recover(hash).ok()
    }
}

/// Creates the delegation authorization at most once per session.
///
/// The authorization is bound to the signer's EOA nonce, which user
/// operations do not advance, so one value serves every sponsored call the
/// session makes.
#[derive(Debug)]
pub struct AuthorizationManager {
    wallet: LocalWallet,
    chain_id: u64,
    delegate: Address,
    cached: OnceCell<Authorization>,
}

impl AuthorizationManager {
    pub fn new(wallet: LocalWallet, chain_id: u64, delegate: Address) -> Self {
        Self {
            wallet,
            chain_id,
            delegate,
            cached: OnceCell::new(),
        }
    }

    pub fn cached(&self) -> Option<&Authorization> {
        self.cached.get()
    }

    pub async fn get_or_create<C>(&self, chain: &C) -> Result<Authorization, SponsorError>
    where
        C: ChainClient + ?Sized,
    {
        let authorization = self
            .cached
            .get_or_try_init(|| async {
                let nonce = self.eoa_nonce(chain).await;
                let authorization =
                    sign_authorization(&self.wallet, self.chain_id, self.delegate, nonce)
                        .map_err(|e| SponsorError::Signing(e.to_string()))?;
                info!(
                    delegate = ?self.delegate,
                    chain_id = self.chain_id,
                    %nonce,
                    "authorization created"
                );
                Ok::<_, SponsorError>(authorization)
            })
            .await?;
        Ok(authorization.clone())
    }

    async fn eoa_nonce<C>(&self, chain: &C) -> U256
    where
        C: ChainClient + ?Sized,
    {
        let address = self.wallet.address();
        match chain.transaction_count(address).await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!(error = %e, ?address, "failed to read EOA nonce, authorizing with nonce 0");
                U256::zero()
            }
        }
    }
}
