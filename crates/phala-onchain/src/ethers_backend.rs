use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, H256, U256};
use tracing::debug;

use crate::backend::{AppAuthBackend, ChainConnector, ChainTarget, DeployArgs};
use crate::bindings::{AppAuth, KmsAuth};
use crate::error::{OnchainError, OnchainResult};

pub const BASE_MAINNET: u64 = 8453;
pub const ETHEREUM_MAINNET: u64 = 1;

/// Public RPC endpoint used when the caller supplies none.
pub fn default_rpc_url(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        BASE_MAINNET => Some("https://mainnet.base.org"),
        ETHEREUM_MAINNET => Some("https://eth.merkle.io"),
        _ => None,
    }
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// [`AppAuthBackend`] over JSON-RPC with a local private key.
pub struct EthersBackend {
    client: Arc<SignerClient>,
}

impl EthersBackend {
    pub fn connect(target: &ChainTarget) -> OnchainResult<Self> {
        let rpc_url = match target.rpc_url.as_deref() {
            Some(url) => url,
            None => default_rpc_url(target.chain_id).ok_or_else(|| {
                OnchainError::InvalidArgument(format!("no default RPC URL for chain {}; pass one explicitly", target.chain_id))
            })?,
        };
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| OnchainError::InvalidArgument(format!("bad RPC URL {}: {}", rpc_url, e)))?
            .interval(Duration::from_millis(500));
        let key = target.private_key.trim();
        let wallet: LocalWallet = key
            .strip_prefix("0x")
            .unwrap_or(key)
            .parse()
            .map_err(|_| OnchainError::InvalidArgument("private key is not a valid secp256k1 key".to_string()))?;
        let wallet = wallet.with_chain_id(target.chain_id);
        debug!(chain_id = target.chain_id, rpc = rpc_url, signer = ?wallet.address(), "connected chain backend");
        Ok(Self { client: Arc::new(SignerMiddleware::new(provider, wallet)) })
    }
}

fn provider_error(err: impl std::fmt::Display) -> OnchainError {
    OnchainError::Provider(err.to_string())
}

fn submission_error(err: impl std::fmt::Display) -> OnchainError {
    OnchainError::Submission(err.to_string())
}

#[async_trait]
impl AppAuthBackend for EthersBackend {
    async fn chain_id(&self) -> OnchainResult<u64> {
        let id = self.client.get_chainid().await.map_err(provider_error)?;
        Ok(id.as_u64())
    }

    fn signer_address(&self) -> Address {
        self.client.address()
    }

    async fn balance(&self, address: Address) -> OnchainResult<U256> {
        self.client.get_balance(address, None).await.map_err(provider_error)
    }

    async fn has_code(&self, address: Address) -> OnchainResult<bool> {
        let code = self.client.get_code(address, None).await.map_err(provider_error)?;
        Ok(!code.is_empty())
    }

    async fn submit_deploy(&self, kms_contract: Address, args: DeployArgs) -> OnchainResult<H256> {
        let kms = KmsAuth::new(kms_contract, self.client.clone());
        let call = kms.deploy_and_register_app(
            args.deployer,
            args.disable_upgrades,
            args.allow_any_device,
            args.device_id,
            args.compose_hash,
        );
        let pending = call.send().await.map_err(submission_error)?;
        Ok(pending.tx_hash())
    }

    async fn app_controller(&self, kms_contract: Address, app_id: Address) -> OnchainResult<Option<Address>> {
        let kms = KmsAuth::new(kms_contract, self.client.clone());
        let (registered, controller) = kms.apps(app_id).call().await.map_err(provider_error)?;
        Ok(if registered && controller != Address::zero() { Some(controller) } else { None })
    }

    async fn app_auth_owner(&self, app_auth: Address) -> OnchainResult<Address> {
        AppAuth::new(app_auth, self.client.clone())
            .owner()
            .call()
            .await
            .map_err(provider_error)
    }

    async fn submit_add_compose_hash(&self, app_auth: Address, compose_hash: [u8; 32]) -> OnchainResult<H256> {
        let contract = AppAuth::new(app_auth, self.client.clone());
        let call = contract.add_compose_hash(compose_hash);
        let pending = call.send().await.map_err(submission_error)?;
        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> OnchainResult<Option<TransactionReceipt>> {
        self.client.get_transaction_receipt(tx_hash).await.map_err(provider_error)
    }
}

/// Connects [`EthersBackend`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct EthersConnector;

#[async_trait]
impl ChainConnector for EthersConnector {
    async fn connect(&self, target: &ChainTarget) -> OnchainResult<Arc<dyn AppAuthBackend>> {
        Ok(Arc::new(EthersBackend::connect(target)?))
    }
}
