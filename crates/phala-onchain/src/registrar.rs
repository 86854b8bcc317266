//! AppAuth registration against a KMS contract.
//!
//! Two entry points:
//! - [`AppAuthRegistrar::deploy_app_auth`] deploys a fresh AppAuth proxy via the
//!   KMS factory and registers the first compose hash in the same transaction.
//! - [`AppAuthRegistrar::add_compose_hash`] appends a hash to the AppAuth
//!   contract already registered for an app.

use std::sync::Arc;

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::backend::{hex_address, parse_address, parse_bytes32, AppAuthBackend, DeployArgs};
use crate::bindings::AppDeployedViaFactoryFilter;
use crate::error::{OnchainError, OnchainResult};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::tracker::{TransactionTracker, TxState, WaitOptions};

pub type RetryPredicate = Arc<dyn Fn(&OnchainError) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DeployAppAuthRequest {
    pub kms_contract: String,
    /// Chain the KMS lives on; checked against the provider when set.
    pub chain_id: Option<u64>,
    pub compose_hash: String,
    /// Device the app is bound to. Absent or all-zero means unbound.
    pub device_id: Option<String>,
    /// Ignored (forced `false`) when a device id is given. Defaults to `true`.
    pub allow_any_device: Option<bool>,
    pub disable_upgrades: bool,
    pub skip_prerequisite_checks: bool,
    /// Defaults to the signer.
    pub deployer: Option<String>,
    pub wait: WaitOptions,
}

impl DeployAppAuthRequest {
    pub fn new(kms_contract: impl Into<String>, compose_hash: impl Into<String>) -> Self {
        Self {
            kms_contract: kms_contract.into(),
            chain_id: None,
            compose_hash: compose_hash.into(),
            device_id: None,
            allow_any_device: None,
            disable_upgrades: false,
            skip_prerequisite_checks: false,
            deployer: None,
            wait: WaitOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddComposeHashRequest {
    pub kms_contract: String,
    pub chain_id: Option<u64>,
    pub app_id: String,
    pub compose_hash: String,
    /// Verify the signer owns the AppAuth contract before submitting.
    pub check_owner: bool,
    pub skip_prerequisite_checks: bool,
    pub wait: WaitOptions,
}

impl AddComposeHashRequest {
    pub fn new(kms_contract: impl Into<String>, app_id: impl Into<String>, compose_hash: impl Into<String>) -> Self {
        Self {
            kms_contract: kms_contract.into(),
            chain_id: None,
            app_id: app_id.into(),
            compose_hash: compose_hash.into(),
            check_owner: false,
            skip_prerequisite_checks: false,
            wait: WaitOptions::default(),
        }
    }
}

/// Identity recovered from `AppDeployedViaFactory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppAuthDeployment {
    /// 0x-prefixed application id.
    pub app_id: String,
    /// AppAuth proxy; committed as `contract_address`.
    pub app_auth_address: String,
    /// Committed as `deployer_address`.
    pub deployer: String,
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposeHashRegistration {
    pub app_id: String,
    pub app_auth_address: String,
    pub compose_hash: String,
    pub tx_hash: String,
}

/// Effective `allowAnyDevice`: an explicit non-zero device always wins.
pub fn effective_allow_any_device(device_id: &[u8; 32], requested: Option<bool>) -> bool {
    if device_id.iter().any(|b| *b != 0) {
        false
    } else {
        requested.unwrap_or(true)
    }
}

pub struct AppAuthRegistrar {
    backend: Arc<dyn AppAuthBackend>,
    tracker: TransactionTracker,
    retry: Option<(RetryPolicy, RetryPredicate)>,
}

impl AppAuthRegistrar {
    pub fn new(backend: Arc<dyn AppAuthBackend>) -> Self {
        Self { backend, tracker: TransactionTracker::new(), retry: None }
    }

    /// Retry whole operations whose error satisfies
    /// [`OnchainError::is_retryable`].
    pub fn with_retry(self, policy: RetryPolicy) -> Self {
        self.with_retry_predicate(policy, Arc::new(OnchainError::is_retryable))
    }

    pub fn with_retry_predicate(mut self, policy: RetryPolicy, predicate: RetryPredicate) -> Self {
        self.retry = Some((policy, predicate));
        self
    }

    pub fn tx_state(&self) -> TxState {
        self.tracker.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxState> {
        self.tracker.subscribe()
    }

    pub fn signer_address(&self) -> Address {
        self.backend.signer_address()
    }

    async fn run<T, F, Fut>(&self, operation: F) -> OnchainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = OnchainResult<T>>,
    {
        match &self.retry {
            Some((policy, predicate)) => retry_with_backoff(policy, |e: &OnchainError| (**predicate)(e), operation).await,
            None => {
                let mut operation = operation;
                operation().await
            }
        }
    }

    /// Chain id, gas balance and KMS contract presence.
    pub async fn preflight(&self, kms_contract: Address, expected_chain: Option<u64>) -> OnchainResult<()> {
        if let Some(expected) = expected_chain {
            let actual = self.backend.chain_id().await?;
            if actual != expected {
                return Err(OnchainError::ChainMismatch { expected, actual });
            }
        }
        let signer = self.backend.signer_address();
        if self.backend.balance(signer).await? == U256::zero() {
            return Err(OnchainError::InsufficientBalance { address: signer });
        }
        if !self.backend.has_code(kms_contract).await? {
            return Err(OnchainError::ContractNotFound { address: kms_contract });
        }
        Ok(())
    }

    pub async fn deploy_app_auth(&self, request: &DeployAppAuthRequest) -> OnchainResult<AppAuthDeployment> {
        let kms = parse_address("kms_contract", &request.kms_contract)?;
        let compose_hash = parse_bytes32("compose_hash", &request.compose_hash)?;
        let device_id = match request.device_id.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(device) => parse_bytes32("device_id", device)?,
            None => [0u8; 32],
        };
        let deployer = match &request.deployer {
            Some(d) => parse_address("deployer", d)?,
            None => self.backend.signer_address(),
        };
        let args = DeployArgs {
            deployer,
            disable_upgrades: request.disable_upgrades,
            allow_any_device: effective_allow_any_device(&device_id, request.allow_any_device),
            device_id,
            compose_hash,
        };

        self.run(|| self.deploy_once(kms, args, request)).await
    }

    async fn deploy_once(
        &self,
        kms: Address,
        args: DeployArgs,
        request: &DeployAppAuthRequest,
    ) -> OnchainResult<AppAuthDeployment> {
        self.tracker.reset();
        if !request.skip_prerequisite_checks {
            self.preflight(kms, request.chain_id).await.map_err(|e| self.tracker.fail(e))?;
        }
        info!(
            kms = %hex_address(kms),
            allow_any_device = args.allow_any_device,
            "deploying AppAuth contract"
        );
        let backend = self.backend.as_ref();
        let receipt = self
            .tracker
            .track(backend, backend.submit_deploy(kms, args), &request.wait)
            .await?;
        let event = find_deploy_event(&receipt)?;
        let deployment = AppAuthDeployment {
            app_id: hex_address(event.app_id),
            app_auth_address: hex_address(event.proxy_address),
            deployer: hex_address(event.deployer),
            tx_hash: format!("{:?}", receipt.transaction_hash),
            block_number: receipt.block_number.map(|n| n.as_u64()),
        };
        info!(app_id = %deployment.app_id, app_auth = %deployment.app_auth_address, "AppAuth deployed");
        Ok(deployment)
    }

    pub async fn add_compose_hash(&self, request: &AddComposeHashRequest) -> OnchainResult<ComposeHashRegistration> {
        let kms = parse_address("kms_contract", &request.kms_contract)?;
        let app_id = parse_address("app_id", &request.app_id)?;
        let compose_hash = parse_bytes32("compose_hash", &request.compose_hash)?;
        self.run(|| self.add_compose_hash_once(kms, app_id, compose_hash, request)).await
    }

    async fn add_compose_hash_once(
        &self,
        kms: Address,
        app_id: Address,
        compose_hash: [u8; 32],
        request: &AddComposeHashRequest,
    ) -> OnchainResult<ComposeHashRegistration> {
        self.tracker.reset();
        if !request.skip_prerequisite_checks {
            self.preflight(kms, request.chain_id).await.map_err(|e| self.tracker.fail(e))?;
        }
        let app_auth = self.resolve_app_auth(kms, app_id, request).await.map_err(|e| self.tracker.fail(e))?;

        info!(app_id = %hex_address(app_id), app_auth = %hex_address(app_auth), "adding compose hash");
        let backend = self.backend.as_ref();
        let receipt = self
            .tracker
            .track(backend, backend.submit_add_compose_hash(app_auth, compose_hash), &request.wait)
            .await?;
        Ok(ComposeHashRegistration {
            app_id: hex_address(app_id),
            app_auth_address: hex_address(app_auth),
            compose_hash: format!("0x{}", hex::encode(compose_hash)),
            tx_hash: format!("{:?}", receipt.transaction_hash),
        })
    }
}

impl AppAuthRegistrar {
    async fn resolve_app_auth(&self, kms: Address, app_id: Address, request: &AddComposeHashRequest) -> OnchainResult<Address> {
        let app_auth = self
            .backend
            .app_controller(kms, app_id)
            .await?
            .ok_or(OnchainError::NotRegistered { app_id })?;
        if request.check_owner && !request.skip_prerequisite_checks {
            let owner = self.backend.app_auth_owner(app_auth).await?;
            let signer = self.backend.signer_address();
            if owner != signer {
                return Err(OnchainError::NotOwner { owner, signer });
            }
        }
        Ok(app_auth)
    }
}

fn find_deploy_event(receipt: &TransactionReceipt) -> OnchainResult<AppDeployedViaFactoryFilter> {
    let signature: H256 = AppDeployedViaFactoryFilter::signature();
    receipt
        .logs
        .iter()
        .filter(|log| log.topics.first() == Some(&signature))
        .find_map(|log| <AppDeployedViaFactoryFilter as EthEvent>::decode_log(&RawLog::from(log.clone())).ok())
        .ok_or(OnchainError::MissingEvent {
            tx_hash: receipt.transaction_hash,
            event: "AppDeployedViaFactory",
        })
}
