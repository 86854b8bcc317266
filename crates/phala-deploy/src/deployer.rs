//! CVM create and update pipelines.
//!
//! ```text
//! create: discover -> select -> provision -> [deploy AppAuth] -> encrypt -> commit
//! update: fetch -> patch -> provision -> [addComposeHash] -> encrypt -> commit -> [poll]
//! ```
//!
//! Steps in brackets only run for nodes backed by an on-chain KMS. The
//! on-chain step always completes before the commit is sent.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use phala_client::PhalaCloudClient;
use phala_crypto::{check_allowed_envs, encrypt_env_vars, EnvVar};
use phala_onchain::{
    AddComposeHashRequest, AppAuthDeployment, AppAuthRegistrar, ChainConnector, ChainTarget,
    ComposeHashRegistration, DeployAppAuthRequest, EthersConnector, RetryPolicy, WaitOptions,
};
use phala_types::identifier::{app_id_from_compose_hash, strip_0x, strip_app_prefix};
use phala_types::{
    CloudError, CommitCvmRequest, ComposePatch, ComposeUpdateCommit, CvmIdentifier, CvmRecord, CvmStatus,
    DeploymentManifest, KmsInfo, ProvisionResult, UpdateAccepted,
};

use crate::error::{DeployError, DeployResult, SelectionError};
use crate::selector::{select_target, Selection, SelectionRequest};

pub const DEFAULT_STATUS_POLL: Duration = Duration::from_secs(5);

/// Signing key and endpoint for the on-chain step.
#[derive(Clone)]
pub struct ChainCredentials {
    pub private_key: String,
    /// Defaults to a public endpoint for the KMS's chain.
    pub rpc_url: Option<String>,
}

impl ChainCredentials {
    pub fn new(private_key: impl Into<String>) -> Self {
        Self { private_key: private_key.into(), rpc_url: None }
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = Some(rpc_url.into());
        self
    }

    fn target(&self, chain_id: u64) -> ChainTarget {
        ChainTarget { chain_id, rpc_url: self.rpc_url.clone(), private_key: self.private_key.clone() }
    }
}

impl std::fmt::Debug for ChainCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCredentials")
            .field("private_key", &"<redacted>")
            .field("rpc_url", &self.rpc_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub manifest: DeploymentManifest,
    /// KMS id or slug. Required on nodes with an on-chain KMS; falls back
    /// to `manifest.kms_id`.
    pub kms: Option<String>,
    /// Compressed secp256k1 key the KMS must have signed the encryption key
    /// with. Unchecked when absent.
    pub kms_signer: Option<String>,
    pub envs: Vec<EnvVar>,
    pub credentials: Option<ChainCredentials>,
    /// Bind the app to this device instead of allowing any.
    pub device_id: Option<String>,
    /// Bind to the device reported by the provision step or the node.
    pub bind_to_node_device: bool,
    pub allow_any_device: Option<bool>,
    pub disable_upgrades: bool,
    pub skip_prerequisite_checks: bool,
}

impl DeployRequest {
    pub fn new(manifest: DeploymentManifest) -> Self {
        Self {
            manifest,
            kms: None,
            kms_signer: None,
            envs: Vec::new(),
            credentials: None,
            device_id: None,
            bind_to_node_device: false,
            allow_any_device: None,
            disable_upgrades: false,
            skip_prerequisite_checks: false,
        }
    }

    pub fn with_envs(mut self, envs: Vec<EnvVar>) -> Self {
        self.envs = envs;
        self
    }

    pub fn with_kms(mut self, kms: impl Into<String>) -> Self {
        self.kms = Some(kms.into());
        self
    }

    pub fn with_credentials(mut self, credentials: ChainCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_kms_signer(mut self, signer: impl Into<String>) -> Self {
        self.kms_signer = Some(signer.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub cvm: CvmRecord,
    pub app_id: String,
    pub compose_hash: String,
    pub node_id: u64,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_auth: Option<AppAuthDeployment>,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub cvm: CvmIdentifier,
    pub patch: ComposePatch,
    /// `None` keeps the running environment; `Some(vec![])` clears it.
    pub envs: Option<Vec<EnvVar>>,
    pub credentials: Option<ChainCredentials>,
    /// Expected KMS signer, checked whenever the key comes from the KMS.
    pub kms_signer: Option<String>,
    /// Poll until the CVM is running again, for at most this long.
    pub wait_for_running: Option<Duration>,
}

impl UpdateRequest {
    pub fn new(cvm: CvmIdentifier) -> Self {
        Self {
            cvm,
            patch: ComposePatch::default(),
            envs: None,
            credentials: None,
            kms_signer: None,
            wait_for_running: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub accepted: UpdateAccepted,
    pub compose_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<ComposeHashRegistration>,
    /// Final record when the caller asked to wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvm: Option<CvmRecord>,
}

/// Runs deployments against one control plane. Chains are reached through
/// `connector`, which defaults to JSON-RPC via ethers.
pub struct Deployer {
    client: PhalaCloudClient,
    connector: Arc<dyn ChainConnector>,
    retry: Option<RetryPolicy>,
    wait: WaitOptions,
    status_poll: Duration,
}

impl Deployer {
    pub fn new(client: PhalaCloudClient) -> Self {
        Self {
            client,
            connector: Arc::new(EthersConnector),
            retry: None,
            wait: WaitOptions::default(),
            status_poll: DEFAULT_STATUS_POLL,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn ChainConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Retry on-chain operations that fail before reaching the chain.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Receipt wait for on-chain transactions; the token aborts the wait.
    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll = interval;
        self
    }

    pub fn client(&self) -> &PhalaCloudClient {
        &self.client
    }

    pub async fn deploy(&self, request: DeployRequest) -> DeployResult<DeployOutcome> {
        let mut manifest = request.manifest.clone();
        let credentials = request.credentials.as_ref();

        manifest.validate().map_err(CloudError::from)?;
        let keys = env_keys(&request.envs);
        check_allowed_envs(
            manifest.image.as_deref(),
            &manifest.compose_file.allowed_envs,
            keys.iter().map(String::as_str),
        )?;

        let kms_key = request.kms.clone().or_else(|| manifest.kms_id.clone());
        let snapshot = self.client.get_available_nodes().await?;
        let kms_list = match kms_key {
            Some(_) => self.client.list_kms().await?,
            None => Vec::new(),
        };
        let selection = select_target(
            &snapshot,
            &kms_list,
            &SelectionRequest {
                node_id: manifest.node_id.or(manifest.teepod_id),
                kms: kms_key,
                image: manifest.image.clone(),
                has_credential: credentials.is_some(),
            },
        )?;
        if manifest.image.is_none() {
            check_allowed_envs(
                Some(&selection.image),
                &manifest.compose_file.allowed_envs,
                keys.iter().map(String::as_str),
            )?;
        }

        manifest.node_id = Some(selection.node.node_id);
        manifest.image = Some(selection.image.clone());
        manifest.kms_id = selection.kms.as_ref().map(|k| k.id.clone());
        let provision = self.client.provision_cvm(manifest).await?;

        let (app_id, public_key, app_auth) = if selection.node.support_onchain_kms {
            let kms = onchain_kms(provision.kms_info.as_ref(), selection.kms.as_ref())?;
            let credentials = credentials.ok_or(SelectionError::CredentialRequired)?;
            let deployment = self.register_app(kms, credentials, &selection, &provision, &request).await?;
            let verified = self
                .client
                .get_verified_kms_pubkey(kms_path_key(kms), &deployment.app_id)
                .await?;
            check_kms_signer(request.kms_signer.as_deref(), &verified.signer)?;
            info!(signer = %verified.signer, "verified KMS encryption key");
            (deployment.app_id.clone(), verified.public_key, Some(deployment))
        } else {
            let app_id = provision
                .app_id
                .clone()
                .or_else(|| app_id_from_compose_hash(&provision.compose_hash))
                .ok_or(DeployError::MissingField("app_id"))?;
            let public_key = provision
                .app_env_encrypt_pubkey
                .clone()
                .ok_or(DeployError::MissingField("app_env_encrypt_pubkey"))?;
            (app_id, public_key, None)
        };

        let encrypted_env = encrypt_env_vars(&request.envs, &public_key)?;
        let commit = CommitCvmRequest {
            app_id: app_id.clone(),
            compose_hash: provision.compose_hash.clone(),
            encrypted_env,
            env_keys: keys,
            kms_id: selection.kms.as_ref().map(|k| k.id.clone()),
            contract_address: app_auth.as_ref().map(|a| a.app_auth_address.clone()),
            deployer_address: app_auth.as_ref().map(|a| a.deployer.clone()),
        };
        let cvm = self.client.commit_cvm_provision(&commit).await?;
        info!(app_id = %app_id, status = ?cvm.status, "deployment committed");

        Ok(DeployOutcome {
            cvm,
            app_id,
            compose_hash: provision.compose_hash,
            node_id: selection.node.node_id,
            image: selection.image,
            kms_id: commit.kms_id,
            app_auth,
        })
    }

    async fn register_app(
        &self,
        kms: &KmsInfo,
        credentials: &ChainCredentials,
        selection: &Selection,
        provision: &ProvisionResult,
        request: &DeployRequest,
    ) -> DeployResult<AppAuthDeployment> {
        let (chain_id, contract) = chain_of(kms)?;
        let registrar = self.registrar(credentials.target(chain_id)).await?;

        let device_id = request.device_id.clone().or_else(|| {
            request
                .bind_to_node_device
                .then(|| provision.device_id.clone().or_else(|| selection.node.device_id.clone()))
                .flatten()
        });
        let mut deploy = DeployAppAuthRequest::new(contract, provision.compose_hash.clone());
        deploy.chain_id = Some(chain_id);
        deploy.device_id = device_id;
        deploy.allow_any_device = request.allow_any_device;
        deploy.disable_upgrades = request.disable_upgrades;
        deploy.skip_prerequisite_checks = request.skip_prerequisite_checks;
        deploy.wait = self.wait.clone();

        Ok(registrar.deploy_app_auth(&deploy).await?)
    }

    pub async fn update(&self, request: UpdateRequest) -> DeployResult<UpdateOutcome> {
        let UpdateRequest { cvm, patch, envs, credentials, kms_signer, wait_for_running } = request;
        cvm.resolve().map_err(CloudError::from)?;

        let record = self.client.get_cvm_info(&cvm).await?;
        let mut compose = self.client.get_cvm_compose_file(&cvm).await?;
        patch.apply(&mut compose);

        let onchain = record.uses_onchain_kms();
        if onchain && credentials.is_none() {
            return Err(SelectionError::CredentialRequired.into());
        }
        let keys = envs.as_deref().map(env_keys);
        if let Some(keys) = &keys {
            check_allowed_envs(record_image(&record), &compose.allowed_envs, keys.iter().map(String::as_str))?;
        }

        let provision = self
            .client
            .provision_cvm_compose_file_update(&cvm, compose, Some(envs.is_some()))
            .await?;

        let registration = match (onchain, credentials.as_ref()) {
            (true, Some(credentials)) => Some(self.append_compose_hash(&record, credentials, &provision).await?),
            _ => None,
        };

        let encrypted_env = match &envs {
            Some(envs) => {
                let public_key = self.update_public_key(&record, &provision, kms_signer.as_deref()).await?;
                Some(encrypt_env_vars(envs, &public_key)?)
            }
            None => None,
        };
        let commit = ComposeUpdateCommit { compose_hash: provision.compose_hash.clone(), encrypted_env, env_keys: keys };
        let accepted = self.client.commit_cvm_compose_file_update(&cvm, &commit).await?;

        let cvm = match wait_for_running {
            Some(timeout) => {
                let record = self
                    .client
                    .wait_for_status(&cvm, CvmStatus::Running, timeout, self.status_poll)
                    .await?;
                if record.status == CvmStatus::Failed {
                    warn!(name = %record.name, "CVM failed after update");
                }
                Some(record)
            }
            None => None,
        };

        Ok(UpdateOutcome { accepted, compose_hash: provision.compose_hash, registration, cvm })
    }

    async fn append_compose_hash(
        &self,
        record: &CvmRecord,
        credentials: &ChainCredentials,
        provision: &ProvisionResult,
    ) -> DeployResult<ComposeHashRegistration> {
        let kms = onchain_kms(provision.kms_info.as_ref(), record.kms_info.as_ref())?;
        let (chain_id, contract) = chain_of(kms)?;
        let app_id = record.app_id.as_deref().ok_or(DeployError::MissingField("app_id"))?;
        let registrar = self.registrar(credentials.target(chain_id)).await?;

        let mut request = AddComposeHashRequest::new(contract, onchain_app_id(app_id), provision.compose_hash.clone());
        request.chain_id = Some(chain_id);
        request.check_owner = true;
        request.wait = self.wait.clone();
        Ok(registrar.add_compose_hash(&request).await?)
    }

    async fn update_public_key(
        &self,
        record: &CvmRecord,
        provision: &ProvisionResult,
        expected_signer: Option<&str>,
    ) -> DeployResult<String> {
        if let Some(key) = &provision.app_env_encrypt_pubkey {
            return Ok(key.clone());
        }
        if let (Some(kms), Some(app_id)) = (record.kms_info.as_ref().filter(|k| k.is_onchain()), &record.app_id) {
            let verified = self
                .client
                .get_verified_kms_pubkey(kms_path_key(kms), &onchain_app_id(app_id))
                .await?;
            check_kms_signer(expected_signer, &verified.signer)?;
            return Ok(verified.public_key);
        }
        record
            .encrypted_env_pubkey
            .clone()
            .ok_or(DeployError::MissingField("app_env_encrypt_pubkey"))
    }

    async fn registrar(&self, target: ChainTarget) -> DeployResult<AppAuthRegistrar> {
        let backend = self.connector.connect(&target).await?;
        let registrar = AppAuthRegistrar::new(backend);
        Ok(match &self.retry {
            Some(policy) => registrar.with_retry(policy.clone()),
            None => registrar,
        })
    }
}

fn env_keys(envs: &[EnvVar]) -> Vec<String> {
    envs.iter().map(|e| e.key.clone()).collect()
}

/// Prefer the KMS the control plane echoed back; fall back to the one chosen
/// or recorded locally.
fn onchain_kms<'a>(echoed: Option<&'a KmsInfo>, local: Option<&'a KmsInfo>) -> DeployResult<&'a KmsInfo> {
    echoed
        .filter(|k| k.is_onchain())
        .or_else(|| local.filter(|k| k.is_onchain()))
        .ok_or(DeployError::MissingField("kms_contract_address"))
}

fn chain_of(kms: &KmsInfo) -> DeployResult<(u64, String)> {
    match (kms.chain_id, kms.kms_contract_address.as_ref()) {
        (Some(chain_id), Some(contract)) => Ok((chain_id, contract.clone())),
        _ => Err(DeployError::MissingField("kms_contract_address")),
    }
}

fn check_kms_signer(expected: Option<&str>, actual: &str) -> DeployResult<()> {
    match expected {
        Some(expected) if !strip_0x(expected.trim()).eq_ignore_ascii_case(strip_0x(actual)) => {
            Err(DeployError::KmsSignerMismatch { expected: expected.to_string(), actual: actual.to_string() })
        }
        _ => Ok(()),
    }
}

fn kms_path_key(kms: &KmsInfo) -> &str {
    kms.slug.as_deref().unwrap_or(&kms.id)
}

/// 0x-prefixed form used on chain, from any of `app_…`, `0x…` or bare hex.
fn onchain_app_id(app_id: &str) -> String {
    format!("0x{}", strip_0x(strip_app_prefix(app_id)))
}

fn record_image(record: &CvmRecord) -> Option<&str> {
    ["base_image", "image"]
        .iter()
        .find_map(|field| record.extra.get(*field).and_then(|v| v.as_str()))
}
