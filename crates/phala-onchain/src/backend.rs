use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, H256, U256};

use crate::error::{OnchainError, OnchainResult};

/// Arguments of `deployAndRegisterApp` after device binding is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployArgs {
    pub deployer: Address,
    pub disable_upgrades: bool,
    pub allow_any_device: bool,
    pub device_id: [u8; 32],
    pub compose_hash: [u8; 32],
}

/// Everything the registrar needs from a chain.
///
/// `submit_*` return as soon as the transaction hash is known; waiting for
/// inclusion is the tracker's job.
#[async_trait]
pub trait AppAuthBackend: Send + Sync {
    async fn chain_id(&self) -> OnchainResult<u64>;

    fn signer_address(&self) -> Address;

    async fn balance(&self, address: Address) -> OnchainResult<U256>;

    async fn has_code(&self, address: Address) -> OnchainResult<bool>;

    async fn submit_deploy(&self, kms_contract: Address, args: DeployArgs) -> OnchainResult<H256>;

    /// AppAuth contract registered for `app_id`, `None` when unregistered.
    async fn app_controller(&self, kms_contract: Address, app_id: Address) -> OnchainResult<Option<Address>>;

    async fn app_auth_owner(&self, app_auth: Address) -> OnchainResult<Address>;

    async fn submit_add_compose_hash(&self, app_auth: Address, compose_hash: [u8; 32]) -> OnchainResult<H256>;

    async fn receipt(&self, tx_hash: H256) -> OnchainResult<Option<TransactionReceipt>>;
}

/// Where and as whom to connect.
#[derive(Clone)]
pub struct ChainTarget {
    pub chain_id: u64,
    pub rpc_url: Option<String>,
    pub private_key: String,
}

impl std::fmt::Debug for ChainTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainTarget")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Builds backends on demand; lets the deploy pipeline swap in a fake chain.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, target: &ChainTarget) -> OnchainResult<Arc<dyn AppAuthBackend>>;
}

pub fn parse_address(field: &str, value: &str) -> OnchainResult<Address> {
    let bytes = decode_fixed::<20>(field, value)?;
    Ok(Address::from(bytes))
}

pub fn parse_bytes32(field: &str, value: &str) -> OnchainResult<[u8; 32]> {
    decode_fixed::<32>(field, value)
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> OnchainResult<[u8; N]> {
    let trimmed = value.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(stripped)
        .map_err(|e| OnchainError::InvalidArgument(format!("{} is not hex: {}", field, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        OnchainError::InvalidArgument(format!("{} must be {} bytes, got {}", field, N, b.len()))
    })
}

/// Full lowercase `0x…` rendering of an address.
pub fn hex_address(address: Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}
