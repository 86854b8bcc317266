//! In-memory chain for exercising the registrar and deploy pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::EthEvent;
use ethers::types::{Address, Log, TransactionReceipt, H256, U256, U64};
use parking_lot::Mutex;

use crate::backend::{AppAuthBackend, ChainConnector, ChainTarget, DeployArgs};
use crate::bindings::AppDeployedViaFactoryFilter;
use crate::error::{OnchainError, OnchainResult};

/// How receipts behave once a transaction is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Mined,
    Reverted,
    /// Never mined; exercises timeout and abort.
    Never,
    /// `None` for the first `n` polls, then mined.
    MinedAfter(u32),
}

#[derive(Debug)]
struct FakeState {
    chain_id: u64,
    balance: U256,
    contracts: Vec<Address>,
    receipt_mode: ReceiptMode,
    polls: u32,
    submit_failures: u32,
    receipt_failures: u32,
    next_tx: u64,
    apps: HashMap<Address, Address>,
    owners: HashMap<Address, Address>,
    deploys: Vec<DeployArgs>,
    added_hashes: Vec<(Address, [u8; 32])>,
    receipts: HashMap<H256, TransactionReceipt>,
    new_app_id: Address,
    new_proxy: Address,
}

pub struct FakeChain {
    signer: Address,
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(chain_id: u64, signer: Address) -> Self {
        Self {
            signer,
            state: Mutex::new(FakeState {
                chain_id,
                balance: U256::exp10(18),
                contracts: Vec::new(),
                receipt_mode: ReceiptMode::Mined,
                polls: 0,
                submit_failures: 0,
                receipt_failures: 0,
                next_tx: 1,
                apps: HashMap::new(),
                owners: HashMap::new(),
                deploys: Vec::new(),
                added_hashes: Vec::new(),
                receipts: HashMap::new(),
                new_app_id: Address::from_low_u64_be(0xa11),
                new_proxy: Address::from_low_u64_be(0xa07),
            }),
        }
    }

    pub fn with_contract(self, address: Address) -> Self {
        self.state.lock().contracts.push(address);
        self
    }

    pub fn with_balance(self, balance: U256) -> Self {
        self.state.lock().balance = balance;
        self
    }

    pub fn with_receipt_mode(self, mode: ReceiptMode) -> Self {
        self.state.lock().receipt_mode = mode;
        self
    }

    /// First `n` submissions fail with a provider error.
    pub fn with_submit_failures(self, n: u32) -> Self {
        self.state.lock().submit_failures = n;
        self
    }

    /// First `n` receipt lookups fail with a provider error.
    pub fn with_receipt_failures(self, n: u32) -> Self {
        self.state.lock().receipt_failures = n;
        self
    }

    /// Identity the next deploy reports in its event.
    pub fn with_deploy_identity(self, app_id: Address, proxy: Address) -> Self {
        {
            let mut state = self.state.lock();
            state.new_app_id = app_id;
            state.new_proxy = proxy;
        }
        self
    }

    pub fn with_registered_app(self, app_id: Address, app_auth: Address, owner: Address) -> Self {
        {
            let mut state = self.state.lock();
            state.apps.insert(app_id, app_auth);
            state.owners.insert(app_auth, owner);
        }
        self
    }

    pub fn deploys(&self) -> Vec<DeployArgs> {
        self.state.lock().deploys.clone()
    }

    pub fn added_hashes(&self) -> Vec<(Address, [u8; 32])> {
        self.state.lock().added_hashes.clone()
    }

    fn record_tx(state: &mut FakeState, logs: Vec<Log>) -> OnchainResult<H256> {
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(OnchainError::Provider("connection reset".into()));
        }
        let tx_hash = H256::from_low_u64_be(state.next_tx);
        state.next_tx += 1;
        let status = if state.receipt_mode == ReceiptMode::Reverted { 0u64 } else { 1 };
        let receipt = TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(100 + state.next_tx)),
            status: Some(U64::from(status)),
            logs: if status == 1 { logs } else { Vec::new() },
            ..Default::default()
        };
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }
}

#[async_trait]
impl AppAuthBackend for FakeChain {
    async fn chain_id(&self) -> OnchainResult<u64> {
        Ok(self.state.lock().chain_id)
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn balance(&self, _address: Address) -> OnchainResult<U256> {
        Ok(self.state.lock().balance)
    }

    async fn has_code(&self, address: Address) -> OnchainResult<bool> {
        Ok(self.state.lock().contracts.contains(&address))
    }

    async fn submit_deploy(&self, kms_contract: Address, args: DeployArgs) -> OnchainResult<H256> {
        let mut state = self.state.lock();
        let (app_id, proxy) = (state.new_app_id, state.new_proxy);
        let log = Log {
            address: kms_contract,
            topics: vec![
                AppDeployedViaFactoryFilter::signature(),
                H256::from(app_id),
                H256::from(proxy),
                H256::from(args.deployer),
            ],
            ..Default::default()
        };
        let tx_hash = Self::record_tx(&mut state, vec![log])?;
        state.deploys.push(args);
        state.apps.insert(app_id, proxy);
        state.owners.insert(proxy, args.deployer);
        Ok(tx_hash)
    }

    async fn app_controller(&self, _kms_contract: Address, app_id: Address) -> OnchainResult<Option<Address>> {
        Ok(self.state.lock().apps.get(&app_id).copied())
    }

    async fn app_auth_owner(&self, app_auth: Address) -> OnchainResult<Address> {
        Ok(self.state.lock().owners.get(&app_auth).copied().unwrap_or_default())
    }

    async fn submit_add_compose_hash(&self, app_auth: Address, compose_hash: [u8; 32]) -> OnchainResult<H256> {
        let mut state = self.state.lock();
        let tx_hash = Self::record_tx(&mut state, Vec::new())?;
        state.added_hashes.push((app_auth, compose_hash));
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: H256) -> OnchainResult<Option<TransactionReceipt>> {
        let mut state = self.state.lock();
        if state.receipt_failures > 0 {
            state.receipt_failures -= 1;
            return Err(OnchainError::Provider("receipt lookup failed".into()));
        }
        state.polls += 1;
        match state.receipt_mode {
            ReceiptMode::Never => Ok(None),
            ReceiptMode::MinedAfter(n) if state.polls <= n => Ok(None),
            _ => Ok(state.receipts.get(&tx_hash).cloned()),
        }
    }
}

/// Hands out the same [`FakeChain`] for every target and remembers the
/// targets it was asked for.
pub struct FakeConnector {
    pub chain: Arc<FakeChain>,
    targets: Mutex<Vec<ChainTarget>>,
}

impl FakeConnector {
    pub fn new(chain: Arc<FakeChain>) -> Self {
        Self { chain, targets: Mutex::new(Vec::new()) }
    }

    pub fn targets(&self) -> Vec<ChainTarget> {
        self.targets.lock().clone()
    }
}

#[async_trait]
impl ChainConnector for FakeConnector {
    async fn connect(&self, target: &ChainTarget) -> OnchainResult<Arc<dyn AppAuthBackend>> {
        self.targets.lock().push(target.clone());
        Ok(self.chain.clone())
    }
}
