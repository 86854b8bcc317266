//! On-chain half of decentralized-KMS deployments.
//!
//! Before a CVM bound to an on-chain KMS can boot, its compose hash must be
//! whitelisted by an AppAuth contract: either a new one deployed through the
//! KMS factory, or the app's existing one. [`AppAuthRegistrar`] performs both,
//! tracking each transaction through [`TxState`].

pub mod backend;
pub mod bindings;
pub mod error;
pub mod ethers_backend;
pub mod registrar;
pub mod retry;
pub mod tracker;

pub use backend::{hex_address, AppAuthBackend, ChainConnector, ChainTarget, DeployArgs};
pub use error::{OnchainError, OnchainResult};
pub use ethers_backend::{default_rpc_url, EthersBackend, EthersConnector};
pub use registrar::{
    effective_allow_any_device, AddComposeHashRequest, AppAuthDeployment, AppAuthRegistrar,
    ComposeHashRegistration, DeployAppAuthRequest, RetryPredicate,
};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use tracker::{TransactionTracker, TxState, WaitOptions};

#[cfg(feature = "test-util")]
pub mod testing;
