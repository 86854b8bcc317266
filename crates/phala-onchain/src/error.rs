use ethers::types::{Address, H256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnchainError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// RPC transport failure before a transaction hash was obtained.
    /// Receipt polling never returns it.
    #[error("provider error: {0}")]
    Provider(String),

    /// The node or signer refused the transaction before it was broadcast.
    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("connected to chain {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("signer {address:?} has no balance to pay for gas")]
    InsufficientBalance { address: Address },

    #[error("no contract deployed at {address:?}")]
    ContractNotFound { address: Address },

    #[error("app {app_id:?} is not registered with the KMS")]
    NotRegistered { app_id: Address },

    #[error("signer {signer:?} does not own AppAuth contract (owner {owner:?})")]
    NotOwner { owner: Address, signer: Address },

    #[error("transaction {tx_hash:?} reverted")]
    Reverted { tx_hash: H256 },

    /// The receipt did not arrive in time. The transaction may still land.
    #[error("timed out waiting for transaction {tx_hash:?}")]
    Timeout { tx_hash: H256 },

    #[error("aborted while waiting for transaction {tx_hash:?}")]
    Aborted { tx_hash: Option<H256> },

    #[error("transaction {tx_hash:?} emitted no {event} event")]
    MissingEvent { tx_hash: H256, event: &'static str },
}

impl OnchainError {
    /// Default retry predicate: only failures that happened before anything
    /// reached the chain.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OnchainError::Provider(_))
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            OnchainError::Reverted { tx_hash }
            | OnchainError::Timeout { tx_hash }
            | OnchainError::MissingEvent { tx_hash, .. } => Some(*tx_hash),
            OnchainError::Aborted { tx_hash } => *tx_hash,
            _ => None,
        }
    }
}

pub type OnchainResult<T> = Result<T, OnchainError>;
