use thiserror::Error;

use phala_crypto::CryptoError;
use phala_onchain::OnchainError;
use phala_types::CloudError;

/// Why no deployment target could be chosen from a discovery snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no nodes are available to this account")]
    NoNodesAvailable,

    #[error("node {0} is not available")]
    NodeNotFound(u64),

    #[error("node {node_id} advertises no OS image")]
    NoImageAvailable { node_id: u64 },

    #[error("image {image} is not offered by node {node_id}")]
    ImageNotFound { node_id: u64, image: String },

    #[error("node {node_id} uses an on-chain KMS; pass a KMS id or slug")]
    KmsRequired { node_id: u64 },

    #[error("on-chain KMS deployments need a private key to register the app")]
    CredentialRequired,

    #[error("KMS {0} not found")]
    KmsNotFound(String),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Onchain(#[from] OnchainError),

    /// The encryption key was signed by a different KMS than the caller
    /// expected.
    #[error("KMS signer {actual} does not match expected {expected}")]
    KmsSignerMismatch { expected: String, actual: String },

    /// The control plane answered without a field the pipeline needs.
    #[error("control plane response is missing {0}")]
    MissingField(&'static str),
}

impl DeployError {
    /// Failed locally before any request left the process.
    pub fn is_local(&self) -> bool {
        match self {
            DeployError::Selection(SelectionError::CredentialRequired) => true,
            DeployError::Crypto(CryptoError::EnvNotAllowed(_)) => true,
            DeployError::Cloud(err) => err.is_validation(),
            _ => false,
        }
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
