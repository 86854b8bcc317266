//! End-to-end CVM deployment.
//!
//! [`Deployer::deploy`] creates a CVM from a manifest and
//! [`Deployer::update`] rolls a new compose file (and optionally a new
//! environment) onto an existing one. Both pick the centralized or on-chain
//! KMS branch from what the control plane reports.

pub mod deployer;
pub mod error;
pub mod selector;

pub use deployer::{
    ChainCredentials, DeployOutcome, DeployRequest, Deployer, UpdateOutcome, UpdateRequest, DEFAULT_STATUS_POLL,
};
pub use error::{DeployError, DeployResult, SelectionError};
pub use selector::{select_target, Selection, SelectionRequest};
