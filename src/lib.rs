//! Phala Cloud SDK.
//!
//! ```no_run
//! use phala_cloud::client::{ClientConfig, PhalaCloudClient};
//! use phala_cloud::deploy::{DeployRequest, Deployer};
//! use phala_cloud::crypto::EnvVar;
//! use phala_cloud::types::{ComposeFile, DeploymentManifest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = PhalaCloudClient::new(ClientConfig::from_env()?)?;
//! let manifest = DeploymentManifest::new(
//!     "hello",
//!     ComposeFile::new("services:\n  web:\n    image: nginx\n").with_allowed_envs(["GREETING"]),
//! );
//! let request = DeployRequest::new(manifest).with_envs(vec![EnvVar::new("GREETING", "hi")]);
//! let outcome = Deployer::new(client).deploy(request).await?;
//! println!("{} is {:?}", outcome.app_id, outcome.cvm.status);
//! # Ok(())
//! # }
//! ```

pub use phala_client as client;
pub use phala_crypto as crypto;
pub use phala_deploy as deploy;
pub use phala_onchain as onchain;
pub use phala_types as types;

pub use phala_client::{ClientConfig, PhalaCloudClient};
pub use phala_deploy::{DeployError, Deployer};
pub use phala_types::{CloudError, SafeResult};
