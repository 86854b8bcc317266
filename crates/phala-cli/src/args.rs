use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "phala-cloud")]
#[command(about = "Deploy and update confidential VMs on Phala Cloud", long_about = None)]
pub struct Cli {
    /// Control-plane API key
    #[arg(long, global = true, env = "PHALA_CLOUD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Control-plane base URL
    #[arg(long, global = true, env = "PHALA_CLOUD_API_PREFIX")]
    pub api_prefix: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a CVM from a docker-compose file
    Deploy(DeployArgs),

    /// Roll a new compose file or environment onto an existing CVM
    Update(UpdateArgs),

    /// List nodes, images and KMS instances available to the account
    Nodes,

    /// Show a CVM record
    Status {
        #[arg(long)]
        cvm_id: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// Key used to register the app on an on-chain KMS
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// RPC endpoint for the KMS chain
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Reject encryption keys not signed by this KMS key (compressed hex)
    #[arg(long)]
    pub kms_signer: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[arg(long)]
    pub name: String,

    /// docker-compose file
    #[arg(long)]
    pub compose: PathBuf,

    /// KEY=VALUE file; every key becomes part of the allow-list
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    #[arg(long)]
    pub node_id: Option<u64>,

    /// KMS id or slug
    #[arg(long)]
    pub kms: Option<String>,

    /// OS image, e.g. dstack-0.5.3
    #[arg(long)]
    pub image: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub vcpu: u32,

    /// Memory in MB
    #[arg(long, default_value_t = 2048)]
    pub memory: u32,

    /// Disk size in GB
    #[arg(long, default_value_t = 40)]
    pub disk_size: u32,

    #[command(flatten)]
    pub chain: ChainArgs,

    #[arg(long)]
    pub public_logs: bool,

    #[arg(long)]
    pub public_sysinfo: bool,

    /// Expose the app through the gateway
    #[arg(long)]
    pub gateway: bool,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// id, uuid, app_<id> or instance_<id>
    #[arg(long)]
    pub cvm_id: String,

    #[arg(long)]
    pub compose: Option<PathBuf>,

    /// Replaces the whole environment; an empty file clears it
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    #[command(flatten)]
    pub chain: ChainArgs,

    /// Wait until the CVM is running again
    #[arg(long)]
    pub wait: bool,

    #[arg(long, default_value_t = 300, requires = "wait")]
    pub wait_timeout_secs: u64,
}
