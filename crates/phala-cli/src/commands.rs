use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use phala_client::{ClientConfig, PhalaCloudClient};
use phala_deploy::{ChainCredentials, DeployRequest, Deployer, UpdateRequest};
use phala_onchain::{CancellationToken, WaitOptions};
use phala_types::{ComposeFile, ComposePatch, CvmIdentifier, DeploymentManifest};

use crate::args::{ChainArgs, Cli, Commands, DeployArgs, UpdateArgs};
use crate::env_file::read_env_file;

pub async fn run(cli: Cli) -> Result<()> {
    let client = build_client(&cli)?;
    match cli.command {
        Commands::Deploy(args) => deploy(client, args).await,
        Commands::Update(args) => update(client, args).await,
        Commands::Nodes => print_json(&client.get_available_nodes().await?),
        Commands::Status { cvm_id } => print_json(&client.get_cvm_info(&CvmIdentifier::parse(&cvm_id)).await?),
    }
}

fn build_client(cli: &Cli) -> Result<PhalaCloudClient> {
    let mut config = ClientConfig::from_env()?;
    if let Some(key) = &cli.api_key {
        config = config.with_api_key(key.clone());
    }
    if let Some(prefix) = &cli.api_prefix {
        config = config.with_base_url(prefix.clone());
    }
    Ok(PhalaCloudClient::new(config)?)
}

/// Ctrl-C aborts the receipt wait; a submitted transaction stays in flight.
fn interruptible_wait() -> WaitOptions {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; abandoning receipt wait");
            token.cancel();
        }
    });
    WaitOptions::default().with_cancel(cancel)
}

fn credentials(chain: &ChainArgs) -> Option<ChainCredentials> {
    chain.private_key.as_ref().map(|key| {
        let creds = ChainCredentials::new(key.clone());
        match &chain.rpc_url {
            Some(url) => creds.with_rpc_url(url.clone()),
            None => creds,
        }
    })
}

async fn deploy(client: PhalaCloudClient, args: DeployArgs) -> Result<()> {
    let compose_text = std::fs::read_to_string(&args.compose)
        .with_context(|| format!("cannot read compose file {}", args.compose.display()))?;
    let envs = match &args.env_file {
        Some(path) => read_env_file(path)?,
        None => Vec::new(),
    };

    let mut compose = ComposeFile::new(compose_text).with_allowed_envs(envs.iter().map(|e| e.key.clone()));
    compose.public_logs = args.public_logs;
    compose.public_sysinfo = args.public_sysinfo;
    compose.gateway_enabled = Some(args.gateway);

    let mut manifest = DeploymentManifest::new(args.name.clone(), compose);
    manifest.vcpu = args.vcpu;
    manifest.memory = args.memory;
    manifest.disk_size = args.disk_size;
    manifest.node_id = args.node_id;
    manifest.image = args.image.clone();

    let mut request = DeployRequest::new(manifest).with_envs(envs);
    request.kms = args.kms.clone();
    request.credentials = credentials(&args.chain);
    request.kms_signer = args.chain.kms_signer.clone();

    let deployer = Deployer::new(client).with_wait(interruptible_wait());
    let outcome = deployer.deploy(request).await?;
    info!(app_id = %outcome.app_id, node_id = outcome.node_id, "CVM created");
    print_json(&outcome)
}

async fn update(client: PhalaCloudClient, args: UpdateArgs) -> Result<()> {
    let mut patch = ComposePatch::default();
    if let Some(path) = &args.compose {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read compose file {}", path.display()))?;
        patch.docker_compose_file = Some(text);
    }
    let envs = match &args.env_file {
        Some(path) => Some(read_env_file(path)?),
        None => None,
    };
    if let Some(envs) = &envs {
        patch.allowed_envs = Some(envs.iter().map(|e| e.key.clone()).collect());
    }

    let mut request = UpdateRequest::new(CvmIdentifier::parse(&args.cvm_id));
    request.patch = patch;
    request.envs = envs;
    request.credentials = credentials(&args.chain);
    request.kms_signer = args.chain.kms_signer.clone();
    request.wait_for_running = args.wait.then(|| Duration::from_secs(args.wait_timeout_secs));

    let deployer = Deployer::new(client).with_wait(interruptible_wait());
    let outcome = deployer.update(request).await?;
    info!(compose_hash = %outcome.compose_hash, "update accepted");
    print_json(&outcome)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
