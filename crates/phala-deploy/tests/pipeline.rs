use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use x25519_dalek::{PublicKey, StaticSecret};

use phala_client::{ClientConfig, PhalaCloudClient};
use phala_crypto::kms_signature::pubkey_signature_message;
use phala_crypto::{decrypt_env_vars, CryptoError, EnvVar};
use phala_deploy::{ChainCredentials, DeployError, DeployRequest, Deployer, SelectionError, UpdateRequest};
use phala_onchain::testing::{FakeChain, FakeConnector};
use phala_onchain::{hex_address, WaitOptions};
use phala_types::{ComposeFile, ComposePatch, CvmIdentifier, CvmStatus, DeploymentManifest};

const APP: &str = "ea549f02e1a25fabd1cb788380e033ec5461b2ff";
const TEE_SECRET: [u8; 32] = [9; 32];
const PRIVATE_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

fn compose_hash() -> String {
    format!("{}{}", APP, "0123456789abcdef01234567")
}

fn tee_pubkey() -> String {
    hex::encode(PublicKey::from(&StaticSecret::from(TEE_SECRET)).as_bytes())
}

fn signer() -> Address {
    Address::from_low_u64_be(0x5151)
}

fn kms_contract() -> Address {
    Address::from_low_u64_be(0x4b4d53)
}

fn client(server: &MockServer) -> PhalaCloudClient {
    PhalaCloudClient::new(ClientConfig::default().with_api_key("phak_test").with_base_url(server.uri())).unwrap()
}

fn deployer(server: &MockServer, chain: Arc<FakeChain>) -> (Deployer, Arc<FakeConnector>) {
    let connector = Arc::new(FakeConnector::new(chain));
    let deployer = Deployer::new(client(server))
        .with_connector(connector.clone())
        .with_wait(
            WaitOptions::default()
                .with_timeout(Duration::from_secs(2))
                .with_poll_interval(Duration::from_millis(5)),
        )
        .with_status_poll_interval(Duration::from_millis(10));
    (deployer, connector)
}

fn fake_chain() -> FakeChain {
    FakeChain::new(8453, signer()).with_contract(kms_contract())
}

async fn mount_nodes(server: &MockServer, nodes: Value) {
    Mock::given(method("GET"))
        .and(path("/teepods/available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes))
        .mount(server)
        .await;
}

fn central_nodes() -> Value {
    json!({
        "nodes": [{"teepod_id": 1, "name": "prod-1", "images": [{"name": "dstack-0.5.3"}]}],
        "kms_list": []
    })
}

fn onchain_nodes() -> Value {
    json!({
        "nodes": [{"teepod_id": 5, "name": "base-1", "support_onchain_kms": true, "images": [{"name": "dstack-0.5.3"}]}],
        "kms_list": [{
            "id": "kms_base",
            "slug": "base-prod",
            "chain_id": 8453,
            "kms_contract_address": hex_address(kms_contract())
        }]
    })
}

fn manifest(allowed: &[&str]) -> DeploymentManifest {
    DeploymentManifest::new(
        "demo",
        ComposeFile::new("services:\n  web:\n    image: nginx\n").with_allowed_envs(allowed.iter().copied()),
    )
}

async fn request_body(server: &MockServer, verb: &str, route: &str) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.method.to_string() == verb && r.url.path() == route)
        .unwrap_or_else(|| panic!("no {} {}", verb, route));
    serde_json::from_slice(&request.body).unwrap()
}

async fn received_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
}

fn sign_pubkey(app_id: Address, public_key_hex: &str) -> String {
    let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
    let prehash = pubkey_signature_message(app_id.as_bytes(), &hex::decode(public_key_hex).unwrap());
    let (sig, rid) = key.sign_prehash_recoverable(&prehash).unwrap();
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(rid.to_byte());
    hex::encode(bytes)
}

#[tokio::test]
async fn centralized_deploy_commits_with_derived_app_id() {
    let server = MockServer::start().await;
    mount_nodes(&server, central_nodes()).await;
    Mock::given(method("POST"))
        .and(path("/cvms/provision"))
        .and(body_partial_json(json!({"node_id": 1, "image": "dstack-0.5.3", "compose_file": {"name": "demo"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compose_hash": compose_hash(),
            "app_env_encrypt_pubkey": tee_pubkey(),
            "node_id": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cvms"))
        .and(body_partial_json(json!({"app_id": APP, "compose_hash": compose_hash(), "env_keys": ["API_TOKEN"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7, "name": "demo", "status": "creating", "app_id": APP
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (deployer, connector) = deployer(&server, Arc::new(fake_chain()));
    let request = DeployRequest::new(manifest(&["API_TOKEN"])).with_envs(vec![EnvVar::new("API_TOKEN", "s3cret")]);
    let outcome = deployer.deploy(request).await.unwrap();

    assert_eq!(outcome.app_id, APP);
    assert_eq!(outcome.cvm.status, CvmStatus::Creating);
    assert!(outcome.app_auth.is_none());
    assert!(connector.targets().is_empty());

    let commit = request_body(&server, "POST", "/cvms").await;
    assert!(commit.get("contract_address").is_none());
    let blob = commit["encrypted_env"].as_str().unwrap();
    let envs = decrypt_env_vars(blob, &TEE_SECRET).unwrap();
    assert_eq!(envs, vec![EnvVar::new("API_TOKEN", "s3cret")]);
}

fn kms_signer_key() -> String {
    let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
    format!("0x{}", hex::encode(key.verifying_key().to_encoded_point(true).as_bytes()))
}

async fn mount_onchain_deploy(server: &MockServer, app_id: Address, proxy: Address) {
    let pubkey = tee_pubkey();
    mount_nodes(server, onchain_nodes()).await;
    Mock::given(method("GET"))
        .and(path("/kms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cvms/provision"))
        .and(body_partial_json(json!({"node_id": 5, "kms_id": "kms_base"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compose_hash": compose_hash(),
            "node_id": 5,
            "kms_id": "kms_base"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/kms/base-prod/pubkey/{}", hex_address(app_id))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "public_key": pubkey,
            "signature": sign_pubkey(app_id, &pubkey)
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cvms"))
        .and(body_partial_json(json!({
            "app_id": hex_address(app_id),
            "kms_id": "kms_base",
            "contract_address": hex_address(proxy),
            "deployer_address": hex_address(signer())
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 8, "name": "demo", "status": "creating", "app_id": hex_address(app_id)
        })))
        .mount(server)
        .await;
}

async fn count_requests(server: &MockServer, verb: &str, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.to_string() == verb && r.url.path() == route)
        .count()
}

#[tokio::test]
async fn onchain_deploy_registers_app_auth_before_commit() {
    let server = MockServer::start().await;
    let app_id = Address::from_low_u64_be(0xdead);
    let proxy = Address::from_low_u64_be(0xbeef);
    mount_onchain_deploy(&server, app_id, proxy).await;

    let chain = Arc::new(fake_chain().with_deploy_identity(app_id, proxy));
    let (deployer, connector) = deployer(&server, chain.clone());
    let request = DeployRequest::new(manifest(&["DB_URL"]))
        .with_kms("base-prod")
        .with_envs(vec![EnvVar::new("DB_URL", "postgres://db")])
        .with_credentials(ChainCredentials::new(PRIVATE_KEY))
        .with_kms_signer(kms_signer_key());
    let outcome = deployer.deploy(request).await.unwrap();

    assert!(outcome.app_id.starts_with("0x"));
    let app_auth = outcome.app_auth.unwrap();
    assert_eq!(app_auth.app_auth_address, hex_address(proxy));
    assert_eq!(count_requests(&server, "POST", "/cvms").await, 1);

    let targets = connector.targets();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].chain_id, 8453);
    assert_eq!(targets[0].rpc_url, None);

    let deploys = chain.deploys();
    assert_eq!(hex::encode(deploys[0].compose_hash), compose_hash());
    assert!(deploys[0].allow_any_device);
}

#[tokio::test]
async fn manifest_kms_id_selects_the_kms() {
    let server = MockServer::start().await;
    let app_id = Address::from_low_u64_be(0xdead);
    let proxy = Address::from_low_u64_be(0xbeef);
    mount_onchain_deploy(&server, app_id, proxy).await;

    let chain = Arc::new(fake_chain().with_deploy_identity(app_id, proxy));
    let (deployer, _) = deployer(&server, chain.clone());
    let mut manifest = manifest(&[]);
    manifest.kms_id = Some("kms_base".into());
    let request = DeployRequest::new(manifest).with_credentials(ChainCredentials::new(PRIVATE_KEY));
    let outcome = deployer.deploy(request).await.unwrap();

    assert_eq!(outcome.kms_id.as_deref(), Some("kms_base"));
    assert_eq!(chain.deploys().len(), 1);
    let provision = request_body(&server, "POST", "/cvms/provision").await;
    assert_eq!(provision["kms_id"], "kms_base");
}

#[tokio::test]
async fn unexpected_kms_signer_blocks_commit() {
    let server = MockServer::start().await;
    let app_id = Address::from_low_u64_be(0xdead);
    let proxy = Address::from_low_u64_be(0xbeef);
    mount_onchain_deploy(&server, app_id, proxy).await;

    let chain = Arc::new(fake_chain().with_deploy_identity(app_id, proxy));
    let (deployer, _) = deployer(&server, chain);
    let other = format!("0x02{}", "11".repeat(32));
    let request = DeployRequest::new(manifest(&[]))
        .with_kms("base-prod")
        .with_credentials(ChainCredentials::new(PRIVATE_KEY))
        .with_kms_signer(other.clone());
    let err = deployer.deploy(request).await.unwrap_err();

    match err {
        DeployError::KmsSignerMismatch { expected, actual } => {
            assert_eq!(expected, other);
            assert_eq!(actual, kms_signer_key());
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(count_requests(&server, "POST", "/cvms").await, 0);
}

#[tokio::test]
async fn onchain_node_without_key_stops_after_discovery() {
    let server = MockServer::start().await;
    mount_nodes(&server, onchain_nodes()).await;
    Mock::given(method("GET"))
        .and(path("/kms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (deployer, _) = deployer(&server, Arc::new(fake_chain()));
    let err = deployer
        .deploy(DeployRequest::new(manifest(&[])).with_kms("kms_base"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Selection(SelectionError::CredentialRequired)));
    assert_eq!(received_paths(&server).await, vec!["/teepods/available", "/kms"]);
}

#[tokio::test]
async fn allow_list_is_enforced_before_any_request() {
    let server = MockServer::start().await;
    let (deployer, _) = deployer(&server, Arc::new(fake_chain()));

    let mut manifest = manifest(&["PUBLIC_URL"]);
    manifest.image = Some("dstack-0.5.3".into());
    let request = DeployRequest::new(manifest).with_envs(vec![
        EnvVar::new("PUBLIC_URL", "https://x"),
        EnvVar::new("SECRET", "y"),
    ]);
    let err = deployer.deploy(request).await.unwrap_err();

    assert!(err.is_local());
    assert!(matches!(err, DeployError::Crypto(CryptoError::EnvNotAllowed(ref names)) if names == &["SECRET"]));
    assert!(received_paths(&server).await.is_empty());
}

#[tokio::test]
async fn allow_list_uses_selected_image_before_provisioning() {
    let server = MockServer::start().await;
    mount_nodes(&server, central_nodes()).await;
    let (deployer, _) = deployer(&server, Arc::new(fake_chain()));

    let request = DeployRequest::new(manifest(&[])).with_envs(vec![EnvVar::new("SECRET", "y")]);
    let err = deployer.deploy(request).await.unwrap_err();
    assert!(matches!(err, DeployError::Crypto(CryptoError::EnvNotAllowed(_))));
    assert_eq!(received_paths(&server).await, vec!["/teepods/available"]);
}

async fn mount_existing_cvm(server: &MockServer, record: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/cvms/app_{}", APP)))
        .respond_with(ResponseTemplate::new(200).set_body_json(record))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/cvms/app_{}/compose_file", APP)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docker_compose_file": "old",
            "allowed_envs": [],
            "tproxy_enabled": true
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn update_with_empty_environment_sends_explicit_blob() {
    let server = MockServer::start().await;
    let new_hash = "f".repeat(64);
    mount_existing_cvm(
        &server,
        json!({"id": 7, "name": "demo", "status": "running", "app_id": APP, "base_image": "dstack-0.5.3"}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(format!("/cvms/app_{}/compose_file/provision", APP)))
        .and(body_partial_json(json!({
            "docker_compose_file": "new",
            "gateway_enabled": true,
            "update_env_vars": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compose_hash": new_hash,
            "app_env_encrypt_pubkey": tee_pubkey()
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/cvms/app_{}/compose_file", APP)))
        .and(body_partial_json(json!({"compose_hash": new_hash, "env_keys": []})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let (deployer, connector) = deployer(&server, Arc::new(fake_chain()));
    let mut request = UpdateRequest::new(CvmIdentifier::by_app_id(APP));
    request.patch = ComposePatch { docker_compose_file: Some("new".into()), ..Default::default() };
    request.envs = Some(Vec::new());
    request.wait_for_running = Some(Duration::from_secs(1));
    let outcome = deployer.update(request).await.unwrap();

    assert_eq!(outcome.accepted.status, 202);
    assert_eq!(outcome.cvm.unwrap().status, CvmStatus::Running);
    assert!(outcome.registration.is_none());
    assert!(connector.targets().is_empty());

    let commit = request_body(&server, "PATCH", &format!("/cvms/app_{}/compose_file", APP)).await;
    let blob = commit["encrypted_env"].as_str().unwrap();
    assert_eq!(blob.len(), 2 * (32 + 12 + 10 + 16));
    assert!(decrypt_env_vars(blob, &TEE_SECRET).unwrap().is_empty());
}

fn onchain_record() -> Value {
    json!({
        "id": 9,
        "name": "demo",
        "status": "running",
        "app_id": APP,
        "kms_info": {"id": "kms_base", "slug": "base-prod", "chain_id": 8453, "kms_contract_address": hex_address(kms_contract())}
    })
}

#[tokio::test]
async fn onchain_update_appends_compose_hash() {
    let server = MockServer::start().await;
    let new_hash = "c".repeat(64);
    mount_existing_cvm(&server, onchain_record()).await;
    Mock::given(method("POST"))
        .and(path(format!("/cvms/app_{}/compose_file/provision", APP)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"compose_hash": new_hash})))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/cvms/app_{}/compose_file", APP)))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let app_id: Address = format!("0x{}", APP).parse().unwrap();
    let app_auth = Address::from_low_u64_be(0xa55);
    let chain = Arc::new(fake_chain().with_registered_app(app_id, app_auth, signer()));
    let (deployer, _) = deployer(&server, chain.clone());

    let mut request = UpdateRequest::new(CvmIdentifier::by_app_id(APP));
    request.credentials = Some(ChainCredentials::new(PRIVATE_KEY).with_rpc_url("http://127.0.0.1:8545"));
    let outcome = deployer.update(request).await.unwrap();

    let registration = outcome.registration.unwrap();
    assert_eq!(registration.app_auth_address, hex_address(app_auth));
    assert_eq!(chain.added_hashes(), vec![(app_auth, [0xcc; 32])]);

    let commit = request_body(&server, "PATCH", &format!("/cvms/app_{}/compose_file", APP)).await;
    assert!(commit.get("encrypted_env").is_none());
    assert!(commit.get("env_keys").is_none());
}

#[tokio::test]
async fn onchain_update_without_key_fails_before_provision() {
    let server = MockServer::start().await;
    mount_existing_cvm(&server, onchain_record()).await;
    let (deployer, _) = deployer(&server, Arc::new(fake_chain()));

    let err = deployer.update(UpdateRequest::new(CvmIdentifier::by_app_id(APP))).await.unwrap_err();
    assert!(matches!(err, DeployError::Selection(SelectionError::CredentialRequired)));
    assert!(!received_paths(&server).await.iter().any(|p| p.ends_with("/provision")));
}

#[tokio::test]
async fn missing_identifier_is_a_local_validation_error() {
    let server = MockServer::start().await;
    let (deployer, _) = deployer(&server, Arc::new(fake_chain()));

    let err = deployer.update(UpdateRequest::new(CvmIdentifier::default())).await.unwrap_err();
    match &err {
        DeployError::Cloud(cloud) => assert!(cloud.is_validation()),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.is_local());
    assert!(received_paths(&server).await.is_empty());
}
