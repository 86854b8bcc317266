use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use phala_onchain::testing::{FakeChain, ReceiptMode};
use phala_onchain::{
    hex_address, AddComposeHashRequest, AppAuthRegistrar, CancellationToken, DeployAppAuthRequest,
    OnchainError, RetryPolicy, TxState, WaitOptions,
};

const CHAIN: u64 = 8453;

fn kms() -> Address {
    Address::from_low_u64_be(0x4b4d53)
}

fn signer() -> Address {
    Address::from_low_u64_be(0x5151)
}

fn hash() -> String {
    format!("0x{}", "ab".repeat(32))
}

fn fast_wait() -> WaitOptions {
    WaitOptions::default()
        .with_timeout(Duration::from_secs(2))
        .with_poll_interval(Duration::from_millis(5))
}

fn deploy_request() -> DeployAppAuthRequest {
    let mut request = DeployAppAuthRequest::new(hex_address(kms()), hash());
    request.chain_id = Some(CHAIN);
    request.wait = fast_wait();
    request
}

fn chain() -> FakeChain {
    FakeChain::new(CHAIN, signer()).with_contract(kms())
}

#[tokio::test]
async fn deploy_recovers_identity_from_event() {
    let app_id = Address::from_low_u64_be(0xdead);
    let proxy = Address::from_low_u64_be(0xbeef);
    let chain = Arc::new(chain().with_deploy_identity(app_id, proxy));
    let registrar = AppAuthRegistrar::new(chain.clone());

    let deployment = registrar.deploy_app_auth(&deploy_request()).await.unwrap();
    assert_eq!(deployment.app_id, hex_address(app_id));
    assert!(deployment.app_id.starts_with("0x"));
    assert_eq!(deployment.app_auth_address, hex_address(proxy));
    assert_eq!(deployment.deployer, hex_address(signer()));
    assert!(matches!(registrar.tx_state(), TxState::Success { .. }));

    let deploys = chain.deploys();
    assert_eq!(deploys.len(), 1);
    assert!(deploys[0].allow_any_device);
    assert_eq!(deploys[0].compose_hash, [0xab; 32]);
}

#[tokio::test]
async fn device_id_forces_bound_deployment() {
    let chain = Arc::new(chain());
    let registrar = AppAuthRegistrar::new(chain.clone());
    let mut request = deploy_request();
    request.device_id = Some("11".repeat(32));
    request.allow_any_device = Some(true);

    registrar.deploy_app_auth(&request).await.unwrap();
    let args = chain.deploys()[0];
    assert!(!args.allow_any_device);
    assert_eq!(args.device_id, [0x11; 32]);
}

#[tokio::test]
async fn preflight_rejects_before_submitting() {
    let wrong_chain = Arc::new(FakeChain::new(1, signer()).with_contract(kms()));
    let err = AppAuthRegistrar::new(wrong_chain.clone()).deploy_app_auth(&deploy_request()).await.unwrap_err();
    assert_eq!(err, OnchainError::ChainMismatch { expected: CHAIN, actual: 1 });
    assert!(wrong_chain.deploys().is_empty());

    let broke = Arc::new(chain().with_balance(U256::zero()));
    let registrar = AppAuthRegistrar::new(broke.clone());
    let err = registrar.deploy_app_auth(&deploy_request()).await.unwrap_err();
    assert!(matches!(err, OnchainError::InsufficientBalance { .. }));
    assert!(matches!(registrar.tx_state(), TxState::Error { aborted: false, tx_hash: None, .. }));

    let no_contract = Arc::new(FakeChain::new(CHAIN, signer()));
    let err = AppAuthRegistrar::new(no_contract).deploy_app_auth(&deploy_request()).await.unwrap_err();
    assert_eq!(err, OnchainError::ContractNotFound { address: kms() });
}

#[tokio::test]
async fn skipping_checks_submits_anyway() {
    let broke = Arc::new(FakeChain::new(CHAIN, signer()).with_balance(U256::zero()));
    let mut request = deploy_request();
    request.skip_prerequisite_checks = true;
    AppAuthRegistrar::new(broke.clone()).deploy_app_auth(&request).await.unwrap();
    assert_eq!(broke.deploys().len(), 1);
}

#[tokio::test]
async fn revert_carries_tx_hash() {
    let chain = Arc::new(chain().with_receipt_mode(ReceiptMode::Reverted));
    let registrar = AppAuthRegistrar::new(chain);
    let err = registrar.deploy_app_auth(&deploy_request()).await.unwrap_err();
    let tx_hash = err.tx_hash().unwrap();
    assert_eq!(err, OnchainError::Reverted { tx_hash });
    match registrar.tx_state() {
        TxState::Error { tx_hash: Some(h), aborted: false, .. } => assert_eq!(h, tx_hash),
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn timeout_is_distinct_from_error() {
    let chain = Arc::new(chain().with_receipt_mode(ReceiptMode::Never));
    let registrar = AppAuthRegistrar::new(chain);
    let mut request = deploy_request();
    request.wait = fast_wait().with_timeout(Duration::from_millis(50));

    let err = registrar.deploy_app_auth(&request).await.unwrap_err();
    assert!(matches!(err, OnchainError::Timeout { .. }));
    assert!(matches!(registrar.tx_state(), TxState::Timeout { .. }));
}

#[tokio::test]
async fn abort_ends_in_aborted_error() {
    let chain = Arc::new(chain().with_receipt_mode(ReceiptMode::Never));
    let registrar = AppAuthRegistrar::new(chain);
    let cancel = CancellationToken::new();
    let mut request = deploy_request();
    request.wait = fast_wait().with_cancel(cancel.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });
    let err = registrar.deploy_app_auth(&request).await.unwrap_err();
    trigger.await.unwrap();

    assert!(matches!(err, OnchainError::Aborted { tx_hash: Some(_) }));
    assert!(matches!(registrar.tx_state(), TxState::Error { aborted: true, tx_hash: Some(_), .. }));
}

#[tokio::test]
async fn receipt_wait_polls_until_mined() {
    let chain = Arc::new(chain().with_receipt_mode(ReceiptMode::MinedAfter(3)));
    let registrar = AppAuthRegistrar::new(chain);
    registrar.deploy_app_auth(&deploy_request()).await.unwrap();
    assert!(registrar.tx_state().is_terminal());
}

#[tokio::test]
async fn retry_recovers_from_provider_errors() {
    let chain = Arc::new(chain().with_submit_failures(2));
    let policy = RetryPolicy {
        max_attempts: 4,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        factor: 2.0,
    };
    let registrar = AppAuthRegistrar::new(chain.clone()).with_retry(policy.clone());
    registrar.deploy_app_auth(&deploy_request()).await.unwrap();
    assert_eq!(chain.deploys().len(), 1);

    let chain = Arc::new(self::chain().with_submit_failures(1));
    let registrar = AppAuthRegistrar::new(chain.clone()).with_retry_predicate(policy, Arc::new(|_: &OnchainError| false));
    assert!(matches!(
        registrar.deploy_app_auth(&deploy_request()).await,
        Err(OnchainError::Provider(_))
    ));
    assert!(chain.deploys().is_empty());
}

#[tokio::test]
async fn receipt_poll_failure_never_resubmits() {
    let chain = Arc::new(chain().with_receipt_failures(1));
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        factor: 2.0,
    };
    let registrar = AppAuthRegistrar::new(chain.clone()).with_retry(policy.clone());
    registrar.deploy_app_auth(&deploy_request()).await.unwrap();
    assert_eq!(chain.deploys().len(), 1);
    assert!(matches!(registrar.tx_state(), TxState::Success { .. }));

    let app_id = Address::from_low_u64_be(0xa99);
    let app_auth = Address::from_low_u64_be(0xa55);
    let chain = Arc::new(self::chain().with_registered_app(app_id, app_auth, signer()).with_receipt_failures(2));
    let registrar = AppAuthRegistrar::new(chain.clone()).with_retry(policy);
    let mut request = AddComposeHashRequest::new(hex_address(kms()), hex_address(app_id), hash());
    request.wait = fast_wait();
    registrar.add_compose_hash(&request).await.unwrap();
    assert_eq!(chain.added_hashes().len(), 1);
}

#[tokio::test]
async fn failing_receipts_end_in_timeout_not_retry() {
    let chain = Arc::new(chain().with_receipt_failures(u32::MAX));
    let policy = RetryPolicy { max_attempts: 3, initial_delay: Duration::from_millis(1), ..RetryPolicy::default() };
    let registrar = AppAuthRegistrar::new(chain.clone()).with_retry(policy);
    let mut request = deploy_request();
    request.wait = fast_wait().with_timeout(Duration::from_millis(50));

    let err = registrar.deploy_app_auth(&request).await.unwrap_err();
    assert!(matches!(err, OnchainError::Timeout { .. }));
    assert_eq!(chain.deploys().len(), 1);
}

#[tokio::test]
async fn add_compose_hash_targets_registered_app_auth() {
    let app_id = Address::from_low_u64_be(0xa99);
    let app_auth = Address::from_low_u64_be(0xa55);
    let chain = Arc::new(chain().with_registered_app(app_id, app_auth, signer()));
    let registrar = AppAuthRegistrar::new(chain.clone());

    let mut request = AddComposeHashRequest::new(hex_address(kms()), hex_address(app_id), hash());
    request.check_owner = true;
    request.wait = fast_wait();
    let registration = registrar.add_compose_hash(&request).await.unwrap();

    assert_eq!(registration.app_auth_address, hex_address(app_auth));
    assert_eq!(chain.added_hashes(), vec![(app_auth, [0xab; 32])]);
    assert!(chain.deploys().is_empty());
}

#[tokio::test]
async fn add_compose_hash_checks_registration_and_owner() {
    let app_id = Address::from_low_u64_be(0xa99);
    let app_auth = Address::from_low_u64_be(0xa55);
    let stranger = Address::from_low_u64_be(0x777);

    let unregistered = Arc::new(chain());
    let mut request = AddComposeHashRequest::new(hex_address(kms()), hex_address(app_id), hash());
    request.wait = fast_wait();
    let err = AppAuthRegistrar::new(unregistered).add_compose_hash(&request).await.unwrap_err();
    assert_eq!(err, OnchainError::NotRegistered { app_id });

    let foreign = Arc::new(chain().with_registered_app(app_id, app_auth, stranger));
    request.check_owner = true;
    let err = AppAuthRegistrar::new(foreign.clone()).add_compose_hash(&request).await.unwrap_err();
    assert_eq!(err, OnchainError::NotOwner { owner: stranger, signer: signer() });
    assert!(foreign.added_hashes().is_empty());
}

#[tokio::test]
async fn malformed_inputs_fail_without_touching_chain() {
    let chain = Arc::new(chain());
    let registrar = AppAuthRegistrar::new(chain.clone());
    let mut request = deploy_request();
    request.compose_hash = "0x1234".into();
    assert!(matches!(
        registrar.deploy_app_auth(&request).await,
        Err(OnchainError::InvalidArgument(_))
    ));
    assert!(chain.deploys().is_empty());
    assert_eq!(registrar.tx_state(), TxState::Idle);
}
