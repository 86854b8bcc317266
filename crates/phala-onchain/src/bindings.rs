//! Contract bindings generated from human-readable ABI fragments.

use ethers::contract::abigen;

abigen!(
    KmsAuth,
    r#"[
        function deployAndRegisterApp(address deployer, bool disableUpgrades, bool allowAnyDevice, bytes32 initialDeviceId, bytes32 initialComposeHash) external returns (address appId, address proxyAddress)
        function apps(address appId) external view returns (bool isRegistered, address controller)
        event AppDeployedViaFactory(address indexed appId, address indexed proxyAddress, address indexed deployer)
    ]"#
);

abigen!(
    AppAuth,
    r#"[
        function addComposeHash(bytes32 composeHash) external
        function owner() external view returns (address)
    ]"#
);
