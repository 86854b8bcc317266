//! Control-plane request and response records.
//!
//! Responses are open records: the fields the SDK relies on are typed and
//! required where the protocol needs them, everything else lands in `extra`
//! so newer servers never break older clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::manifest::ComposeFile;

// ==================== DISCOVERY ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub name: String,
    #[serde(default)]
    pub is_dev: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_image_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "teepod_id", alias = "node_id", alias = "id")]
    pub node_id: u64,
    pub name: String,
    #[serde(default)]
    pub listed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_vcpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_cvm_slots: Option<f64>,
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    #[serde(default)]
    pub support_onchain_kms: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmspc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// KMS descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmsInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_app_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KmsInfo {
    /// True when the KMS is anchored on a blockchain.
    pub fn is_onchain(&self) -> bool {
        self.chain_id.is_some() && self.kms_contract_address.is_some()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.slug.as_deref() == Some(key)
    }
}

/// `GET /teepods/available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableNodes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Value>,
    pub nodes: Vec<NodeInfo>,
    #[serde(default)]
    pub kms_list: Vec<KmsInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET /kms`: either a bare array or a paginated `{items}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KmsList {
    Page {
        items: Vec<KmsInfo>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Bare(Vec<KmsInfo>),
}

impl KmsList {
    pub fn into_vec(self) -> Vec<KmsInfo> {
        match self {
            KmsList::Page { items, .. } => items,
            KmsList::Bare(items) => items,
        }
    }
}

// ==================== PROVISION ====================

/// Answer of both provision endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub compose_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_env_encrypt_pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmspc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_image_hash: Option<String>,
    #[serde(default, alias = "teepod_id", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_info: Option<KmsInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `POST /cvms/{id}/compose_file/provision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProvisionRequest {
    #[serde(flatten)]
    pub compose: ComposeFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_env_vars: Option<bool>,
}

// ==================== COMMIT ====================

/// `POST /cvms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitCvmRequest {
    pub app_id: String,
    pub compose_hash: String,
    pub encrypted_env: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer_address: Option<String>,
}

/// `PATCH /cvms/{id}/compose_file`.
///
/// `encrypted_env: Some(..)` is always sent, even when it encrypts zero
/// variables; `None` leaves the running environment untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeUpdateCommit {
    pub compose_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_keys: Option<Vec<String>>,
}

/// Outcome of the update commit. Today the server answers 202 with no body;
/// a body, if one ever appears, is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateAccepted {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

// ==================== CVM ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CvmStatus {
    Creating,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    #[serde(other)]
    Unknown,
}

impl CvmStatus {
    /// No further server-driven transition is expected.
    pub fn is_settled(&self) -> bool {
        matches!(self, CvmStatus::Running | CvmStatus::Stopped | CvmStatus::Failed)
    }
}

impl Default for CvmStatus {
    fn default() -> Self {
        CvmStatus::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvmRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub status: CvmStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, alias = "teepod_id", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_env_pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_info: Option<KmsInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer_address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CvmRecord {
    /// The record belongs to a decentralized-KMS deployment.
    pub fn uses_onchain_kms(&self) -> bool {
        self.kms_info.as_ref().map(KmsInfo::is_onchain).unwrap_or(false)
    }
}

// ==================== KMS PUBKEY ====================

/// `GET /kms/{kms}/pubkey/{app_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmsPubkeyResponse {
    pub public_key: String,
    pub signature: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
