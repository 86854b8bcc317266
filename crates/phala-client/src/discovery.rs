use reqwest::Method;
use tracing::info;

use phala_types::{AvailableNodes, CloudError, KmsInfo, KmsList, KmsPubkeyResponse};

use crate::client::PhalaCloudClient;

/// A KMS encryption key together with the signer recovered from it.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPubkey {
    pub public_key: String,
    /// 0x-prefixed compressed secp256k1 key of the KMS that signed it.
    pub signer: String,
}

impl PhalaCloudClient {
    /// `GET /teepods/available`.
    pub async fn get_available_nodes(&self) -> Result<AvailableNodes, CloudError> {
        let nodes: AvailableNodes = self.request_json(Method::GET, "/teepods/available", None).await?;
        info!(nodes = nodes.nodes.len(), kms = nodes.kms_list.len(), "fetched available nodes");
        Ok(nodes)
    }

    /// `GET /kms`; accepts both the paginated and the bare-array answer.
    pub async fn list_kms(&self) -> Result<Vec<KmsInfo>, CloudError> {
        let list: KmsList = self.request_json(Method::GET, "/kms", None).await?;
        Ok(list.into_vec())
    }

    /// `GET /kms/{kms}/pubkey/{app_id}`.
    pub async fn get_kms_pubkey(&self, kms: &str, app_id: &str) -> Result<KmsPubkeyResponse, CloudError> {
        let path = format!("/kms/{}/pubkey/{}", kms, app_id);
        self.request_json(Method::GET, &path, None).await
    }

    /// Fetch the env encryption key for `app_id` and recover who signed it.
    ///
    /// A malformed or unrecoverable signature is a validation error.
    pub async fn get_verified_kms_pubkey(&self, kms: &str, app_id: &str) -> Result<VerifiedPubkey, CloudError> {
        let response = self.get_kms_pubkey(kms, app_id).await?;
        let signer = phala_crypto::verify_env_encrypt_public_key(&response.public_key, &response.signature, app_id)
            .map_err(|e| phala_types::SchemaError::single("signature", e.to_string()))?;
        Ok(VerifiedPubkey { public_key: response.public_key, signer })
    }
}
