//! Node and KMS selection over a discovery snapshot.
//!
//! Pure: no I/O happens here. The pipeline fetches `GET /teepods/available`
//! (and `GET /kms` when a KMS was named) and hands both lists in.

use serde::Serialize;
use tracing::debug;

use phala_types::{AvailableNodes, KmsInfo, NodeInfo};

use crate::error::SelectionError;

#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub node_id: Option<u64>,
    /// KMS id or slug.
    pub kms: Option<String>,
    pub image: Option<String>,
    /// A signing credential is on hand for the on-chain registration.
    pub has_credential: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub node: NodeInfo,
    pub image: String,
    /// Always set for nodes backed by an on-chain KMS.
    pub kms: Option<KmsInfo>,
}

impl Selection {
    /// The deployment goes through the App-Auth registrar.
    pub fn is_onchain(&self) -> bool {
        self.node.support_onchain_kms && self.kms.as_ref().map(KmsInfo::is_onchain).unwrap_or(false)
    }
}

/// Pick exactly one node, one image, and (for on-chain nodes) one KMS.
///
/// `kms_list` is the standalone KMS list; when it is empty the descriptors
/// embedded in the snapshot are searched instead.
pub fn select_target(
    snapshot: &AvailableNodes,
    kms_list: &[KmsInfo],
    request: &SelectionRequest,
) -> Result<Selection, SelectionError> {
    let node = select_node(snapshot, request.node_id)?;
    let image = select_image(node, request.image.as_deref())?;

    let kms_key = request.kms.as_deref().map(str::trim).filter(|k| !k.is_empty());
    if node.support_onchain_kms {
        if kms_key.is_none() {
            return Err(SelectionError::KmsRequired { node_id: node.node_id });
        }
        if !request.has_credential {
            return Err(SelectionError::CredentialRequired);
        }
    }
    let kms = match kms_key {
        Some(key) => Some(find_kms(snapshot, kms_list, key)?),
        None => None,
    };

    debug!(
        node_id = node.node_id,
        image = %image,
        kms = kms.as_ref().map(|k| k.id.as_str()).unwrap_or("-"),
        "selected deployment target"
    );
    Ok(Selection { node: node.clone(), image, kms })
}

fn select_node(snapshot: &AvailableNodes, node_id: Option<u64>) -> Result<&NodeInfo, SelectionError> {
    if snapshot.nodes.is_empty() {
        return Err(SelectionError::NoNodesAvailable);
    }
    match node_id {
        Some(id) => snapshot
            .nodes
            .iter()
            .find(|n| n.node_id == id)
            .ok_or(SelectionError::NodeNotFound(id)),
        None => Ok(&snapshot.nodes[0]),
    }
}

fn select_image(node: &NodeInfo, requested: Option<&str>) -> Result<String, SelectionError> {
    match requested {
        Some(name) => node
            .images
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.name.clone())
            .ok_or_else(|| SelectionError::ImageNotFound { node_id: node.node_id, image: name.to_string() }),
        None => node
            .images
            .first()
            .map(|i| i.name.clone())
            .ok_or(SelectionError::NoImageAvailable { node_id: node.node_id }),
    }
}

fn find_kms(snapshot: &AvailableNodes, kms_list: &[KmsInfo], key: &str) -> Result<KmsInfo, SelectionError> {
    let candidates = if kms_list.is_empty() { &snapshot.kms_list } else { kms_list };
    candidates
        .iter()
        .find(|k| k.matches(key))
        .cloned()
        .ok_or_else(|| SelectionError::KmsNotFound(key.to_string()))
}
