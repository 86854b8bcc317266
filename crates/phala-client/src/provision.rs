//! Two-phase provision/commit endpoints.
//!
//! Provisioning asks the control plane to hash and stage a manifest; the
//! commit turns the staged manifest into a running (or updated) CVM. Manifests
//! pass through the compatibility normalizer exactly once, here.

use reqwest::Method;
use tracing::info;

use phala_types::compat::{normalize_compose, normalize_manifest};
use phala_types::{
    CloudError, CommitCvmRequest, ComposeFile, ComposeUpdateCommit, CvmIdentifier, CvmRecord,
    DeploymentManifest, ProvisionResult, UpdateAccepted, UpdateProvisionRequest,
};

use crate::client::{to_body, PhalaCloudClient};

impl PhalaCloudClient {
    /// `POST /cvms/provision`.
    pub async fn provision_cvm(&self, manifest: DeploymentManifest) -> Result<ProvisionResult, CloudError> {
        manifest.validate()?;
        let manifest = normalize_manifest(manifest, self.sink());
        let body = to_body("provision_cvm", &manifest)?;
        let result: ProvisionResult = self.request_json(Method::POST, "/cvms/provision", Some(body)).await?;
        info!(
            compose_hash = %result.compose_hash,
            app_id = result.app_id.as_deref().unwrap_or("-"),
            "provisioned CVM"
        );
        Ok(result)
    }

    /// `POST /cvms`.
    pub async fn commit_cvm_provision(&self, request: &CommitCvmRequest) -> Result<CvmRecord, CloudError> {
        let body = to_body("commit_cvm_provision", request)?;
        let record: CvmRecord = self.request_json(Method::POST, "/cvms", Some(body)).await?;
        info!(name = %record.name, status = ?record.status, "committed CVM");
        Ok(record)
    }

    /// `POST /cvms/{id}/compose_file/provision`.
    pub async fn provision_cvm_compose_file_update(
        &self,
        cvm: &CvmIdentifier,
        mut compose: ComposeFile,
        update_env_vars: Option<bool>,
    ) -> Result<ProvisionResult, CloudError> {
        let segment = cvm.resolve()?;
        normalize_compose(&mut compose, self.sink());
        let body = to_body(
            "provision_cvm_compose_file_update",
            &UpdateProvisionRequest { compose, update_env_vars },
        )?;
        let path = format!("/cvms/{}/compose_file/provision", segment);
        self.request_json(Method::POST, &path, Some(body)).await
    }

    /// `PATCH /cvms/{id}/compose_file`.
    ///
    /// The server answers 202 without a body; the caller polls
    /// [`get_cvm_info`](Self::get_cvm_info) to observe the result.
    pub async fn commit_cvm_compose_file_update(
        &self,
        cvm: &CvmIdentifier,
        commit: &ComposeUpdateCommit,
    ) -> Result<UpdateAccepted, CloudError> {
        let segment = cvm.resolve()?;
        let body = to_body("commit_cvm_compose_file_update", commit)?;
        let path = format!("/cvms/{}/compose_file", segment);
        let (status, body) = self.request_with_status(Method::PATCH, &path, Some(body)).await?;
        info!(cvm = %segment, status, "compose update accepted");
        Ok(UpdateAccepted { status, body })
    }
}
