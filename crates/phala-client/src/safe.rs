//! Non-throwing variants of the client operations.
//!
//! Every `safe_*` method is the matching `Result` method passed through
//! [`safe`]; there is no second implementation to drift.

use std::future::Future;

use phala_types::{
    AvailableNodes, CloudError, CommitCvmRequest, ComposeFile, ComposeUpdateCommit, CvmIdentifier,
    CvmRecord, DeploymentManifest, KmsInfo, ProvisionResult, SafeResult, UpdateAccepted,
};

use crate::client::PhalaCloudClient;

/// Turn any fallible SDK future into a [`SafeResult`].
pub async fn safe<T, F>(operation: F) -> SafeResult<T>
where
    F: Future<Output = Result<T, CloudError>>,
{
    operation.await.into()
}

impl PhalaCloudClient {
    pub async fn safe_get_available_nodes(&self) -> SafeResult<AvailableNodes> {
        safe(self.get_available_nodes()).await
    }

    pub async fn safe_list_kms(&self) -> SafeResult<Vec<KmsInfo>> {
        safe(self.list_kms()).await
    }

    pub async fn safe_provision_cvm(&self, manifest: DeploymentManifest) -> SafeResult<ProvisionResult> {
        safe(self.provision_cvm(manifest)).await
    }

    pub async fn safe_commit_cvm_provision(&self, request: &CommitCvmRequest) -> SafeResult<CvmRecord> {
        safe(self.commit_cvm_provision(request)).await
    }

    pub async fn safe_get_cvm_info(&self, cvm: &CvmIdentifier) -> SafeResult<CvmRecord> {
        safe(self.get_cvm_info(cvm)).await
    }

    pub async fn safe_get_cvm_compose_file(&self, cvm: &CvmIdentifier) -> SafeResult<ComposeFile> {
        safe(self.get_cvm_compose_file(cvm)).await
    }

    pub async fn safe_provision_cvm_compose_file_update(
        &self,
        cvm: &CvmIdentifier,
        compose: ComposeFile,
        update_env_vars: Option<bool>,
    ) -> SafeResult<ProvisionResult> {
        safe(self.provision_cvm_compose_file_update(cvm, compose, update_env_vars)).await
    }

    pub async fn safe_commit_cvm_compose_file_update(
        &self,
        cvm: &CvmIdentifier,
        commit: &ComposeUpdateCommit,
    ) -> SafeResult<UpdateAccepted> {
        safe(self.commit_cvm_compose_file_update(cvm, commit)).await
    }
}
