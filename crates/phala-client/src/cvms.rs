use std::time::Duration;

use reqwest::Method;
use tokio::time::{sleep, Instant};
use tracing::debug;

use phala_types::compat::normalize_compose;
use phala_types::{CloudError, ComposeFile, CvmIdentifier, CvmRecord, CvmStatus};

use crate::client::PhalaCloudClient;

impl PhalaCloudClient {
    /// `GET /cvms/{id}`.
    pub async fn get_cvm_info(&self, cvm: &CvmIdentifier) -> Result<CvmRecord, CloudError> {
        let path = format!("/cvms/{}", cvm.resolve()?);
        self.request_json(Method::GET, &path, None).await
    }

    /// `GET /cvms/{id}/compose_file`, with legacy flags normalized.
    pub async fn get_cvm_compose_file(&self, cvm: &CvmIdentifier) -> Result<ComposeFile, CloudError> {
        let path = format!("/cvms/{}/compose_file", cvm.resolve()?);
        let mut compose: ComposeFile = self.request_json(Method::GET, &path, None).await?;
        normalize_compose(&mut compose, self.sink());
        Ok(compose)
    }

    /// Poll `GET /cvms/{id}` until the CVM reports `target`.
    ///
    /// Returns early with the record if the CVM lands in `failed` while a
    /// different status was awaited. Running out of time is a network error.
    pub async fn wait_for_status(
        &self,
        cvm: &CvmIdentifier,
        target: CvmStatus,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CvmRecord, CloudError> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.get_cvm_info(cvm).await?;
            debug!(status = ?record.status, target = ?target, "polled CVM status");
            if record.status == target || (record.status == CvmStatus::Failed && target != CvmStatus::Failed) {
                return Ok(record);
            }
            if Instant::now() + poll_interval > deadline {
                return Err(CloudError::Network(format!(
                    "timed out after {:?} waiting for status {:?} (last {:?})",
                    timeout, target, record.status
                )));
            }
            sleep(poll_interval).await;
        }
    }
}
