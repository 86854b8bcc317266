//! Shared data model for the Phala Cloud CVM SDK.
//!
//! Every other crate in the workspace speaks in these types: the manifest a
//! caller submits, the records the control plane sends back, the identifier
//! scheme used in URL path segments, and the two error taxonomies
//! (transport vs. local schema) that callers branch on.

pub mod compat;
pub mod diagnostics;
pub mod error;
pub mod identifier;
pub mod manifest;
pub mod records;

pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use error::{ApiError, CloudError, ErrorDetail, SafeResult, SchemaError, SchemaIssue, ValidationItem};
pub use identifier::CvmIdentifier;
pub use manifest::{ComposeFile, ComposePatch, DeploymentManifest};
pub use records::{
    AvailableNodes, CommitCvmRequest, ComposeUpdateCommit, CvmRecord, CvmStatus, ImageInfo,
    KmsInfo, KmsList, KmsPubkeyResponse, NodeInfo, ProvisionResult, UpdateAccepted,
    UpdateProvisionRequest,
};
