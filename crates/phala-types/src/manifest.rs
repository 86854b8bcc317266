//! Deployment manifest: the caller's declared desired state for a CVM.
//!
//! The control plane hashes the canonical form of this manifest into the
//! `compose_hash`, so the client must submit the same field set every time.
//! Unknown compose fields are carried through untouched.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_RUNNER: &str = "docker-compose";
pub const DEFAULT_MANIFEST_VERSION: u32 = 2;

fn default_true() -> bool {
    true
}

/// The compose sub-object of a manifest (app-compose).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub docker_compose_file: String,
    #[serde(default = "default_true")]
    pub kms_enabled: bool,
    #[serde(default)]
    pub public_logs: bool,
    #[serde(default)]
    pub public_sysinfo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_enabled: Option<bool>,
    /// Deprecated spelling of `gateway_enabled`; see [`crate::compat`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tproxy_enabled: Option<bool>,
    #[serde(default)]
    pub allowed_envs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ComposeFile {
    pub fn new(docker_compose_file: impl Into<String>) -> Self {
        Self {
            name: None,
            docker_compose_file: docker_compose_file.into(),
            kms_enabled: true,
            public_logs: false,
            public_sysinfo: false,
            gateway_enabled: None,
            tproxy_enabled: None,
            allowed_envs: Vec::new(),
            pre_launch_script: None,
            manifest_version: Some(DEFAULT_MANIFEST_VERSION),
            runner: Some(DEFAULT_RUNNER.to_string()),
            extra: Map::new(),
        }
    }

    pub fn with_allowed_envs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_envs = names.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub vcpu: u32,
    /// Memory in MB.
    pub memory: u32,
    /// Disk size in GB.
    pub disk_size: u32,
    pub compose_file: ComposeFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<u64>,
    /// Deprecated spelling of `node_id`; see [`crate::compat`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teepod_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_id: Option<String>,
}

impl DeploymentManifest {
    pub fn new(name: impl Into<String>, compose_file: ComposeFile) -> Self {
        Self {
            name: name.into(),
            image: None,
            vcpu: 1,
            memory: 2048,
            disk_size: 40,
            compose_file,
            node_id: None,
            teepod_id: None,
            kms_id: None,
        }
    }

    /// Structural checks that must pass before any request is made.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut err = SchemaError::default();
        if self.name.trim().is_empty() {
            err.push("name", "name is required");
        }
        if self.vcpu == 0 {
            err.push("vcpu", "must be at least 1");
        }
        if self.memory == 0 {
            err.push("memory", "must be at least 1 MB");
        }
        if self.disk_size == 0 {
            err.push("disk_size", "must be at least 1 GB");
        }
        if self.compose_file.docker_compose_file.trim().is_empty() {
            err.push("compose_file.docker_compose_file", "compose definition is empty");
        }
        for (i, name) in self.compose_file.allowed_envs.iter().enumerate() {
            if name.trim().is_empty() {
                err.push(format!("compose_file.allowed_envs.{}", i), "empty variable name");
            }
        }
        err.into_result()
    }
}

/// Partial update applied to an existing compose file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_compose_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_envs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_logs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_sysinfo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_enabled: Option<bool>,
}

impl ComposePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, compose: &mut ComposeFile) {
        if let Some(file) = &self.docker_compose_file {
            compose.docker_compose_file = file.clone();
        }
        if let Some(allowed) = &self.allowed_envs {
            compose.allowed_envs = allowed.clone();
        }
        if let Some(script) = &self.pre_launch_script {
            compose.pre_launch_script = Some(script.clone());
        }
        if let Some(v) = self.public_logs {
            compose.public_logs = v;
        }
        if let Some(v) = self.public_sysinfo {
            compose.public_sysinfo = v;
        }
        if let Some(v) = self.gateway_enabled {
            compose.gateway_enabled = Some(v);
            compose.tproxy_enabled = None;
        }
    }
}
