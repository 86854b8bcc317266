//! Error taxonomy shared by every SDK operation.
//!
//! Two families exist and are never folded into each other:
//! - transport errors (`ApiError`, `CloudError::Network`): the request reached
//!   the wire; HTTP failures keep their status code and `detail` payload
//!   exactly as the control plane sent them.
//! - validation errors (`SchemaError`, `CloudError::Config`): a local shape
//!   mismatch, reported as an issues list and never as an HTTP status.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// ==================== TRANSPORT ERRORS ====================

/// One entry of a validation array returned by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationItem {
    pub msg: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Value>,
}

/// The `detail` field of an HTTP error body.
///
/// Callers branch on the shape, so it is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    Validation(Vec<ValidationItem>),
    Record(Map<String, Value>),
    Other(Value),
}

impl ErrorDetail {
    /// Single-line human readable summary.
    pub fn summary(&self) -> String {
        match self {
            ErrorDetail::Message(msg) => msg.clone(),
            ErrorDetail::Validation(items) => items
                .iter()
                .map(|item| item.msg.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            ErrorDetail::Record(record) => match record.get("message").and_then(Value::as_str) {
                Some(msg) => msg.to_string(),
                None => Value::Object(record.clone()).to_string(),
            },
            ErrorDetail::Other(value) => value.to_string(),
        }
    }
}

/// HTTP-layer failure (4xx/5xx).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("HTTP {status}: {}", detail.summary())]
pub struct ApiError {
    pub status: u16,
    pub detail: ErrorDetail,
}

impl ApiError {
    pub fn new(status: u16, detail: ErrorDetail) -> Self {
        Self { status, detail }
    }

    /// Build from a raw response body.
    ///
    /// A JSON object with a `detail` key yields that detail; any other JSON
    /// body is kept whole; non-JSON bodies become a plain message.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        let detail = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(mut object)) => match object.remove("detail") {
                Some(detail) => serde_json::from_value(detail.clone())
                    .unwrap_or(ErrorDetail::Other(detail)),
                None => ErrorDetail::Record(object),
            },
            Ok(Value::String(msg)) => ErrorDetail::Message(msg),
            Ok(other) => ErrorDetail::Other(other),
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                if text.is_empty() {
                    ErrorDetail::Message(format!("request failed with status {}", status))
                } else {
                    ErrorDetail::Message(text)
                }
            }
        };
        Self { status, detail }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

// ==================== SCHEMA ERRORS ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    /// Dotted path to the offending field, empty for the root.
    pub path: String,
    pub message: String,
}

/// Local structural mismatch in a request or response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaError {
    pub issues: Vec<SchemaIssue>,
}

impl SchemaError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![SchemaIssue { path: path.into(), message: message.into() }],
        }
    }

    /// Wrap a decode failure of `context` (usually the operation name).
    pub fn from_serde(context: &str, err: &serde_json::Error) -> Self {
        Self::single(
            context,
            format!("{} (line {}, column {})", err, err.line(), err.column()),
        )
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(SchemaIssue { path: path.into(), message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// `Ok(())` when no issue was collected.
    pub fn into_result(self) -> Result<(), SchemaError> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema validation failed: ")?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            if issue.path.is_empty() {
                write!(f, "{}", issue.message)?;
            } else {
                write!(f, "{}: {}", issue.path, issue.message)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

// ==================== SDK ERROR ====================

#[derive(Debug, Clone, Error)]
pub enum CloudError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The request never produced an HTTP status (connect failure, timeout).
    #[error("network error: {0}")]
    Network(String),
    /// Client configuration is incomplete; raised before any request.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CloudError {
    /// Transport-error marker: the failure happened on the wire.
    pub fn is_transport(&self) -> bool {
        matches!(self, CloudError::Api(_) | CloudError::Network(_))
    }

    /// Validation-error marker: the failure is a local shape mismatch.
    pub fn is_validation(&self) -> bool {
        !self.is_transport()
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Api(err) => Some(err.status),
            _ => None,
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            CloudError::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_schema(&self) -> Option<&SchemaError> {
        match self {
            CloudError::Schema(err) => Some(err),
            _ => None,
        }
    }
}

impl Serialize for CloudError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CloudError::Api(err) => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("is_request_error", &true)?;
                map.serialize_entry("status", &err.status)?;
                map.serialize_entry("message", &err.detail.summary())?;
                map.serialize_entry("detail", &err.detail)?;
                map.end()
            }
            CloudError::Network(msg) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("is_request_error", &true)?;
                map.serialize_entry("status", &Option::<u16>::None)?;
                map.serialize_entry("message", msg)?;
                map.end()
            }
            CloudError::Schema(err) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("issues", &err.issues)?;
                map.end()
            }
            CloudError::Config(msg) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("issues", &[SchemaIssue { path: "config".into(), message: msg.clone() }])?;
                map.end()
            }
        }
    }
}

// ==================== SAFE RESULT ====================

/// Non-throwing result shape: `{success: true, data}` or
/// `{success: false, error}`.
#[derive(Debug, Clone)]
pub enum SafeResult<T> {
    Success(T),
    Failure(CloudError),
}

impl<T> SafeResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, SafeResult::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            SafeResult::Success(data) => Some(data),
            SafeResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CloudError> {
        match self {
            SafeResult::Success(_) => None,
            SafeResult::Failure(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<T, CloudError> {
        match self {
            SafeResult::Success(data) => Ok(data),
            SafeResult::Failure(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, CloudError>> for SafeResult<T> {
    fn from(result: Result<T, CloudError>) -> Self {
        match result {
            Ok(data) => SafeResult::Success(data),
            Err(err) => SafeResult::Failure(err),
        }
    }
}

impl<T: Serialize> Serialize for SafeResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            SafeResult::Success(data) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
            }
            SafeResult::Failure(err) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", err)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_string_is_kept_verbatim() {
        let err = ApiError::from_body(404, br#"{"detail":"CVM not found"}"#);
        assert_eq!(err.detail, ErrorDetail::Message("CVM not found".into()));
        assert_eq!(err.to_string(), "HTTP 404: CVM not found");
    }

    #[test]
    fn detail_validation_array_is_parsed() {
        let body = json!({"detail": [
            {"msg": "field required", "type": "missing", "loc": ["body", "name"]},
            {"msg": "too small"}
        ]});
        let err = ApiError::from_body(422, body.to_string().as_bytes());
        match &err.detail {
            ErrorDetail::Validation(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].kind.as_deref(), Some("missing"));
            }
            other => panic!("unexpected detail {:?}", other),
        }
        assert_eq!(err.detail.summary(), "field required; too small");
    }

    #[test]
    fn detail_record_is_kept() {
        let body = json!({"detail": {"code": "QUOTA", "message": "quota exceeded"}});
        let err = ApiError::from_body(403, body.to_string().as_bytes());
        assert!(matches!(err.detail, ErrorDetail::Record(_)));
        assert_eq!(err.detail.summary(), "quota exceeded");
    }

    #[test]
    fn non_json_body_becomes_message() {
        let err = ApiError::from_body(502, b"Bad Gateway");
        assert_eq!(err.detail, ErrorDetail::Message("Bad Gateway".into()));
        let empty = ApiError::from_body(500, b"");
        assert_eq!(empty.detail.summary(), "request failed with status 500");
    }

    #[test]
    fn markers_discriminate_families() {
        let transport = CloudError::Api(ApiError::new(400, ErrorDetail::Message("bad".into())));
        let network = CloudError::Network("timeout".into());
        let schema = CloudError::Schema(SchemaError::single("id", "required"));
        assert!(transport.is_transport() && !transport.is_validation());
        assert!(network.is_transport());
        assert!(schema.is_validation() && !schema.is_transport());
        assert_eq!(transport.status(), Some(400));
        assert_eq!(schema.status(), None);
    }

    #[test]
    fn safe_result_serializes_tagged_shape() {
        let ok: SafeResult<u32> = Ok(7).into();
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"success": true, "data": 7}));

        let failed: SafeResult<u32> =
            Err(CloudError::Schema(SchemaError::single("", "missing identifier"))).into();
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["success"], json!(false));
        assert!(value["error"].get("issues").is_some());
        assert!(value["error"].get("is_request_error").is_none());

        let http: SafeResult<u32> =
            Err(CloudError::Api(ApiError::new(409, ErrorDetail::Message("conflict".into())))).into();
        let value = serde_json::to_value(&http).unwrap();
        assert_eq!(value["error"]["is_request_error"], json!(true));
        assert_eq!(value["error"]["status"], json!(409));
    }

    #[test]
    fn schema_error_display_lists_issues() {
        let mut err = SchemaError::default();
        err.push("vcpu", "must be at least 1");
        err.push("", "name is required");
        assert_eq!(
            err.to_string(),
            "schema validation failed: vcpu: must be at least 1; name is required"
        );
    }
}
