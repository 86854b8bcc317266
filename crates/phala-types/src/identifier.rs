//! CVM addressing.
//!
//! A CVM can be addressed four ways; all resolve to one URL path segment:
//!
//! | field         | path segment          |
//! |---------------|-----------------------|
//! | `id`          | `<id>` as given       |
//! | `uuid`        | uuid without dashes   |
//! | `app_id`      | `app_<40 hex>`        |
//! | `instance_id` | `instance_<40 hex>`   |
//!
//! Precedence when several are set: id > uuid > app_id > instance_id.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};

pub const APP_PREFIX: &str = "app_";
pub const INSTANCE_PREFIX: &str = "instance_";

/// Length of a bare application / instance id in hex characters.
pub const ID_HEX_LEN: usize = 40;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvmIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl CvmIdentifier {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), ..Self::default() }
    }

    pub fn by_uuid(uuid: impl Into<String>) -> Self {
        Self { uuid: Some(uuid.into()), ..Self::default() }
    }

    pub fn by_app_id(app_id: impl Into<String>) -> Self {
        Self { app_id: Some(app_id.into()), ..Self::default() }
    }

    pub fn by_instance_id(instance_id: impl Into<String>) -> Self {
        Self { instance_id: Some(instance_id.into()), ..Self::default() }
    }

    /// Parse a free-form CLI argument: `app_…`, `instance_…`, a dashed
    /// UUID, a bare 40-hex app id, or anything else as a raw id.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.starts_with(APP_PREFIX) {
            Self::by_app_id(input)
        } else if input.starts_with(INSTANCE_PREFIX) {
            Self::by_instance_id(input)
        } else if is_hex_id(strip_0x(input)) {
            Self::by_app_id(input)
        } else if input.len() == 36 && input.matches('-').count() == 4 {
            Self::by_uuid(input)
        } else {
            Self::by_id(input)
        }
    }

    /// Resolve to the canonical path segment.
    pub fn resolve(&self) -> Result<String, SchemaError> {
        if let Some(id) = non_empty(&self.id) {
            return Ok(id.to_string());
        }
        if let Some(uuid) = non_empty(&self.uuid) {
            let compact: String = uuid.chars().filter(|c| *c != '-').collect();
            if compact.is_empty() || !compact.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(SchemaError::single("uuid", "uuid must be hexadecimal"));
            }
            return Ok(compact.to_lowercase());
        }
        if let Some(app_id) = non_empty(&self.app_id) {
            return app_path_segment(app_id);
        }
        if let Some(instance_id) = non_empty(&self.instance_id) {
            return instance_path_segment(instance_id);
        }
        Err(SchemaError::single(
            "",
            "one of id, uuid, app_id or instance_id is required",
        ))
    }
}

/// `app_<40 hex>` for an id given bare, `0x`-prefixed or already prefixed.
pub fn app_path_segment(app_id: &str) -> Result<String, SchemaError> {
    prefixed_segment(APP_PREFIX, "app_id", app_id)
}

/// `instance_<40 hex>` for an id given bare, `0x`-prefixed or already prefixed.
pub fn instance_path_segment(instance_id: &str) -> Result<String, SchemaError> {
    prefixed_segment(INSTANCE_PREFIX, "instance_id", instance_id)
}

/// Bare id from an `app_…` segment; other input is returned unchanged.
pub fn strip_app_prefix(segment: &str) -> &str {
    segment.strip_prefix(APP_PREFIX).unwrap_or(segment)
}

/// Bare id from an `instance_…` segment; other input is returned unchanged.
pub fn strip_instance_prefix(segment: &str) -> &str {
    segment.strip_prefix(INSTANCE_PREFIX).unwrap_or(segment)
}

/// Centralized-KMS app id derived from a compose hash: its first 40 hex
/// characters.
pub fn app_id_from_compose_hash(compose_hash: &str) -> Option<String> {
    let hash = strip_0x(compose_hash);
    if hash.len() < ID_HEX_LEN || !hash.is_char_boundary(ID_HEX_LEN) {
        return None;
    }
    let head = &hash[..ID_HEX_LEN];
    if head.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(head.to_lowercase())
    } else {
        None
    }
}

pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

pub fn is_hex_id(value: &str) -> bool {
    value.len() == ID_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn prefixed_segment(prefix: &str, field: &str, raw: &str) -> Result<String, SchemaError> {
    let bare = strip_0x(raw.strip_prefix(prefix).unwrap_or(raw));
    if !is_hex_id(bare) {
        return Err(SchemaError::single(
            field,
            format!("{} must be {} hex characters", field, ID_HEX_LEN),
        ));
    }
    Ok(format!("{}{}", prefix, bare))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
