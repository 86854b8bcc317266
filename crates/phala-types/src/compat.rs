//! Deprecated-field compatibility pass.
//!
//! Runs once at the client boundary before a manifest is submitted:
//! - `teepod_id` → `node_id`
//! - `compose_file.tproxy_enabled` → `compose_file.gateway_enabled`
//! - unset `compose_file.name` ← manifest `name`
//!
//! For each legacy pair: when both spellings are present the new one wins and
//! the old one is dropped silently; when only the old one is present its value
//! moves to the new field and a `deprecated_field` diagnostic is emitted.
//! Presence of a deprecated field is never an error.

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::manifest::{ComposeFile, DeploymentManifest};

pub const DEPRECATED_FIELD: &str = "deprecated_field";

pub fn normalize_manifest(mut manifest: DeploymentManifest, sink: &dyn DiagnosticSink) -> DeploymentManifest {
    reconcile(&mut manifest.node_id, &mut manifest.teepod_id, "teepod_id", "node_id", sink);
    if manifest
        .compose_file
        .name
        .as_deref()
        .map(str::trim)
        .map_or(true, str::is_empty)
    {
        manifest.compose_file.name = Some(manifest.name.clone());
    }
    normalize_compose(&mut manifest.compose_file, sink);
    manifest
}

pub fn normalize_compose(compose: &mut ComposeFile, sink: &dyn DiagnosticSink) {
    reconcile(
        &mut compose.gateway_enabled,
        &mut compose.tproxy_enabled,
        "tproxy_enabled",
        "gateway_enabled",
        sink,
    );
}

fn reconcile<T>(
    current: &mut Option<T>,
    legacy: &mut Option<T>,
    legacy_name: &str,
    current_name: &str,
    sink: &dyn DiagnosticSink,
) {
    let old = legacy.take();
    if current.is_some() {
        return;
    }
    if let Some(value) = old {
        *current = Some(value);
        sink.warn(Diagnostic {
            code: DEPRECATED_FIELD,
            message: format!("`{}` is deprecated, use `{}` instead", legacy_name, current_name),
        });
    }
}
