//! JSON Patch (RFC 6902) support for the `PATCH` interaction (§4.5, §4.6).
//!
//! FHIRPath Patch is not implemented — the resource type's `CapabilityStatement`
//! entry advertises `patchFormat: ["application/json-patch+json"]` only.

use json_patch::{Patch, PatchOperation, patch};
use octofhir_core::CoreError;
use serde_json::Value;

/// Applies a JSON Patch document to `resource`, rejecting patches that touch
/// `resourceType` or `id` (§4.5 "a patch may not change a resource's type or
/// identity").
///
/// # Errors
///
/// Returns [`CoreError::InvalidResource`] if the patch document doesn't parse,
/// targets a protected field, or fails to apply.
pub fn apply_json_patch(resource: &Value, patch_bytes: &[u8]) -> Result<Value, CoreError> {
    let operations: Patch = serde_json::from_slice(patch_bytes)
        .map_err(|e| CoreError::invalid_resource(format!("invalid JSON Patch document: {e}")))?;

    validate_operations(&operations.0)?;

    let mut patched = resource.clone();
    patch(&mut patched, &operations)
        .map_err(|e| CoreError::invalid_resource(format!("patch operation failed: {e}")))?;
    Ok(patched)
}

fn validate_operations(operations: &[PatchOperation]) -> Result<(), CoreError> {
    for op in operations {
        for path in operation_paths(op) {
            if path == "/resourceType" || path.starts_with("/resourceType/") {
                return Err(CoreError::invalid_resource("cannot modify resourceType with patch"));
            }
            if path == "/id" || path.starts_with("/id/") {
                return Err(CoreError::invalid_resource("cannot modify id with patch"));
            }
        }
    }
    Ok(())
}

/// Every path an operation reads from or writes to — `move`/`copy` carry a
/// `from` in addition to their destination `path`, and either one touching a
/// protected field must be rejected.
fn operation_paths(op: &PatchOperation) -> Vec<&str> {
    match op {
        PatchOperation::Add(op) => vec![op.path.as_str()],
        PatchOperation::Remove(op) => vec![op.path.as_str()],
        PatchOperation::Replace(op) => vec![op.path.as_str()],
        PatchOperation::Move(op) => vec![op.path.as_str(), op.from.as_str()],
        PatchOperation::Copy(op) => vec![op.path.as_str(), op.from.as_str()],
        PatchOperation::Test(op) => vec![op.path.as_str()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn applies_a_replace_operation() {
        let resource = json!({"resourceType": "Patient", "id": "1", "active": false});
        let patch_doc = serde_json::to_vec(&json!([
            {"op": "replace", "path": "/active", "value": true}
        ]))
        .unwrap();
        let patched = apply_json_patch(&resource, &patch_doc).unwrap();
        assert_eq!(patched["active"], true);
    }

    #[test]
    fn rejects_patch_touching_resource_type() {
        let resource = json!({"resourceType": "Patient", "id": "1"});
        let patch_doc = serde_json::to_vec(&json!([
            {"op": "replace", "path": "/resourceType", "value": "Observation"}
        ]))
        .unwrap();
        let err = apply_json_patch(&resource, &patch_doc).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResource { .. }));
    }

    #[test]
    fn rejects_patch_touching_id() {
        let resource = json!({"resourceType": "Patient", "id": "1"});
        let patch_doc = serde_json::to_vec(&json!([
            {"op": "replace", "path": "/id", "value": "2"}
        ]))
        .unwrap();
        let err = apply_json_patch(&resource, &patch_doc).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResource { .. }));
    }

    #[test]
    fn rejects_move_sourced_from_a_protected_field() {
        let resource = json!({"resourceType": "Patient", "id": "1"});
        let patch_doc = serde_json::to_vec(&json!([
            {"op": "move", "from": "/id", "path": "/oldId"}
        ]))
        .unwrap();
        let err = apply_json_patch(&resource, &patch_doc).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResource { .. }));
    }

    #[test]
    fn rejects_copy_sourced_from_resource_type() {
        let resource = json!({"resourceType": "Patient", "id": "1"});
        let patch_doc = serde_json::to_vec(&json!([
            {"op": "copy", "from": "/resourceType", "path": "/x"}
        ]))
        .unwrap();
        let err = apply_json_patch(&resource, &patch_doc).unwrap_err();
        assert!(matches!(err, CoreError::InvalidResource { .. }));
    }

    #[test]
    fn rejects_malformed_patch_document() {
        let resource = json!({"resourceType": "Patient", "id": "1"});
        let err = apply_json_patch(&resource, b"not json").unwrap_err();
        assert!(matches!(err, CoreError::InvalidResource { .. }));
    }
}
