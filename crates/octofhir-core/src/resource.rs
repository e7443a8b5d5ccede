use crate::{FhirDateTime, FhirVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// The `meta` element FHIR resources carry, rebuilt from a [`ResourceRow`]
/// on every read rather than trusted from stored content (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    #[serde(rename = "versionId")]
    pub version_id: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: FhirDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ResourceMeta {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("versionId".to_string(), json!(self.version_id));
        map.insert("lastUpdated".to_string(), json!(self.last_updated.to_string()));
        if let Some(source) = &self.source {
            map.insert("source".to_string(), json!(source));
        }
        Value::Object(map)
    }
}

/// A single version of a resource as stored by the engine (§3). This is the
/// row shape every storage backend (`octofhir-storage`, `octofhir-db-postgres`)
/// reads and writes; the HTTP layer never sees anything less than a full row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRow {
    /// Internal tenant id resolved from the external tenant UUID (§3, C3).
    pub tenant_id: i64,
    pub resource_type: String,
    pub resource_id: String,
    pub fhir_version: FhirVersion,
    /// Positive, contiguous from 1 within (tenant, resource_type, resource_id) (§3).
    pub version_id: u64,
    /// At most one row with `is_current = true` per (tenant, type, id) (§3 invariant).
    pub is_current: bool,
    /// True for a tombstone version written by `delete` (§4.6).
    pub is_deleted: bool,
    /// Full resource JSON as submitted, `meta` excluded (rebuilt from this row).
    pub content: Value,
    pub last_updated: FhirDateTime,
    pub created_at: FhirDateTime,
    /// `Bundle.entry.fullUrl` or similar provenance hint (optional, §3).
    pub source_uri: Option<String>,
}

impl ResourceRow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: i64,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        fhir_version: FhirVersion,
        version_id: u64,
        content: Value,
    ) -> Self {
        let now = crate::time::now_utc();
        Self {
            tenant_id,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            fhir_version,
            version_id,
            is_current: true,
            is_deleted: false,
            content,
            last_updated: now.clone(),
            created_at: now,
            source_uri: None,
        }
    }

    pub fn with_is_current(mut self, is_current: bool) -> Self {
        self.is_current = is_current;
        self
    }

    pub fn with_is_deleted(mut self, is_deleted: bool) -> Self {
        self.is_deleted = is_deleted;
        self
    }

    pub fn with_source_uri(mut self, source_uri: impl Into<String>) -> Self {
        self.source_uri = Some(source_uri.into());
        self
    }

    pub fn meta(&self) -> ResourceMeta {
        ResourceMeta {
            version_id: self.version_id.to_string(),
            last_updated: self.last_updated.clone(),
            source: self.source_uri.clone(),
        }
    }

    /// Full resource JSON as the wire format expects it: `resourceType`,
    /// `id`, freshly-rebuilt `meta`, then the stored content fields (§4.6).
    pub fn to_resource_json(&self) -> Value {
        let mut map = match &self.content {
            Value::Object(m) => m.clone(),
            _ => Map::new(),
        };
        map.insert("resourceType".to_string(), json!(self.resource_type));
        map.insert("id".to_string(), json!(self.resource_id));
        map.insert("meta".to_string(), self.meta().to_json());
        Value::Object(map)
    }

    pub fn is_live(&self) -> bool {
        self.is_current && !self.is_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> ResourceRow {
        ResourceRow::new(
            1,
            "Patient",
            "patient-123",
            FhirVersion::R4B,
            1,
            json!({ "name": [{ "family": "Doe" }] }),
        )
    }

    #[test]
    fn new_row_is_current_and_not_deleted() {
        let row = sample_row();
        assert!(row.is_current);
        assert!(!row.is_deleted);
        assert!(row.is_live());
    }

    #[test]
    fn deleted_row_is_not_live() {
        let row = sample_row().with_is_deleted(true);
        assert!(!row.is_live());
    }

    #[test]
    fn to_resource_json_injects_id_and_meta() {
        let row = sample_row();
        let json = row.to_resource_json();
        assert_eq!(json["resourceType"], "Patient");
        assert_eq!(json["id"], "patient-123");
        assert_eq!(json["meta"]["versionId"], "1");
        assert_eq!(json["name"][0]["family"], "Doe");
    }

    #[test]
    fn meta_carries_source_uri() {
        let row = sample_row().with_source_uri("urn:uuid:abc");
        assert_eq!(row.meta().source, Some("urn:uuid:abc".to_string()));
    }

    #[test]
    fn non_current_row_is_not_live_even_if_not_deleted() {
        let row = sample_row().with_is_current(false);
        assert!(!row.is_live());
    }
}
