//! Startup loading: turns TOML configuration files into the structures C1
//! and C3 need. This crate only reads files once, at process start, and
//! never watches them — registries are immutable for the life of the
//! process (§4.1, §5). Hot reload is explicitly out of scope.

use std::path::Path;

use serde::Deserialize;

use crate::resource_registry::{ResourceConfigDoc, ResourceRegistry, RegistryError};
use crate::tenant::TenantRecord;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, #[source] source: toml::de::Error },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// The on-disk shape of the resource configuration file: a TOML document
/// with one `[[resource]]` table per type.
#[derive(Debug, Deserialize)]
struct ResourceConfigFile {
    #[serde(default, rename = "resource")]
    resources: Vec<ResourceConfigDoc>,
}

/// The on-disk shape of the static tenant list, for deployments that back
/// [`crate::tenant::TenantSource`] with a file instead of a database.
#[derive(Debug, Deserialize)]
struct TenantConfigFile {
    #[serde(default, rename = "tenant")]
    tenants: Vec<TenantEntry>,
}

#[derive(Debug, Deserialize)]
struct TenantEntry {
    external_id: String,
    internal_id: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

fn read_and_parse<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Loads the resource registry (C1) from a single TOML file of
/// `[[resource]]` tables (§4.1).
pub fn load_resource_registry(path: &Path) -> Result<ResourceRegistry> {
    let file: ResourceConfigFile = read_and_parse(path)?;
    Ok(ResourceRegistry::from_docs(file.resources)?)
}

/// Loads a static tenant list (C3) from a single TOML file of `[[tenant]]`
/// tables. Malformed UUIDs are skipped entries returned as errors is not
/// attempted here; callers needing strict validation should inspect the
/// `external_id` strings themselves before deploying the file.
pub fn load_tenant_records(path: &Path) -> Result<Vec<TenantRecord>> {
    let file: TenantConfigFile = read_and_parse(path)?;
    let records = file
        .tenants
        .into_iter()
        .filter_map(|t| {
            uuid::Uuid::parse_str(&t.external_id).ok().map(|external_id| TenantRecord {
                external_id,
                internal_id: t.internal_id,
                enabled: t.enabled,
            })
        })
        .collect();
    Ok(records)
}
