//! Process configuration: server bind address, storage backend, search
//! defaults, tenancy mode, and logging level. Parsed once at startup (by
//! [`crate::server::ServerBuilder`]) from the `config`/`toml` layer and
//! treated as immutable for the life of the process, same as the C1/C3
//! registries it feeds (§5).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use octofhir_db_postgres::PostgresConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fhir: FhirSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Basic sanity checks a malformed config file could otherwise turn into
    /// a confusing runtime failure three layers down.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.search.default_count == 0 || self.search.max_count == 0 {
            return Err("search.default_count and search.max_count must be > 0".into());
        }
        if self.search.default_count > self.search.max_count {
            return Err("search.default_count must be <= search.max_count".into());
        }
        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.fhir.default_version.parse::<octofhir_core::FhirVersion>().map_err(|e| e.to_string())?;
        if self.storage.postgres.is_none() {
            return Err("storage.postgres config is required".into());
        }
        Ok(())
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self.server.host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.server.base_url.clone().unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), base_url: None, body_limit_bytes: default_body_limit() }
    }
}

/// FHIR-level settings (§4.1, §6): the default version new requests resolve
/// to when a client doesn't pin one, and whether the tenant resolver (C3)
/// expects a tenant header on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirSettings {
    #[serde(default = "default_fhir_version")]
    pub default_version: String,
    #[serde(default)]
    pub multi_tenant: bool,
    /// Path to the `[[resource]]` TOML document C1 loads at startup.
    #[serde(default)]
    pub resource_config_path: Option<String>,
    /// Path to the `[[tenant]]` TOML document backing the static tenant
    /// source, for deployments without a database-backed tenant table.
    #[serde(default)]
    pub tenant_config_path: Option<String>,
    /// Path to a `SearchParameter`/`Bundle` JSON document C2 loads at
    /// startup, on top of the universal common parameters.
    #[serde(default)]
    pub search_parameter_bundle_path: Option<String>,
}

fn default_fhir_version() -> String {
    "R4B".into()
}

impl Default for FhirSettings {
    fn default() -> Self {
        Self {
            default_version: default_fhir_version(),
            multi_tenant: false,
            resource_config_path: None,
            tenant_config_path: None,
            search_parameter_bundle_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

/// Defaults and ceilings the search translator (C7) and parser apply when a
/// request omits `_count` or asks for more than this deployment allows (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_count")]
    pub default_count: usize,
    #[serde(default = "default_search_max_count")]
    pub max_count: usize,
}

fn default_search_count() -> usize {
    20
}
fn default_search_max_count() -> usize {
    200
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_count: default_search_count(), max_count: default_search_max_count() }
    }
}

/// Read-side cache settings for the plugin orchestrator's tenant cache (C8,
/// §4.7 "cache lookup for read-like interactions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: default_cache_ttl_secs() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

/// Loads [`AppConfig`] from an optional TOML file plus `OCTOFHIR__`-prefixed
/// environment overrides (e.g. `OCTOFHIR__SERVER__PORT=9090`), same layering
/// order the resource/tenant config documents follow (§5).
pub mod loader {
    use super::AppConfig;
    use ::config::{Config, Environment, File};
    use std::path::PathBuf;

    /// # Errors
    ///
    /// Returns an error message if the file can't be parsed, the
    /// environment overrides don't deserialize, or [`AppConfig::validate`]
    /// rejects the merged result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("octofhir.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(Environment::with_prefix("OCTOFHIR").try_parsing(true).separator("__"));

        let cfg = builder.build().map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg.try_deserialize().map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
