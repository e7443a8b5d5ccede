//! Resource Registry (C1, §4.1) and Tenant Resolver (C3, §4.3): the two
//! configuration-driven lookup structures the rest of the server treats as
//! immutable, ambient context for the life of the process.

pub mod loader;
pub mod resource_registry;
pub mod tenant;

pub use loader::{ConfigError, Result, load_resource_registry, load_tenant_records};
pub use resource_registry::{
    DEFAULT_SCHEMA, RegistryError, ResourceConfig, ResourceConfigDoc, ResourceRegistry,
    SchemaDoc, SchemaPlacement, VersionEntry,
};
pub use tenant::{StaticTenantSource, TenantRecord, TenantResolver, TenantSource};
