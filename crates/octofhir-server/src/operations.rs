//! Operation Dispatcher (C9, §4.8; §9 "Dynamic dispatch on operation
//! names"): replaces a class-registry + reflection scheme with an explicit
//! `(name, scope, resource_type) → handler` table populated at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use octofhir_core::{CoreError, FhirVersion};
use serde_json::Value;

/// Where an operation may be invoked (§3 "Operation Registration").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationScope {
    System,
    Type,
    Instance,
}

/// Everything the dispatcher needs to resolve and call a handler (§4.8).
pub struct OperationInvocation {
    pub name: String,
    pub scope: OperationScope,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub input: Option<Value>,
    pub query_params: HashMap<String, String>,
    pub version: FhirVersion,
    pub tenant_id: i64,
}

/// What a handler hands back to the dispatcher (§4.8 "Handlers return either
/// a resource document or an outcome document plus an HTTP-status hint").
pub struct OperationOutput {
    pub body: Value,
    pub status: u16,
}

impl OperationOutput {
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self { body, status: 200 }
    }

    #[must_use]
    pub fn with_status(body: Value, status: u16) -> Self {
        Self { body, status }
    }
}

/// A registered `$operation` implementation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// FHIR versions this handler supports (§4.8 rule 2).
    fn supported_versions(&self) -> &[FhirVersion];

    /// Parameter names that must be present in the input document, if any
    /// (§4.8 rule 3). An empty slice means no required parameters.
    fn required_parameters(&self) -> &[&str] {
        &[]
    }

    async fn invoke(&self, invocation: &OperationInvocation) -> Result<OperationOutput, CoreError>;
}

pub type DynOperationHandler = Arc<dyn OperationHandler>;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct RegistrationKey {
    name: String,
    scope: OperationScopeKey,
    resource_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum OperationScopeKey {
    System,
    Type,
    Instance,
}

impl From<OperationScope> for OperationScopeKey {
    fn from(scope: OperationScope) -> Self {
        match scope {
            OperationScope::System => Self::System,
            OperationScope::Type => Self::Type,
            OperationScope::Instance => Self::Instance,
        }
    }
}

/// C9: the `(name, scope, resource_type) → handler` table (§9).
#[derive(Default)]
pub struct OperationRegistry {
    handlers: HashMap<RegistrationKey, DynOperationHandler>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name` at `scope`. `resource_type = None` at
    /// type/instance scope means "applies to every resource type" (§3
    /// "Operation Registration... empty ⇒ all").
    pub fn register(
        &mut self,
        name: impl Into<String>,
        scope: OperationScope,
        resource_type: Option<String>,
        handler: DynOperationHandler,
    ) {
        self.handlers.insert(
            RegistrationKey { name: name.into(), scope: scope.into(), resource_type },
            handler,
        );
    }

    fn lookup(&self, name: &str, scope: OperationScope, resource_type: Option<&str>) -> Option<&DynOperationHandler> {
        let scope_key: OperationScopeKey = scope.into();
        if let Some(rt) = resource_type
            && let Some(handler) = self.handlers.get(&RegistrationKey {
                name: name.to_string(),
                scope: scope_key,
                resource_type: Some(rt.to_string()),
            })
        {
            return Some(handler);
        }
        self.handlers.get(&RegistrationKey { name: name.to_string(), scope: scope_key, resource_type: None })
    }

    /// Resolves and invokes an operation per §4.8's three-step resolution.
    pub async fn dispatch(&self, invocation: OperationInvocation) -> Result<OperationOutput, CoreError> {
        let handler = self
            .lookup(&invocation.name, invocation.scope, invocation.resource_type.as_deref())
            .ok_or_else(|| CoreError::not_supported(format!("operation '{}' is not registered", invocation.name)))?;

        if !handler.supported_versions().contains(&invocation.version) {
            return Err(CoreError::not_supported(format!(
                "operation '{}' does not support FHIR version {}",
                invocation.name, invocation.version
            )));
        }

        let required = handler.required_parameters();
        if !required.is_empty() {
            let provided: Vec<&str> = invocation
                .input
                .as_ref()
                .and_then(|v| v.get("parameter"))
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|p| p.get("name").and_then(|n| n.as_str())).collect())
                .unwrap_or_default();
            for name in required {
                if !provided.contains(name) {
                    return Err(CoreError::invalid_resource(format!("missing required parameter '{name}'")));
                }
            }
        }

        handler.invoke(&invocation).await
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Lists every registration for the conformance generator (C11), which
    /// walks this table to describe supported operations by canonical name.
    pub fn registrations(&self) -> impl Iterator<Item = (&str, OperationScope, Option<&str>, &[FhirVersion])> {
        self.handlers.iter().map(|(key, handler)| {
            let scope = match key.scope {
                OperationScopeKey::System => OperationScope::System,
                OperationScopeKey::Type => OperationScope::Type,
                OperationScopeKey::Instance => OperationScope::Instance,
            };
            (key.name.as_str(), scope, key.resource_type.as_deref(), handler.supported_versions())
        })
    }
}
