//! Plugin Orchestrator (C8, §4.7): sequences authentication, authorization,
//! cache, business hooks, and audit/telemetry around every core operation.
//!
//! Plugin "kinds" map to a closed set of tagged variants with their own
//! contract (§9 "Polymorphism vs tagged variants"), not a deep inheritance
//! chain: [`PluginKind`] is that set, and every plugin declares which one it
//! is plus an ordering key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use octofhir_core::{CoreError, FhirVersion, Interaction};
use serde_json::Value;

use crate::cache::TenantCache;

/// The closed set of plugin capabilities (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Authentication,
    Authorization,
    BusinessBefore,
    BusinessAfter,
    Audit,
    Telemetry,
}

/// Per-request mutable record every plugin sees a borrowed handle to (§3
/// "Plugin Context"). Created at request entry, discarded at response
/// emission; the orchestrator owns it, plugins borrow it in turn.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub interaction: Interaction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub fhir_version: FhirVersion,
    pub tenant_id: i64,
    /// Input document for writes; mutated in place by before-plugins, so the
    /// final document the core operation sees is whatever the last
    /// before-plugin left (§4.7 "Context sharing").
    pub input: Option<Value>,
    /// Populated after the core operation; after-plugins may mutate it.
    pub output: Option<Value>,
    pub aborted: Option<Abort>,
}

/// Why and how the pipeline was short-circuited (§4.7 steps 2-5).
#[derive(Debug, Clone)]
pub struct Abort {
    pub status: u16,
    pub outcome: Value,
}

impl PluginContext {
    #[must_use]
    pub fn new(interaction: Interaction, resource_type: impl Into<String>, fhir_version: FhirVersion, tenant_id: i64) -> Self {
        Self {
            interaction,
            resource_type: resource_type.into(),
            resource_id: None,
            fhir_version,
            tenant_id,
            input: None,
            output: None,
            aborted: None,
        }
    }

    #[must_use]
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn is_read_like(&self) -> bool {
        matches!(self.interaction, Interaction::Read | Interaction::VRead | Interaction::Search | Interaction::History)
    }
}

/// The outcome of one plugin's execution (§4.7: sync plugins may abort;
/// async plugins cannot).
pub enum PluginResult {
    Continue,
    Abort(Abort),
}

/// A single plugin. Synchronous plugins (`is_async() == false`) block the
/// pipeline and may abort it; asynchronous plugins are fired without being
/// awaited and can never abort (§4.7).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn kind(&self) -> PluginKind;

    /// Ascending execution order within its kind (§4.7 "ascending order").
    fn order(&self) -> i32 {
        0
    }

    fn is_async(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut PluginContext) -> PluginResult;
}

type CoreFuture = Pin<Box<dyn Future<Output = Result<Value, CoreError>> + Send>>;

/// Sequences the pipeline in §4.7's invariant order around a core operation.
pub struct PluginOrchestrator {
    authentication: Vec<Arc<dyn Plugin>>,
    authorization: Vec<Arc<dyn Plugin>>,
    before: Vec<Arc<dyn Plugin>>,
    after: Vec<Arc<dyn Plugin>>,
    audit: Vec<Arc<dyn Plugin>>,
    telemetry: Vec<Arc<dyn Plugin>>,
    cache: Arc<TenantCache>,
}

impl PluginOrchestrator {
    #[must_use]
    pub fn new(cache: Arc<TenantCache>) -> Self {
        Self {
            authentication: Vec::new(),
            authorization: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            audit: Vec::new(),
            telemetry: Vec::new(),
            cache,
        }
    }

    /// Registers a plugin into the bucket matching its declared kind,
    /// keeping each bucket sorted by `order()` (§4.7 "ascending order").
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let bucket = match plugin.kind() {
            PluginKind::Authentication => &mut self.authentication,
            PluginKind::Authorization => &mut self.authorization,
            PluginKind::BusinessBefore => &mut self.before,
            PluginKind::BusinessAfter => &mut self.after,
            PluginKind::Audit => &mut self.audit,
            PluginKind::Telemetry => &mut self.telemetry,
        };
        bucket.push(plugin);
        bucket.sort_by_key(|p| p.order());
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    /// Runs the full pipeline (§4.7 steps 1-10) around `core`, which
    /// performs the actual storage or operation-dispatcher call and returns
    /// the resource document the response is built from.
    ///
    /// `core` only runs if nothing aborts first; its result becomes
    /// `ctx.output` before after-plugins run.
    pub async fn run(
        &self,
        mut ctx: PluginContext,
        core: impl FnOnce(PluginContext) -> CoreFuture + Send,
    ) -> Result<PluginOutcome, CoreError> {
        let span = tracing::info_span!(
            "plugin_pipeline",
            tenant_id = ctx.tenant_id,
            resource_type = %ctx.resource_type,
            interaction = %ctx.interaction,
        );
        let _entered = span.enter();

        if let Some(abort) = Self::run_sync_stage(&self.authentication, &mut ctx).await {
            return Ok(PluginOutcome::aborted(abort));
        }
        if let Some(abort) = Self::run_sync_stage(&self.authorization, &mut ctx).await {
            return Ok(PluginOutcome::aborted(abort));
        }

        if ctx.is_read_like()
            && let Some(id) = ctx.resource_id.clone()
            && let Some(cached) = self.cache.get(ctx.tenant_id, &ctx.resource_type, &id)
        {
            return Ok(PluginOutcome::from_cache(cached));
        }

        if let Some(abort) = Self::run_sync_stage(&self.before, &mut ctx).await {
            return Ok(PluginOutcome::aborted(abort));
        }

        let resource_id_for_cache = ctx.resource_id.clone();
        let tenant_id = ctx.tenant_id;
        let resource_type = ctx.resource_type.clone();
        let value = core(ctx.clone()).await?;
        ctx.output = Some(value.clone());

        for plugin in &self.after {
            if plugin.is_async() {
                let plugin = plugin.clone();
                let mut ctx_clone = ctx.clone();
                tokio::spawn(async move {
                    if let PluginResult::Abort(_) = plugin.execute(&mut ctx_clone).await {
                        tracing::warn!("async after-plugin returned abort; ignored (§4.7)");
                    }
                });
            } else if let PluginResult::Abort(abort) = plugin.execute(&mut ctx).await {
                // After-phase errors still surface the core's output, with an
                // attached outcome issue rather than replacing the body (§7).
                return Ok(PluginOutcome::with_issue(ctx.output.clone().unwrap_or(value), abort));
            }
        }

        let final_value = ctx.output.unwrap_or(value);

        if let Some(id) = resource_id_for_cache {
            self.cache.put(tenant_id, &resource_type, &id, final_value.clone());
        } else {
            self.cache.invalidate_type(&resource_type);
        }

        self.fire_async(&self.audit, ctx.clone());
        self.fire_async(&self.telemetry, ctx);

        Ok(PluginOutcome::ok(final_value))
    }

    async fn run_sync_stage(stage: &[Arc<dyn Plugin>], ctx: &mut PluginContext) -> Option<Abort> {
        for plugin in stage {
            match plugin.execute(ctx).await {
                PluginResult::Continue => {}
                PluginResult::Abort(abort) => return Some(abort),
            }
        }
        None
    }

    fn fire_async(&self, stage: &[Arc<dyn Plugin>], ctx: PluginContext) {
        for plugin in stage {
            let plugin = plugin.clone();
            let mut ctx_clone = ctx.clone();
            tokio::spawn(async move {
                let _ = plugin.execute(&mut ctx_clone).await;
            });
        }
    }
}

/// What the pipeline produced, for the HTTP layer to turn into a response.
pub enum PluginOutcome {
    Ok(Value),
    CacheHit(Value),
    /// Core output plus a non-fatal after-phase issue attached to it.
    OkWithIssue(Value, Abort),
    Aborted(Abort),
}

impl PluginOutcome {
    fn ok(value: Value) -> Self {
        Self::Ok(value)
    }

    fn from_cache(value: Value) -> Self {
        Self::CacheHit(value)
    }

    fn with_issue(value: Value, abort: Abort) -> Self {
        Self::OkWithIssue(value, abort)
    }

    fn aborted(abort: Abort) -> Self {
        Self::Aborted(abort)
    }
}
