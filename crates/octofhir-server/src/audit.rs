//! Audit plugin (§4.7's `Audit` kind): records every request the plugin
//! orchestrator runs through `tracing`, fired after the core operation and
//! any business-after plugins so it sees the final outcome (§9 "the audit
//! log sink is an external collaborator").
//!
//! Audit plugins are always async (§4.7 "async plugins ... audit, telemetry")
//! so a slow sink never adds latency to the response path.

use async_trait::async_trait;
use octofhir_core::Interaction;
use tracing::info;

use crate::plugin::{Plugin, PluginContext, PluginKind, PluginResult};

fn interaction_code(interaction: Interaction) -> &'static str {
    match interaction {
        Interaction::Read => "read",
        Interaction::VRead => "vread",
        Interaction::Create => "create",
        Interaction::Update => "update",
        Interaction::Patch => "patch",
        Interaction::Delete => "delete",
        Interaction::Search => "search",
        Interaction::History => "history",
    }
}

/// Logs one structured audit line per request via `tracing`. A deployment
/// that needs a durable audit trail (e.g. `AuditEvent` resources persisted
/// through storage) wires its own [`Plugin`] against the same contract
/// instead of replacing this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl Plugin for TracingAuditLogger {
    fn kind(&self) -> PluginKind {
        PluginKind::Audit
    }

    fn is_async(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut PluginContext) -> PluginResult {
        match &ctx.aborted {
            Some(abort) => info!(
                interaction = interaction_code(ctx.interaction),
                resource_type = %ctx.resource_type,
                resource_id = ctx.resource_id.as_deref().unwrap_or(""),
                tenant_id = ctx.tenant_id,
                status = abort.status,
                "request aborted"
            ),
            None => info!(
                interaction = interaction_code(ctx.interaction),
                resource_type = %ctx.resource_type,
                resource_id = ctx.resource_id.as_deref().unwrap_or(""),
                tenant_id = ctx.tenant_id,
                "request completed"
            ),
        }
        PluginResult::Continue
    }
}
