pub mod audit;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod conformance;
pub mod conformance_store;
pub mod error_response;
pub mod guard;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod operations;
pub mod patch;
pub mod plugin;
pub mod server;
pub mod validation;

pub use config::AppConfig;
pub use conformance_store::{ArtifactFilter, ArtifactKind, ConformanceArtifact, ConformanceArtifactStore};
pub use observability::{apply_logging_level, init_tracing, init_tracing_with_level, shutdown_tracing};
pub use operations::{DynOperationHandler, OperationHandler, OperationInvocation, OperationOutput, OperationRegistry, OperationScope};
pub use plugin::{Plugin, PluginContext, PluginKind, PluginOrchestrator, PluginResult};
pub use server::{AppState, OctofhirServer, ServerBuilder, build_app};
pub use validation::{AlwaysValidValidator, ExternalValidator, ValidationFacade};
