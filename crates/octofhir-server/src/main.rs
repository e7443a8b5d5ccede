use std::process::ExitCode;

use octofhir_server::config::loader::load_config;
use octofhir_server::{init_tracing_with_level, shutdown_tracing, ServerBuilder};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::var("OCTOFHIR_CONFIG").ok();
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing_with_level(&config.logging.level);

    let server = match ServerBuilder::new(config).build().await {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, "failed to assemble server");
            shutdown_tracing();
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = server.run().await {
        tracing::error!(error = %err, "server error");
        shutdown_tracing();
        return ExitCode::FAILURE;
    }

    shutdown_tracing();
    ExitCode::SUCCESS
}
