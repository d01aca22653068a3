//! simfaas - Fission emulator backed by a simulated FaaS platform
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (127.0.0.1:8888, auto-create on)
//! simfaas
//!
//! # Reject functions that were never declared
//! CREATE_UNDEFINED_FUNCTIONS=false simfaas
//!
//! # Slower cold starts for auto-created functions
//! COLD_START_MS=2000 simfaas
//! ```

use std::sync::Arc;

use simfaas_core::custom::{echo, identity_resolver};
use simfaas_core::runtime::{build_runtime, RuntimeConfig};
use simfaas_core::{CustomHandler, EmulatorConfig, Fission, FissionServer, SimPlatform};
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let config = EmulatorConfig::from_env();
    info!(
        listen = %config.listen_addr,
        create_undefined_functions = config.create_undefined_functions,
        worker_threads = config.worker_threads,
        cpu_pinning = config.cpu_pinning,
        "Initializing emulator"
    );

    let runtime = match build_runtime(RuntimeConfig::from(&config)) {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        if let Err(e) = run(config).await {
            error!(error = %e, "Emulator failed");
            std::process::exit(1);
        }
    });
}

/// Initialize the tracing subscriber.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("simfaas_core=debug,info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

async fn run(config: EmulatorConfig) -> simfaas_core::Result<()> {
    let custom = CustomHandler::builder(identity_resolver())
        .handler("echo", echo)
        .build();

    let fission = Arc::new(
        Fission::new(Arc::new(SimPlatform::new()), config.function_factory())
            .create_undefined_functions(config.create_undefined_functions)
            .custom_handler(custom),
    );
    fission.start()?;

    let server = FissionServer::new(Arc::clone(&fission))?;
    let result = server.run(config.listen_addr).await;

    fission.close()?;
    result
}
