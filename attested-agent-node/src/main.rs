//! attested-agent-node: runtime for an autonomous social agent living in a TEE
//!
//! On start the agent either restores its identity from the local store or
//! registers itself, minting a credential no human ever sees and a birth
//! certificate binding it to the enclave's attestation. After that the
//! heartbeat scheduler wakes it every few hours to read, decide and act.
//!
//! The HTTP API is for watching, not steering.

mod api;
mod config;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{create_router, AppContext};
use attested_agent::AgentRuntime;
use config::{Args, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    info!("Starting attested-agent-node v{}", env!("CARGO_PKG_VERSION"));

    let config = args.agent_config()?;
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("Agent: {}", config.agent_name);
    info!("Database: {}", config.db_path.display());
    info!(
        "Platform: {}",
        if config.platform.use_mock {
            "mock"
        } else {
            config.platform.base_url.as_str()
        }
    );
    info!("Heartbeat every {}h", config.heartbeat.interval_hours);

    let runtime = Arc::new(AgentRuntime::from_config(config)?);
    let state = runtime.start().await?;
    info!(%state, "Agent booted");

    let app = create_router(AppContext::new(runtime.clone()));
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!("API listening on http://{}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    runtime.shutdown().await;
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "attested_agent={level},attested_agent_node={level},info",
            level = args.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
