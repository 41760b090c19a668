//! Courier Dispatch Server
//!
//! Main entry point: loads configuration, starts the dispatch runtime and
//! runs until SIGINT/SIGTERM.

mod demo;
mod startup;

use clap::Parser;
use courier_infrastructure::init_tracing;
use courier_shared::config::ConfigLoader;
use std::path::PathBuf;

/// CLI arguments for courier-server
#[derive(clap::Parser, Debug)]
#[command(name = "courier-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Durable command and event dispatch server", long_about = None)]
struct Args {
    /// Optional .env file loaded before reading the environment
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Enable debug mode (overrides COURIER_LOG_LEVEL)
    #[arg(short, long)]
    debug: bool,

    /// Enqueue one demo Ping after startup
    #[arg(long)]
    ping: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ConfigLoader::new(args.env_file).load_dispatch_config()?;
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    let tracing_result = init_tracing(&config.logging);
    for error in &tracing_result.errors {
        eprintln!("tracing: {}", error);
    }

    let runtime = startup::start(config);

    if let Some(message) = args.ping {
        let outcome = runtime.dispatcher.enqueue(&demo::Ping::new(message)).await?;
        tracing::info!(outcome = ?outcome, "Demo ping enqueued");
    }

    let reason = startup::wait_for_signal().await;
    tracing::info!("Received {}, shutting down gracefully...", reason);

    if !runtime.shutdown(startup::SHUTDOWN_TIMEOUT).await {
        tracing::warn!("Some components did not stop in time");
    }

    Ok(())
}
