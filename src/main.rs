use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use strata::model::input::load_tokenizer;
use strata::web::{run_server, AppState, ServerConfig};

/// Backend server for the Strata model inspector.
#[derive(Debug, Parser)]
#[command(name = "strata", version, about)]
struct Cli {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Capacity of the live stream queue; items beyond it are dropped.
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,

    /// Tokenizer file enabling the `text` input hint.
    #[arg(long)]
    tokenizer: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let tokenizer = match &cli.tokenizer {
        Some(path) => Some(load_tokenizer(path)?),
        None => None,
    };

    let state = AppState::new(cli.queue_capacity, tokenizer);
    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        cors_permissive: true,
    };
    run_server(state, config).await
}
