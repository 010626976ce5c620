use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use toolgate_core::config::ToolgateConfig;

mod api;
mod config;
mod middleware;

#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(about = "Tool invocation gateway with per-user OAuth connections", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "toolgate.toml")]
    config: PathBuf,

    /// Data directory for storage
    #[arg(short, long, env = "TOOLGATE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Accept callers without a bearer token (local development)
    #[arg(long, env = "TOOLGATE_DISABLE_AUTH")]
    disable_auth: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolgate=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();

    tracing::info!("Starting Toolgate");
    tracing::info!("Data directory: {}", args.data_dir.display());

    let mut config = ToolgateConfig::load(&args.config, args.data_dir)?;
    if args.disable_auth {
        config.api.disable_auth = true;
    }

    let addr = format!("{}:{}", args.host, args.port);
    tracing::info!("Starting API server on {}", addr);

    api::serve(&addr, config).await?;

    Ok(())
}
