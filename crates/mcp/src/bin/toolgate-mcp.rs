// Standalone MCP server binary

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use toolgate_core::config::ToolgateConfig;
use toolgate_core::{Runtime, UserId};
use toolgate_mcp::{toolkits, McpServer};

#[derive(Parser, Debug)]
#[command(name = "toolgate-mcp")]
#[command(about = "Toolgate MCP server over stdio", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "toolgate.toml")]
    config: PathBuf,

    /// Data directory for the connection store
    #[arg(short, long, env = "TOOLGATE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// User on whose behalf tools are called
    #[arg(short, long, env = "TOOLGATE_USER_ID")]
    user_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    tracing::info!("Toolgate MCP server starting...");

    let config = ToolgateConfig::load(&args.config, args.data_dir)?;
    let runtime = Runtime::build(&config, toolkits::builtin()?)?;
    let _maintenance = runtime.spawn_maintenance(Duration::from_secs(60));

    let server = McpServer::new(runtime.dispatcher.clone(), UserId::new(args.user_id));
    server.start().await?;

    Ok(())
}
