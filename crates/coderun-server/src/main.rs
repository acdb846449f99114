//! HTTP server exposing the sandbox to a request layer.

use anyhow::Result;
use clap::Parser;
use coderun_core::{ConfigLoader, SandboxExecutor};
use coderun_server::{shutdown_signal, SandboxServer, ServerConfig};
use log::LevelFilter;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "coderun server - run untrusted code submissions in a sandbox")]
struct Cli {
    #[clap(long, short, default_value = "coderun.yaml", help = "Configuration file; defaults are used when it does not exist")]
    config: String,

    #[clap(long, default_value = "127.0.0.1:8000")]
    bind_addr: String,

    #[clap(long, short, help = "Log level; overrides logging.level from the configuration file")]
    log_level: Option<String>,

    #[clap(long, help = "Maximum request body size in bytes", default_value_t = 256 * 1024)]
    max_body_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let sandbox_config = ConfigLoader::from_optional_file(&cli.config).await?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&sandbox_config.logging.level);
    env_logger::Builder::new()
        .filter_level(level.parse().unwrap_or(LevelFilter::Info))
        .init();

    let executor = SandboxExecutor::docker(sandbox_config)?;
    executor.prepare().await?;

    let bind_socket_addr: SocketAddr = cli
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", cli.bind_addr, e))?;

    let server_config = ServerConfig::default()
        .with_bind_addr(bind_socket_addr)
        .with_max_body_size(cli.max_body_size)
        .with_logging(true);

    let server = SandboxServer::with_config(Arc::new(executor), server_config);

    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
