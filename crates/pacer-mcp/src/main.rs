// SPDX-License-Identifier: Apache-2.0

//! Binary entry point for the pacer MCP server.

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Pacer MCP server: GitHub API gateway introspection over MCP.
#[derive(Debug, Parser)]
#[command(name = "pacer-mcp", version, about)]
struct Cli {
    /// Serve over HTTP instead of stdio.
    #[arg(long)]
    http: bool,

    /// Host to bind when serving over HTTP.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind when serving over HTTP.
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log to stderr; stdout belongs to the MCP protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = pacer_core::load_config()?;

    if cli.http {
        pacer_mcp::run_http(&config, &cli.host, cli.port).await
    } else {
        pacer_mcp::run_stdio(&config).await
    }
}
