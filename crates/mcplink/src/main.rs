//! mcplink entry point: role selection, logging, signal wiring.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcplink::agent::{self, AgentContext};
use mcplink::signal;
use mcplink::supervisor::ConnectionSupervisor;
use mcplink_core::{AgentConfig, BridgeConfig};
use mcplink_transport::ProcessConfig;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcplink", version, about = "WebSocket to stdio MCP bridge")]
struct Cli {
    #[command(subcommand)]
    role: Option<Role>,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Maintain the connection to the remote endpoint and relay to a
    /// supervised handler process (default).
    Bridge,
    /// Run as the stdio MCP handler.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr: in the serve role, stdout carries protocol
    // messages only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.role.unwrap_or(Role::Bridge) {
        Role::Bridge => run_bridge().await,
        Role::Serve => run_serve().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "exiting on unrecoverable error");
            ExitCode::FAILURE
        }
    }
}

async fn run_bridge() -> Result<()> {
    let config = BridgeConfig::from_env()?;
    let handler = handler_config(&config)?;

    let cancel = CancellationToken::new();
    signal::spawn_listener(cancel.clone());

    ConnectionSupervisor::new(config, handler, cancel).run().await
}

async fn run_serve() -> Result<()> {
    let ctx = AgentContext::new(AgentConfig::from_env())?;
    agent::run(ctx).await
}

/// The handler is this binary re-invoked with the `serve` role, unless an
/// explicit handler executable was configured.
fn handler_config(config: &BridgeConfig) -> Result<ProcessConfig> {
    let program = match &config.handler_override {
        Some(path) => path.clone(),
        None => std::env::current_exe().context("failed to resolve current executable")?,
    };
    Ok(ProcessConfig::new(program).with_arg("serve"))
}
