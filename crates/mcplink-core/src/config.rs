//! Environment-driven configuration for both roles of the binary.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors surfaced at startup.
///
/// These are the only fatal errors in the bridge: everything else is retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The required `MCP_ENDPOINT` variable is not set.
    #[error("the `MCP_ENDPOINT` environment variable must be set")]
    MissingEndpoint,
}

/// Configuration for the bridge role.
///
/// Loaded once at startup from the environment:
///
/// - `MCP_ENDPOINT` (required): WebSocket URI of the remote endpoint
/// - `MCPLINK_RESET_BACKOFF` (optional): reset the reconnect counter after a
///   successful connection (`1`, `true`, or `yes`, case-insensitive); off by
///   default to match the reference behavior
/// - `MCPLINK_HANDLER` (optional): path of the protocol handler executable;
///   defaults to the current executable re-invoked with the `serve` role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// WebSocket URI of the remote endpoint.
    pub endpoint: String,

    /// Reset the backoff failure counter after a successful connection.
    pub reset_backoff: bool,

    /// Override for the handler executable path.
    pub handler_override: Option<PathBuf>,
}

impl BridgeConfig {
    /// Load the bridge configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = env::var("MCP_ENDPOINT").map_err(|_| ConfigError::MissingEndpoint)?;
        Ok(Self {
            endpoint,
            reset_backoff: env_flag("MCPLINK_RESET_BACKOFF"),
            handler_override: env::var_os("MCPLINK_HANDLER").map(PathBuf::from),
        })
    }
}

/// Default upstream endpoint of the chat-completion service.
pub const DEFAULT_API_BASE_URL: &str = "https://mfitixkd24e2jo7updj4rtpn.agents.do-ai.run";

/// Configuration for the handler role's upstream API call.
///
/// - `API_TOKEN` (optional): bearer credential; falls back to a placeholder
///   so the handler still starts without one
/// - `API_BASE_URL` (optional): upstream base URL
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bearer token sent with every upstream request.
    pub token: String,

    /// Base URL of the chat-completion service.
    pub base_url: String,
}

impl AgentConfig {
    /// Load the handler configuration from the environment.
    ///
    /// Infallible: both variables have defaults.
    pub fn from_env() -> Self {
        Self {
            token: env::var("API_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            base_url: env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}
