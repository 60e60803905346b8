#![deny(unsafe_code)]

//! mcplink: bridge between a remote WebSocket endpoint and a local stdio
//! MCP handler process.
//!
//! One binary, two roles:
//!
//! - **bridge** (default): maintain a persistent connection to the remote
//!   endpoint with exponential reconnect backoff, supervise one handler
//!   process per connection cycle, and relay newline-delimited protocol
//!   messages between the two.
//! - **serve**: the handler itself, a line-oriented MCP server over stdio
//!   exposing a single chat-completion tool that forwards to an upstream
//!   HTTP API.

pub mod agent;
pub mod signal;
pub mod supervisor;

pub use supervisor::ConnectionSupervisor;
