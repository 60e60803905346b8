#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Core abstractions for the mcplink bridge.
//!
//! This crate holds the pieces of the bridge that do no I/O:
//!
//! - **Reconnect backoff** via [`BackoffPolicy`] and [`BackoffState`]
//! - **Environment-driven configuration** via [`BridgeConfig`] and [`AgentConfig`]
//!
//! The transport layer (`mcplink-transport`) and the binary (`mcplink`) build
//! on these without adding any coupling in the other direction.

pub mod config;
pub mod retry;

pub use config::{AgentConfig, BridgeConfig, ConfigError};
pub use retry::{BackoffPolicy, BackoffPolicyBuilder, BackoffState};
