#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Transport layer for the mcplink bridge.
//!
//! Everything that touches the network or the handler process lives here:
//!
//! - [`Connection`]: WebSocket connection to the remote endpoint
//! - [`ManagedProcess`]: the supervised handler child process
//! - [`relay`]: the three-way duplex relay between the two
//!
//! The supervisor in the `mcplink` binary owns the lifecycle: it connects,
//! spawns, runs the relay, and tears both sides down at the end of every
//! cycle. This crate only guarantees that each of those steps either works
//! or reports a [`TransportError`] the supervisor can act on.

pub mod error;
pub mod process;
pub mod relay;
pub mod ws;

pub use error::{Result, TransportError};
pub use process::{ManagedProcess, ProcessConfig, ProcessIo};
pub use relay::{ProbeTiming, RelayOutcome};
pub use ws::Connection;
