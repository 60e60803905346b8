//! The connection supervisor: connect, spawn, relay, tear down, repeat.

use anyhow::Result;
use mcplink_core::{BackoffPolicy, BackoffState, BridgeConfig};
use mcplink_transport::{Connection, ManagedProcess, ProcessConfig, RelayOutcome, relay};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period between asking the handler to terminate and killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Drives connection cycles until an external shutdown is requested.
///
/// Each cycle: wait out the backoff (none before the first attempt), connect
/// to the remote endpoint, spawn the handler process, run the relay, then
/// tear the process and the connection down on every exit path. Any
/// failure along the way is recorded and the loop continues; only a
/// cancelled token ends it, with a clean `Ok`.
///
/// At most one connection and one handler process exist at a time: both are
/// locals of the cycle body.
pub struct ConnectionSupervisor {
    config: BridgeConfig,
    handler: ProcessConfig,
    policy: BackoffPolicy,
    backoff: BackoffState,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    /// Create a supervisor that spawns `handler` once per cycle.
    pub fn new(config: BridgeConfig, handler: ProcessConfig, cancel: CancellationToken) -> Self {
        let backoff = BackoffState::new(config.reset_backoff);
        Self {
            config,
            handler,
            policy: BackoffPolicy::default(),
            backoff,
            cancel,
        }
    }

    /// Run the reconnect loop until shutdown.
    pub async fn run(mut self) -> Result<()> {
        loop {
            if let Some(delay) = self.backoff.delay_before_next_attempt(&self.policy) {
                warn!(
                    attempt = self.backoff.failures(),
                    delay_secs = delay.as_secs(),
                    "waiting before reconnection attempt"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {
                        info!("shutdown requested during backoff");
                        return Ok(());
                    }
                }
            }

            info!(endpoint = %self.config.endpoint, "connecting to remote endpoint");
            let conn = tokio::select! {
                result = Connection::connect(&self.config.endpoint) => match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "connection failed");
                        self.backoff.record_failure();
                        continue;
                    }
                },
                _ = self.cancel.cancelled() => {
                    info!("shutdown requested while connecting");
                    return Ok(());
                }
            };
            info!("connected");
            self.backoff.record_success();

            let mut process = match ManagedProcess::spawn(&self.handler) {
                Ok(process) => process,
                Err(e) => {
                    // Dropping the connection closes the socket.
                    warn!(error = %e, "failed to spawn handler");
                    self.backoff.record_failure();
                    continue;
                }
            };

            let outcome = match process.take_io() {
                Ok(io) => relay::run(conn, io, &self.cancel).await,
                Err(e) => RelayOutcome::Failed(e),
            };

            // Guaranteed teardown, whatever ended the cycle.
            if let Err(e) = process.shutdown(SHUTDOWN_GRACE).await {
                warn!(error = %e, "handler teardown failed");
            }

            match outcome {
                RelayOutcome::Shutdown => {
                    info!("shutdown complete");
                    return Ok(());
                }
                RelayOutcome::ProcessEof => info!("handler closed its streams"),
                RelayOutcome::ConnectionClosed => info!("remote endpoint closed the connection"),
                RelayOutcome::Failed(e) => warn!(error = %e, "relay failed"),
            }
            self.backoff.record_failure();
        }
    }
}
