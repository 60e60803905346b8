//! Three-way duplex relay between the WebSocket and the handler's stdio.
//!
//! One relay runs per connection cycle. Three tasks are started together and
//! torn down together:
//!
//! - **inbound**: WebSocket frames -> handler stdin (newline appended)
//! - **outbound**: handler stdout lines -> WebSocket text frames (newline
//!   stripped), plus the periodic liveness probe
//! - **stderr**: handler stderr lines -> the local stderr, verbatim
//!
//! The first task to finish ends the cycle; the other two are aborted and
//! their stream handles dropped. Nothing restarts inside a cycle; the
//! supervisor spawns a fresh process and connection for the next one.

use crate::error::TransportError;
use crate::process::ProcessIo;
use crate::ws::{Connection, WsSink, WsSource};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval between client-initiated liveness probes.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// How long the remote may stay silent after a probe before the connection
/// is considered lost.
const PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Timing of the client-initiated liveness probe.
///
/// The defaults are the production values; tests shrink them to exercise
/// the timeout path without waiting out real probe windows.
#[derive(Clone, Copy, Debug)]
pub struct ProbeTiming {
    /// Interval between probes.
    pub interval: Duration,
    /// How long the remote may stay silent past a probe window before the
    /// connection is considered lost.
    pub timeout: Duration,
}

impl Default for ProbeTiming {
    fn default() -> Self {
        Self {
            interval: PING_INTERVAL,
            timeout: PING_TIMEOUT,
        }
    }
}

/// How a relay cycle ended.
///
/// Explicit result kinds instead of exceptions-as-control-flow: the
/// supervisor inspects the outcome to decide between backoff and clean exit.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The handler closed its stdout or stderr (EOF). Normal end of cycle.
    ProcessEof,
    /// The remote endpoint closed the connection.
    ConnectionClosed,
    /// External shutdown was requested while the relay was active.
    Shutdown,
    /// A stream failed mid-cycle.
    Failed(TransportError),
}

/// How a single relay task ended.
enum TaskEnd {
    ProcessEof,
    ConnectionClosed,
    Failed(TransportError),
}

/// Tracks when the remote endpoint was last heard from.
///
/// Touched by the inbound task on every received frame (pongs included),
/// checked by the outbound task before each probe. Millisecond resolution is
/// plenty for a 20s probe window.
struct Liveness {
    epoch: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        self.last_seen_ms
            .store(self.now_ms(), Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let idle_ms = self
            .now_ms()
            .saturating_sub(self.last_seen_ms.load(Ordering::Relaxed));
        Duration::from_millis(idle_ms)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Run one relay cycle until any side finishes or `cancel` fires.
///
/// All three tasks are aborted before this returns; the caller still owns
/// the process handle and must invoke its shutdown.
pub async fn run(conn: Connection, io: ProcessIo, cancel: &CancellationToken) -> RelayOutcome {
    run_with_timing(conn, io, cancel, ProbeTiming::default()).await
}

/// [`run`] with explicit probe timing.
pub async fn run_with_timing(
    conn: Connection,
    io: ProcessIo,
    cancel: &CancellationToken,
    timing: ProbeTiming,
) -> RelayOutcome {
    let (sink, source) = conn.split();
    let liveness = Arc::new(Liveness::new());
    liveness.touch();

    let mut inbound = tokio::spawn(inbound_task(source, io.stdin, Arc::clone(&liveness)));
    let mut outbound = tokio::spawn(outbound_task(sink, io.stdout, Arc::clone(&liveness), timing));
    let mut stderr = tokio::spawn(stderr_task(io.stderr));

    let outcome = tokio::select! {
        end = &mut inbound => task_outcome(end),
        end = &mut outbound => task_outcome(end),
        end = &mut stderr => task_outcome(end),
        _ = cancel.cancelled() => {
            info!("shutdown requested, stopping relay");
            RelayOutcome::Shutdown
        }
    };

    // Tear the remaining tasks down together; dropping their handles closes
    // the child pipes and the socket halves.
    inbound.abort();
    outbound.abort();
    stderr.abort();

    outcome
}

fn task_outcome(end: Result<TaskEnd, tokio::task::JoinError>) -> RelayOutcome {
    match end {
        Ok(TaskEnd::ProcessEof) => RelayOutcome::ProcessEof,
        Ok(TaskEnd::ConnectionClosed) => RelayOutcome::ConnectionClosed,
        Ok(TaskEnd::Failed(e)) => RelayOutcome::Failed(e),
        Err(e) => RelayOutcome::Failed(TransportError::Relay(format!("relay task died: {e}"))),
    }
}

/// WebSocket -> handler stdin.
///
/// Each text frame (binary frames decoded as UTF-8) is written with a
/// trailing newline and flushed immediately so the handler sees it without
/// buffering delay.
async fn inbound_task(
    mut source: WsSource,
    mut stdin: ChildStdin,
    liveness: Arc<Liveness>,
) -> TaskEnd {
    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return TaskEnd::Failed(TransportError::Connection(e.to_string())),
        };
        liveness.touch();
        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => return TaskEnd::Failed(e.into()),
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!("remote sent close frame");
                return TaskEnd::ConnectionClosed;
            }
            Message::Frame(_) => continue,
        };
        debug!(frame = %preview(&text), "ws -> handler");
        if let Err(e) = write_line(&mut stdin, &text).await {
            return TaskEnd::Failed(TransportError::Relay(format!(
                "handler stdin write failed: {e}"
            )));
        }
    }
    debug!("websocket stream ended");
    TaskEnd::ConnectionClosed
}

async fn write_line(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Handler stdout -> WebSocket, plus the liveness probe.
///
/// `next_line` already strips the trailing newline, so each stdout line maps
/// to exactly one text frame. EOF on stdout is the normal way a cycle ends.
async fn outbound_task(
    mut sink: WsSink,
    stdout: ChildStdout,
    liveness: Arc<Liveness>,
    timing: ProbeTiming,
) -> TaskEnd {
    let mut lines = BufReader::new(stdout).lines();
    let mut probes = tokio::time::interval_at(
        tokio::time::Instant::now() + timing.interval,
        timing.interval,
    );
    probes.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    debug!(frame = %preview(&line), "handler -> ws");
                    if let Err(e) = sink.send(Message::text(line)).await {
                        return TaskEnd::Failed(TransportError::Connection(e.to_string()));
                    }
                }
                Ok(None) => {
                    info!("handler stdout closed");
                    return TaskEnd::ProcessEof;
                }
                Err(e) => {
                    return TaskEnd::Failed(TransportError::Relay(format!(
                        "handler stdout read failed: {e}"
                    )));
                }
            },
            _ = probes.tick() => {
                if liveness.idle() > timing.interval + timing.timeout {
                    return TaskEnd::Failed(TransportError::ProbeTimeout);
                }
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    return TaskEnd::Failed(TransportError::Connection(e.to_string()));
                }
            }
        }
    }
}

/// Handler stderr -> local stderr, verbatim.
///
/// Not relayed over the network; this is the operator-visible diagnostics
/// channel of the handler.
async fn stderr_task(stderr: ChildStderr) -> TaskEnd {
    let mut lines = BufReader::new(stderr).lines();
    let mut out = tokio::io::stderr();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if out.write_all(line.as_bytes()).await.is_err()
                    || out.write_all(b"\n").await.is_err()
                {
                    return TaskEnd::Failed(TransportError::Relay(
                        "local stderr write failed".to_string(),
                    ));
                }
                let _ = out.flush().await;
            }
            Ok(None) => {
                info!("handler stderr closed");
                return TaskEnd::ProcessEof;
            }
            Err(e) => {
                return TaskEnd::Failed(TransportError::Relay(format!(
                    "handler stderr read failed: {e}"
                )));
            }
        }
    }
}

/// Truncate a frame for debug logging.
fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}
