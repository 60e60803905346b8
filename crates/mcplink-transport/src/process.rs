//! Lifecycle management for the handler child process.

use crate::error::{Result, TransportError};
use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Configuration for spawning the handler process.
///
/// The child inherits the parent's environment (the handler needs the same
/// `API_TOKEN` the bridge was started with) plus any explicit overrides.
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Path of the executable to spawn.
    pub program: OsString,

    /// Arguments to pass.
    pub args: Vec<OsString>,

    /// Environment overrides applied on top of the inherited environment.
    pub env: HashMap<String, String>,
}

impl ProcessConfig {
    /// Create a configuration for `program` with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Append an argument.
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment override for the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The three pipes of a spawned handler process.
///
/// Handed to the relay exactly once per cycle; no other component reads or
/// writes them.
#[derive(Debug)]
pub struct ProcessIo {
    /// Write end of the child's stdin.
    pub stdin: ChildStdin,
    /// Read end of the child's stdout.
    pub stdout: ChildStdout,
    /// Read end of the child's stderr.
    pub stderr: ChildStderr,
}

/// A supervised child process with piped stdio.
///
/// Exactly one exists per connection cycle. [`ManagedProcess::shutdown`] is
/// invoked on every exit path of the cycle and escalates from SIGTERM to
/// SIGKILL if the child does not exit within the grace period.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    io: Option<ProcessIo>,
}

impl ManagedProcess {
    /// Spawn the configured process with stdin, stdout, and stderr piped.
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Last-resort cleanup if the supervisor future is dropped.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Spawn(format!("{}: {e}", config.program.to_string_lossy()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Spawn("child stderr not captured".to_string()))?;

        info!(
            program = %config.program.to_string_lossy(),
            pid = child.id(),
            "spawned handler process"
        );

        Ok(Self {
            child,
            io: Some(ProcessIo {
                stdin,
                stdout,
                stderr,
            }),
        })
    }

    /// Take the child's stdio pipes for the relay.
    ///
    /// Fails if they were already taken this cycle.
    pub fn take_io(&mut self) -> Result<ProcessIo> {
        self.io
            .take()
            .ok_or_else(|| TransportError::Relay("process stdio already taken".to_string()))
    }

    /// OS process id, if the child has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Terminate the child, escalating to a kill after `grace`.
    ///
    /// Idempotent: safe to call when the child has already exited, and safe
    /// to call more than once.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!(%status, "handler process already exited");
            return Ok(());
        }

        info!("terminating handler process");
        self.terminate();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(%status, "handler process exited");
                Ok(())
            }
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "handler did not exit in time, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "failed to send SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "failed to kill handler process");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn spawn_failure_reports_spawn_error() {
        let config = ProcessConfig::new("/nonexistent/mcplink-handler");
        let err = ManagedProcess::spawn(&config).unwrap_err();
        assert!(matches!(err, TransportError::Spawn(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn spawned_process_echoes_over_pipes() {
        let config = ProcessConfig::new("cat");
        let mut process = ManagedProcess::spawn(&config).unwrap();
        let mut io = process.take_io().unwrap();

        io.stdin.write_all(b"hello\n").await.unwrap();
        io.stdin.flush().await.unwrap();

        let mut line = String::new();
        BufReader::new(io.stdout).read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello\n");

        process.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn io_can_only_be_taken_once() {
        let mut process = ManagedProcess::spawn(&ProcessConfig::new("cat")).unwrap();
        assert!(process.take_io().is_ok());
        assert!(matches!(
            process.take_io().unwrap_err(),
            TransportError::Relay(_)
        ));
        process.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_after_exit() {
        let config = ProcessConfig::new("sh").with_arg("-c").with_arg("exit 0");
        let mut process = ManagedProcess::spawn(&config).unwrap();
        // Let the child exit on its own first.
        process.shutdown(Duration::from_secs(5)).await.unwrap();
        process.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_kills_a_term_ignoring_child() {
        let config = ProcessConfig::new("sh")
            .with_arg("-c")
            .with_arg("trap '' TERM; while true; do sleep 0.05; done");
        let mut process = ManagedProcess::spawn(&config).unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        process.shutdown(Duration::from_millis(300)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(process.id().is_none() || process.child.try_wait().unwrap().is_some());
    }
}
