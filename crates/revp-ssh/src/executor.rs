//! The remote execution seam between observers and transport

use crate::error::Result;
use revp_types::ConnectionState;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of a bounded unary command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Lazily consumed line stream from a long-running remote command.
///
/// Dropping the stream (or calling `abort`) tears the remote command
/// down; the underlying child process is killed on drop.
pub struct LineStream {
    receiver: mpsc::Receiver<String>,
    cancel: CancellationToken,
}

impl LineStream {
    pub fn new(receiver: mpsc::Receiver<String>, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// Next line in remote emission order; `None` when the command ended
    pub async fn next_line(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Stop the remote command without waiting for it to finish
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run commands on a named host and stream their output.
///
/// Implementations keep one authenticated session per host; `run` and
/// `stream` must not perform a fresh login per call.
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Bounded unary command; returns even on non-zero remote exit.
    /// Transport-level failures (timeout, lost session, auth) error out.
    async fn run(&self, host: &str, argv: &[String], deadline: Duration)
        -> Result<CommandOutput>;

    /// Long-running command with lines delivered in emission order
    async fn stream(&self, host: &str, argv: &[String]) -> Result<LineStream>;

    /// Current connection health for a host
    async fn health(&self, host: &str) -> ConnectionState;
}
