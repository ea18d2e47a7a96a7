//! OpenSSH-backed executor with per-host control-master multiplexing

use crate::error::{Result, SshError};
use crate::executor::{CommandOutput, LineStream, RemoteExecutor};
use revp_types::{check_unique_aliases, ConnectionState, HostConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Channel depth between the child stdout reader and the consumer
const STREAM_CHANNEL_CAPACITY: usize = 1024;

/// OpenSSH client 255 exit marks a transport failure, everything else
/// is the remote command's own exit code
const SSH_TRANSPORT_FAILURE: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshExecutorConfig {
    /// Directory holding the per-host control sockets
    pub control_dir: PathBuf,
    pub connect_timeout: Duration,
    /// How long the master connection stays alive after the last client
    pub control_persist: Duration,
}

impl Default for SshExecutorConfig {
    fn default() -> Self {
        Self {
            control_dir: std::env::temp_dir().join("revp-ssh"),
            connect_timeout: Duration::from_secs(10),
            control_persist: Duration::from_secs(600),
        }
    }
}

/// Executor shelling out to the OpenSSH client.
///
/// `ControlMaster=auto` with a per-host `ControlPath` gives every host a
/// single multiplexed session shared by all `run` and `stream` calls.
pub struct SshExecutor {
    hosts: HashMap<String, HostConfig>,
    config: SshExecutorConfig,
}

impl SshExecutor {
    pub fn new(hosts: Vec<HostConfig>, config: SshExecutorConfig) -> Result<Self> {
        check_unique_aliases(&hosts).map_err(|e| SshError::InvalidHost(e.to_string()))?;
        let mut map = HashMap::new();
        for host in hosts {
            host.validate()
                .map_err(|e| SshError::InvalidHost(e.to_string()))?;
            map.insert(host.alias.clone(), host);
        }
        std::fs::create_dir_all(&config.control_dir)?;
        Ok(Self { hosts: map, config })
    }

    fn host(&self, alias: &str) -> Result<&HostConfig> {
        self.hosts
            .get(alias)
            .ok_or_else(|| SshError::UnknownHost(alias.to_string()))
    }

    /// Full ssh argv for a remote command on a host.
    ///
    /// Host fields are allowlist-validated at construction; the remote
    /// argv is shell-quoted because ssh joins it into one remote shell
    /// line.
    fn ssh_argv(&self, host: &HostConfig, remote: &[String]) -> Vec<String> {
        let control_path = self
            .config
            .control_dir
            .join(format!("{}.sock", host.alias));

        let mut argv = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.config.control_persist.as_secs()),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs()),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            host.port.to_string(),
        ];

        if let Some(identity) = &host.identity_file {
            argv.push("-i".to_string());
            argv.push(identity.clone());
        }

        argv.push(host.destination());
        argv.push("--".to_string());
        argv.push(remote_command(remote));
        argv
    }

    fn classify_transport_failure(host: &str, stderr: &str) -> SshError {
        let lower = stderr.to_lowercase();
        if lower.contains("permission denied") || lower.contains("authentication") {
            SshError::AuthFailed {
                host: host.to_string(),
                detail: stderr.trim().to_string(),
            }
        } else {
            SshError::Disconnected {
                host: host.to_string(),
                detail: stderr.trim().to_string(),
            }
        }
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        deadline: Duration,
    ) -> Result<CommandOutput> {
        let config = self.host(host)?;
        let ssh_args = self.ssh_argv(config, argv);
        debug!(host, command = %argv.join(" "), "running remote command");

        let output = tokio::time::timeout(
            deadline,
            Command::new("ssh")
                .args(&ssh_args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| SshError::Timeout(host.to_string()))??;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == SSH_TRANSPORT_FAILURE {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify_transport_failure(host, &stderr));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn stream(&self, host: &str, argv: &[String]) -> Result<LineStream> {
        let config = self.host(host)?;
        let ssh_args = self.ssh_argv(config, argv);
        debug!(host, command = %argv.join(" "), "starting remote stream");

        let mut command = Command::new("ssh");
        command
            .args(&ssh_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(spawn_line_stream(command, host.to_string()).await?)
    }

    async fn health(&self, host: &str) -> ConnectionState {
        let probe = vec!["true".to_string()];
        match self.run(host, &probe, Duration::from_secs(15)).await {
            Ok(output) if output.success() => ConnectionState::Connected,
            Ok(output) => {
                ConnectionState::Disconnected(format!("probe exited {}", output.exit_code))
            }
            Err(e) if e.is_transient() => ConnectionState::Disconnected(e.to_string()),
            Err(e) => ConnectionState::Failed(e.to_string()),
        }
    }
}

/// Spawn a child and forward its stdout line-by-line into a bounded
/// channel. The child dies when the stream is dropped or aborted.
pub(crate) async fn spawn_line_stream(mut command: Command, host: String) -> Result<LineStream> {
    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SshError::Io(std::io::Error::other("child stdout not captured")))?;
    let stderr = child.stderr.take();

    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    if let Some(stderr) = stderr {
        let stderr_host = host.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(host = %stderr_host, line = %line, "remote stderr");
            }
        });
    }

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    debug!(host = %host, "stream cancelled");
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            // A full channel blocks the reader, which is
                            // the intended backpressure on the remote
                            if tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(host = %host, "remote stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!(host = %host, error = %e, "remote stream read error");
                            break;
                        }
                    }
                }
            }
        }
        // Dropping the child here kills it via kill_on_drop
        drop(child);
    });

    Ok(LineStream::new(rx, cancel))
}

/// Join remote argv into a single shell line, quoting anything the
/// remote shell could split or expand
fn remote_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/:=,@".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
