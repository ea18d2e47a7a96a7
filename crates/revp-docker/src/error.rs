use thiserror::Error;

pub type Result<T> = std::result::Result<T, DockerError>;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("SSH error: {0}")]
    Ssh(#[from] revp_ssh::SshError),

    #[error("docker {command} failed on {host}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        stderr: String,
    },

    #[error("Failed to parse docker output: {0}")]
    Parse(String),

    #[error("Event channel closed")]
    ChannelClosed,
}

impl DockerError {
    /// Whether a reconnect with backoff is worth attempting
    pub fn is_transient(&self) -> bool {
        match self {
            DockerError::Ssh(e) => e.is_transient(),
            // A failing docker binary or bad output is not fixed by
            // reconnecting, but the periodic resync will retry anyway
            DockerError::CommandFailed { .. } | DockerError::Parse(_) => true,
            DockerError::ChannelClosed => false,
        }
    }
}
