use thiserror::Error;

pub type Result<T> = std::result::Result<T, SshError>;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Unknown host alias: {0}")]
    UnknownHost(String),

    #[error("Host validation failed: {0}")]
    InvalidHost(String),

    #[error("SSH command timed out on {0}")]
    Timeout(String),

    #[error("SSH authentication failed on {host}: {detail}")]
    AuthFailed { host: String, detail: String },

    #[error("SSH connection to {host} lost: {detail}")]
    Disconnected { host: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SshError {
    /// Transient errors are worth a reconnect with backoff; permanent
    /// ones are surfaced as `Failed` and wait for a config change.
    pub fn is_transient(&self) -> bool {
        match self {
            SshError::Timeout(_) | SshError::Disconnected { .. } | SshError::Io(_) => true,
            SshError::AuthFailed { .. } | SshError::UnknownHost(_) | SshError::InvalidHost(_) => {
                false
            }
        }
    }
}
