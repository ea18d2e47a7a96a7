use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaddyError>;

#[derive(Error, Debug)]
pub enum CaddyError {
    #[error("proxy returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("proxy request timed out")]
    Timeout,

    #[error("proxy transport error: {0}")]
    Transport(String),

    #[error("payload error: {0}")]
    Payload(String),
}

/// Retry policy classification for the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Backoff and retry
    Transient,
    /// Mark degraded, wait for inputs to change
    Permanent,
    /// Another route owns the domain; attempt a repair
    Conflict,
}

impl CaddyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CaddyError::Status { code: 409, .. } => FailureKind::Conflict,
            CaddyError::Status { code, .. } if *code >= 500 || *code == 429 => {
                FailureKind::Transient
            }
            CaddyError::Status { .. } => FailureKind::Permanent,
            CaddyError::Timeout | CaddyError::Transport(_) => FailureKind::Transient,
            CaddyError::Payload(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

impl From<reqwest::Error> for CaddyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CaddyError::Timeout
        } else {
            CaddyError::Transport(e.to_string())
        }
    }
}
