use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SSH executor error: {0}")]
    Ssh(#[from] revp_ssh::SshError),

    #[error("Static route store error: {0}")]
    Store(#[from] revp_routes::StoreError),

    #[error("Proxy client error: {0}")]
    Proxy(#[from] revp_caddy::CaddyError),
}
