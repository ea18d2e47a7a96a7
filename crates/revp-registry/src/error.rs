use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Diff channel closed")]
    ChannelClosed,

    #[error("Store error: {0}")]
    Store(#[from] revp_routes::StoreError),
}
