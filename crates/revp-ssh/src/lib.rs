//! SSH remote command execution for REVP
//!
//! One multiplexed SSH session per host (OpenSSH control master); every
//! `run` and `stream` call rides the shared authenticated channel rather
//! than opening a fresh login. The crate exposes the `RemoteExecutor`
//! trait consumed by host observers, so tests can substitute a fake.

pub mod error;
pub mod executor;
pub mod ssh;

pub use error::{Result, SshError};
pub use executor::{CommandOutput, LineStream, RemoteExecutor};
#[cfg(feature = "mocks")]
pub use executor::MockRemoteExecutor;
pub use ssh::{SshExecutor, SshExecutorConfig};
