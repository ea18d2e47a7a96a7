//! REVP daemon: configuration, supervision, and the status surface
//!
//! The binary wires the control plane together: one SSH executor, one
//! observer per enabled host, the static route store and its watcher,
//! the service registry, the reconciler, and a small health endpoint.
//! Shutdown is cooperative: a root cancellation token fans out to every
//! task and the supervisor drains them within the configured grace.

pub mod config;
pub mod error;
pub mod health;
pub mod supervisor;

pub use config::AppConfig;
pub use error::{DaemonError, Result};
pub use supervisor::Supervisor;
