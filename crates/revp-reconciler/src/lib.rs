//! Route reconciliation for REVP
//!
//! Drives the proxy's live configuration toward the registry's desired
//! set: per-domain serialized apply operations with bounded retries and
//! jittered backoff, a bounded worker pool across domains, and a
//! periodic full sweep that collects orphans and repairs drift the
//! event path missed.

pub mod reconciler;
pub mod status;

pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
pub use status::{ApplyState, DomainStatus};
