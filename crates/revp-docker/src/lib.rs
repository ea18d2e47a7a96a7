//! Remote Docker host observation for REVP
//!
//! One observer task per host walks the snapshot/stream/backoff state
//! machine: list all containers over the shared SSH session, subscribe
//! to the engine's event stream, inspect affected containers, and emit
//! canonical `HostEvent`s toward the service registry. A periodic
//! resync closes any gap the event stream may have left.

pub mod cli;
pub mod error;
pub mod observer;

pub use cli::{parse_event_line, parse_inspect_line};
pub use error::{DockerError, Result};
pub use observer::{HostObserver, ObserverConfig};
