//! Static route persistence for REVP
//!
//! A flat YAML file (`static_routes:` list) is the durable source of
//! statically declared services. The store serializes every mutation,
//! writes atomically (temp file + rename on the same directory), and
//! broadcasts a change event after each successful mutation or detected
//! external edit. A reader of the file never observes a torn document.

pub mod error;
pub mod store;
pub mod watcher;

pub use error::{Result, StoreError};
pub use store::{StaticRouteStore, StoreEvent, StoreInfo};
pub use watcher::watch_store;
