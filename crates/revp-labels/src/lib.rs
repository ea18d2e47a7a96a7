//! Compilation of routing intent into validated services
//!
//! Two sources feed the registry: `snadboy.revp.<port>.<property>`
//! container labels and static route records. Both compile through this
//! crate into `Service` values plus warnings. Compilation is total:
//! invalid input is dropped with a warning, never an error, and the raw
//! label map does not travel past this crate.

pub mod labels;
pub mod statics;
pub mod warning;

pub use labels::compile_container;
pub use statics::{compile_static_record, compile_static_records};
pub use warning::CompileWarning;
