//! Warnings produced while compiling routing intent

use serde::Serialize;

/// A dropped or degraded piece of routing intent.
///
/// Warnings are surfaced on the status interface and logged; they never
/// stop compilation of the remaining input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CompileWarning {
    /// A label partition has no `domain` property
    MissingDomain { source: String, port: u16 },
    /// The labeled container port is not published on the host
    UnpublishedPort {
        source: String,
        port: u16,
        domain: String,
    },
    /// A label or record field failed validation
    InvalidValue {
        source: String,
        field: String,
        value: String,
        detail: String,
    },
    /// A whole static record was rejected
    InvalidRecord { source: String, detail: String },
    /// Two sources claimed the same domain; the loser was dropped
    DomainConflict {
        domain: String,
        winner: String,
        loser: String,
    },
}

impl std::fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileWarning::MissingDomain { source, port } => {
                write!(f, "{}: port {} has labels but no domain", source, port)
            }
            CompileWarning::UnpublishedPort {
                source,
                port,
                domain,
            } => write!(
                f,
                "{}: container port {} for {} is not published",
                source, port, domain
            ),
            CompileWarning::InvalidValue {
                source,
                field,
                value,
                detail,
            } => write!(f, "{}: {}={} rejected: {}", source, field, value, detail),
            CompileWarning::InvalidRecord { source, detail } => {
                write!(f, "{}: record rejected: {}", source, detail)
            }
            CompileWarning::DomainConflict {
                domain,
                winner,
                loser,
            } => write!(f, "{}: kept {} over {}", domain, winner, loser),
        }
    }
}
