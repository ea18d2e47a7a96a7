//! Per-domain apply state for the status surface

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum ApplyState {
    /// Queued or mid-apply
    Pending,
    /// Live configuration matches the desired shape
    Applied,
    /// Last apply failed permanently; retained for visibility and not
    /// retried until inputs change or a sweep re-enqueues it
    Degraded(String),
}

impl ApplyState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ApplyState::Degraded(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainStatus {
    pub state: ApplyState,
    /// Revision of the desired service this status refers to; absent
    /// for a removal
    pub revision: Option<String>,
}
