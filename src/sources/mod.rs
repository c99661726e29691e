//! Per-source fetch + normalize units.
//!
//! Each source module exposes an async `collect` that returns its outcome
//! together with the request traces it produced. Failures are contained
//! inside the outcome; collecting one source never fails the siblings.

pub mod air;
pub mod transit;
pub mod weather;

use serde::Serialize;

/// Where a source ended up this run. `Disabled` is reached without any
/// fetch being attempted; `Error` and `Disabled` both route dependent
/// penalties to their configured fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Disabled,
    Error,
}
