//! Error taxonomy and output flags for the inference pipeline.
//!
//! Errors split along the fatal/recoverable line: fatal conditions abort the
//! single job that triggered them and surface as `Err` values, while
//! recoverable conditions are folded into the output as [`OutputFlag`]
//! records so downstream diagram reviewers can sanity-check ambiguous
//! results. A fatal error in one job never affects other jobs.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors raised while building the per-job event model and graph.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ModelError {
    /// An event set references an event type that was never observed as an
    /// event in its own right. The input is malformed; the job is aborted
    /// without retry.
    #[error("event set on `{source_event}` references unknown event type `{event_type}`")]
    #[diagnostic(
        code(causeway::model::unknown_event_type),
        help("every event type referenced by an event set must also be recorded as an event")
    )]
    UnknownEventType {
        /// Event whose outgoing event set carries the dangling reference.
        source_event: String,
        /// The referenced but never-observed event type.
        event_type: String,
    },
}

/// Failure of the gate-partition feasibility search.
///
/// Not fatal on its own: callers fall back to a conservative OR grouping of
/// all branches and attach a [`FlagKind::AmbiguousLogic`] flag to the output.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum LogicError {
    #[error("no feasible gate partition reproduces the observed event sets over {{{branches}}}")]
    #[diagnostic(
        code(causeway::logic::ambiguous),
        help("the node is treated as an OR of all branches and flagged in the output")
    )]
    AmbiguousLogic {
        /// Comma-joined alphabet of branch event types under consideration.
        branches: String,
    },
}

/// Fatal errors raised by the loop detector.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum LoopError {
    /// A strongly connected component has no incoming edge from outside
    /// itself. A cycle nothing can enter indicates a detached component
    /// produced upstream.
    #[error("strongly connected component {{{events}}} has no start point")]
    #[diagnostic(
        code(causeway::loops::unreachable),
        help("a loop must be entered from outside; check the ingested sequences for detached cycles")
    )]
    UnreachableLoop {
        /// Comma-joined event types of the detached component.
        events: String,
    },
}

/// Errors raised by the diagram walker.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum WalkError {
    /// The node graph has no event node without incoming edges to start the
    /// walk from.
    #[error("node graph has no root node to start the walk from")]
    #[diagnostic(code(causeway::walk::missing_root))]
    MissingRoot,

    /// The walker could not identify any valid merge point for an open logic
    /// block and the branch could not be proven a kill path. Only surfaced
    /// when recovery by forced kill is impossible; otherwise the condition
    /// becomes a [`FlagKind::ForcedKill`] flag.
    #[error("no valid merge point found for open {operator} block at `{position}`")]
    #[diagnostic(code(causeway::walk::merge_not_found))]
    MergeNotFound { operator: String, position: String },
}

/// Per-job pipeline error wrapping the fatal stage errors.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Loop(#[from] LoopError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Walk(#[from] WalkError),
}

/// Kind of a recovered condition attached to an output graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Gate inference fell back to an all-OR grouping.
    AmbiguousLogic,
    /// The walker forced a kill/detach because no merge point could be
    /// proven.
    ForcedKill,
    /// Same-kind operator bunching could not be disambiguated; nested
    /// distinct gates were preserved.
    BunchedAmbiguity,
}

/// A recovered condition recorded on the output diagram graph.
///
/// Flags are ordered by the moment they were raised and serialize to JSON so
/// reviewing tools can list them next to the diagram.
///
/// # Examples
///
/// ```
/// use causeway::errors::{FlagKind, OutputFlag};
///
/// let flag = OutputFlag::new(FlagKind::ForcedKill, "branch `B` of AND block detached");
/// assert_eq!(flag.kind, FlagKind::ForcedKill);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFlag {
    pub when: DateTime<Utc>,
    pub kind: FlagKind,
    pub detail: String,
}

impl OutputFlag {
    pub fn new(kind: FlagKind, detail: impl Into<String>) -> Self {
        Self {
            when: Utc::now(),
            kind,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_mentions_both_events() {
        let err = ModelError::UnknownEventType {
            source_event: "A".into(),
            event_type: "B".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`A`"));
        assert!(msg.contains("`B`"));
    }

    #[test]
    fn output_flag_serializes_kind_as_snake_case() {
        let flag = OutputFlag::new(FlagKind::BunchedAmbiguity, "AND bunched with AND");
        let json = serde_json::to_string(&flag).unwrap();
        assert!(json.contains("bunched_ambiguity"));
    }

    #[test]
    fn pipeline_error_wraps_stage_errors() {
        let err: PipelineError = LoopError::UnreachableLoop {
            events: "A, B".into(),
        }
        .into();
        assert!(err.to_string().contains("no start point"));
    }
}
