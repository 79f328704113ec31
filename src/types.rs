//! Core types shared across the causeway inference pipeline.
//!
//! This module defines the closed vocabulary of the domain: the logic-gate
//! kinds inferred from observed event sets, the diagram-operator kinds they
//! are lowered to, and the per-event annotation flags carried from inference
//! into the emitted diagram. Every consumer matches on these enums
//! exhaustively; the variant sets are fixed by the diagram notation and are
//! not expected to grow.
//!
//! # Key Types
//!
//! - [`GateKind`]: logic-gate kinds produced by gate inference
//! - [`PumlOperator`] / [`OperatorRole`]: diagram operator blocks and the
//!   position of a node within one
//! - [`EventFlags`]: per-event annotations (branch, merge, break, loop)
//!
//! # Examples
//!
//! ```rust
//! use causeway::types::{GateKind, OperatorRole, PumlOperator};
//!
//! let gate = GateKind::And;
//! assert_eq!(gate.to_string(), "AND");
//! assert_eq!(PumlOperator::from(gate), PumlOperator::And);
//! assert!(OperatorRole::Start != OperatorRole::End);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthetic root event inserted when a job has no unique entry point.
///
/// The marker never appears in emitted diagrams; it exists so that every
/// event graph has exactly one walk root and is stripped from the final
/// diagram graph.
pub const DUMMY_START_EVENT: &str = "|||START|||";

/// Synthetic terminal event used inside extracted loop sub-graphs when the
/// loop has more than one end point.
pub const DUMMY_END_EVENT: &str = "|||END|||";

/// Name prefix for the opaque events that replace detected loops.
pub const LOOP_EVENT_TYPE_PREFIX: &str = "LOOP";

/// Kind of a logic gate inferred from observed event sets.
///
/// `And`, `Or` and `Xor` describe how the outgoing branches of an event may
/// fire together. `Branch` is the degenerate gate wrapping a tree whose
/// branch multiplicities vary between observations; it carries no fork/merge
/// semantics of its own and is rendered as a count annotation instead.
///
/// # Examples
///
/// ```rust
/// use causeway::types::GateKind;
///
/// assert!(GateKind::And.is_overlapping());
/// assert!(GateKind::Or.is_overlapping());
/// assert!(!GateKind::Xor.is_overlapping());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GateKind {
    /// All branches fire concurrently.
    And,
    /// Any non-empty subset of branches fires.
    Or,
    /// Exactly one branch fires.
    Xor,
    /// Branch multiplicities vary between observations.
    Branch,
}

impl GateKind {
    /// Returns `true` for gate kinds whose branches can co-occur, which is
    /// what makes their merge points subject to the event-set feasibility
    /// check during the diagram walk.
    #[must_use]
    pub fn is_overlapping(&self) -> bool {
        matches!(self, GateKind::And | GateKind::Or)
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateKind::And => write!(f, "AND"),
            GateKind::Or => write!(f, "OR"),
            GateKind::Xor => write!(f, "XOR"),
            GateKind::Branch => write!(f, "BRANCH"),
        }
    }
}

/// Operator block kinds in the emitted diagram.
///
/// `Loop` has no counterpart in [`GateKind`]; it is produced by loop folding
/// rather than gate inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PumlOperator {
    And,
    Or,
    Xor,
    Loop,
}

impl fmt::Display for PumlOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumlOperator::And => write!(f, "AND"),
            PumlOperator::Or => write!(f, "OR"),
            PumlOperator::Xor => write!(f, "XOR"),
            PumlOperator::Loop => write!(f, "LOOP"),
        }
    }
}

impl From<GateKind> for PumlOperator {
    /// Lowers a gate kind to its diagram operator. `Branch` gates never
    /// reach the operator layer (they are rendered as annotations), so they
    /// lower to the conservative `Or`.
    fn from(kind: GateKind) -> Self {
        match kind {
            GateKind::And => PumlOperator::And,
            GateKind::Or => PumlOperator::Or,
            GateKind::Xor => PumlOperator::Xor,
            GateKind::Branch => PumlOperator::Or,
        }
    }
}

/// Position of an operator node within its block.
///
/// Every block is opened by exactly one `Start` node and closed by exactly
/// one `End` node; `Path` nodes separate the branches in the serialized
/// output and are synthesized during serialization rather than during the
/// walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorRole {
    Start,
    Path,
    End,
}

impl fmt::Display for OperatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorRole::Start => write!(f, "START"),
            OperatorRole::Path => write!(f, "PATH"),
            OperatorRole::End => write!(f, "END"),
        }
    }
}

/// Annotation flags carried by an event node from inference into the
/// diagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    /// Branch multiplicities for this event vary between observations.
    pub branch: bool,
    /// Incoming event sets show branch-like counts; merge feasibility checks
    /// are relaxed for this node.
    pub merge: bool,
    /// The event is a loop break point; its block ends with a break marker.
    pub break_point: bool,
    /// The event is an opaque loop node carrying a nested sub-diagram.
    pub loop_node: bool,
}

impl EventFlags {
    /// Flags for an ordinary event with no annotations.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if no annotation is set.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}
