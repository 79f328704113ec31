//! Logic-gate inference over observed event sets.
//!
//! For a node with outgoing event sets S1..Sn, this stage determines the
//! minimal nesting of AND/OR/XOR gates and branch counts consistent with
//! every Si being a realizable concurrent occurrence pattern. The result is
//! a [`GateTree`] annotation per node; the event graph itself is never
//! mutated here.
//!
//! The partitioning is solved behind the narrow [`GateSolver`] trait so the
//! solving strategy can be swapped without touching the loop detector or the
//! walker. The default [`CoverSolver`] is a combinatorial search over
//! co-occurrence classes and weighted set covers.
//!
//! Infeasibility is not fatal: [`infer_gate_tree_with_fallback`] degrades to
//! a conservative OR of all branches and reports the condition as an output
//! flag.
//!
//! # Examples
//!
//! ```
//! use causeway::events::EventSet;
//! use causeway::logic::{GateTree, infer_gate_tree};
//! use causeway::types::GateKind;
//! use rustc_hash::FxHashSet;
//!
//! let mut sets = FxHashSet::default();
//! sets.insert(EventSet::new(["B", "C"]));
//! sets.insert(EventSet::new(["D", "C"]));
//!
//! let tree = infer_gate_tree(&sets).unwrap().unwrap();
//! assert_eq!(tree.kind(), Some(GateKind::And));
//! ```

mod solver;

pub use solver::{CoverSolver, GateSolver};

use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::{FlagKind, LogicError, OutputFlag};
use crate::events::{EventSet, event_set_counts};
use crate::types::GateKind;

/// A tree of inferred logic gates over branch event types.
///
/// Leaves carry the branch multiplicity observed for their event type; a
/// count above one means the event occurs that many times concurrently and
/// is emitted as a single annotated diagram node. A `Branch` gate at the
/// root marks a tree whose multiplicities vary between observations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateTree {
    Leaf { event_type: String, count: u32 },
    Gate { kind: GateKind, children: Vec<GateTree> },
}

impl GateTree {
    pub fn leaf(event_type: impl Into<String>) -> Self {
        GateTree::Leaf {
            event_type: event_type.into(),
            count: 1,
        }
    }

    pub fn counted_leaf(event_type: impl Into<String>, count: u32) -> Self {
        GateTree::Leaf {
            event_type: event_type.into(),
            count,
        }
    }

    pub fn gate(kind: GateKind, children: Vec<GateTree>) -> Self {
        GateTree::Gate { kind, children }
    }

    /// The gate kind at the root, `None` for a leaf.
    #[must_use]
    pub fn kind(&self) -> Option<GateKind> {
        match self {
            GateTree::Leaf { .. } => None,
            GateTree::Gate { kind, .. } => Some(*kind),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, GateTree::Leaf { .. })
    }

    /// In-order `(event_type, count)` pairs of all leaves.
    #[must_use]
    pub fn leaves(&self) -> Vec<(&str, u32)> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(&'a str, u32)>) {
        match self {
            GateTree::Leaf { event_type, count } => out.push((event_type, *count)),
            GateTree::Gate { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Distinct event types across all leaves.
    #[must_use]
    pub fn leaf_types(&self) -> BTreeSet<String> {
        self.leaves()
            .into_iter()
            .map(|(event, _)| event.to_string())
            .collect()
    }

    /// Whether any AND/OR gate in the tree contains leaves both inside and
    /// outside `types`. Loop folding uses this to decide if an exit branch
    /// overlaps concurrently with the in-loop continuation.
    #[must_use]
    pub fn has_overlapping_gate_across(&self, types: &BTreeSet<String>) -> bool {
        match self {
            GateTree::Leaf { .. } => false,
            GateTree::Gate { kind, children } => {
                if kind.is_overlapping() {
                    let mut inside = false;
                    let mut outside = false;
                    for (leaf, _) in self.leaves() {
                        if types.contains(leaf) {
                            inside = true;
                        } else {
                            outside = true;
                        }
                    }
                    if inside && outside {
                        return true;
                    }
                }
                children
                    .iter()
                    .any(|child| child.has_overlapping_gate_across(types))
            }
        }
    }
}

impl fmt::Display for GateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateTree::Leaf { event_type, count } => {
                if *count > 1 {
                    write!(f, "{event_type}x{count}")
                } else {
                    write!(f, "{event_type}")
                }
            }
            GateTree::Gate { kind, children } => {
                write!(f, "{kind}(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Infers the gate tree for a set of observed event sets using the default
/// solver. Returns `None` when there is nothing to infer.
///
/// # Errors
///
/// [`LogicError::AmbiguousLogic`] when no gate partition makes every
/// observed set realizable.
pub fn infer_gate_tree(sets: &FxHashSet<EventSet>) -> Result<Option<GateTree>, LogicError> {
    if sets.is_empty() {
        return Ok(None);
    }
    CoverSolver.solve(sets).map(Some)
}

/// Infers the gate tree, falling back to a conservative OR of all branches
/// when inference is infeasible. The fallback is reported as an output flag
/// rather than an error.
pub fn infer_gate_tree_with_fallback(
    sets: &FxHashSet<EventSet>,
) -> (Option<GateTree>, Option<OutputFlag>) {
    match infer_gate_tree(sets) {
        Ok(tree) => (tree, None),
        Err(err) => {
            tracing::warn!(error = %err, "gate inference infeasible, falling back to OR");
            let fallback = fallback_or_tree(sets);
            let flag = OutputFlag::new(FlagKind::AmbiguousLogic, err.to_string());
            (Some(fallback), Some(flag))
        }
    }
}

/// The conservative grouping: one OR over every branch event type, with
/// repeat counts still applied.
fn fallback_or_tree(sets: &FxHashSet<EventSet>) -> GateTree {
    let counts = event_set_counts(sets);
    let leaves: Vec<GateTree> = counts.keys().map(GateTree::leaf).collect();
    let tree = if leaves.len() == 1 {
        leaves.into_iter().next().expect("non-empty")
    } else {
        GateTree::gate(GateKind::Or, leaves)
    };
    solver::apply_repeat_counts(tree, sets)
}
