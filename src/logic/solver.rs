//! The default combinatorial gate-partition solver.
//!
//! The search works on the reduced (support-only) view of the observed
//! event sets and proceeds structurally:
//!
//! 1. event types that always co-occur collapse into forced AND groups;
//! 2. groups that never co-occur split into XOR alternatives;
//! 3. groups present in every observation factor out of an AND, unless some
//!    observation consists of them alone, in which case the remainder forms
//!    OR alternatives beside them;
//! 4. what remains is attempted as a weighted disjoint cover whose blocks
//!    become OR branches.
//!
//! A family that survives none of these decompositions has no gate tree
//! under which every observation is realizable and is reported as
//! infeasible. Branch multiplicities are applied to the finished structure
//! as leaf annotations or a wrapping BRANCH gate.

use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::LogicError;
use crate::events::{EventSet, event_set_counts, reduced_event_sets};
use crate::logic::GateTree;
use crate::types::GateKind;

/// Strategy interface for the gate-partition feasibility search.
///
/// Implementations take the accumulated event sets of one node and either
/// produce a gate tree under which every observed set is realizable, or
/// report infeasibility.
pub trait GateSolver {
    fn solve(&self, sets: &FxHashSet<EventSet>) -> Result<GateTree, LogicError>;
}

/// Default solver: co-occurrence classes, XOR components and weighted
/// covers, searched recursively.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoverSolver;

impl GateSolver for CoverSolver {
    fn solve(&self, sets: &FxHashSet<EventSet>) -> Result<GateTree, LogicError> {
        let reduced = reduced_event_sets(sets);
        let universe: BTreeSet<String> = reduced.iter().flatten().cloned().collect();
        let structure = infer_structure(&reduced, &universe)?;
        Ok(apply_repeat_counts(normalize(structure), sets))
    }
}

fn ambiguous(universe: &BTreeSet<String>) -> LogicError {
    LogicError::AmbiguousLogic {
        branches: universe.iter().cloned().collect::<Vec<_>>().join(", "),
    }
}

/// Recursive structural decomposition over support sets.
fn infer_structure(
    sets: &BTreeSet<BTreeSet<String>>,
    universe: &BTreeSet<String>,
) -> Result<GateTree, LogicError> {
    if universe.len() == 1 {
        let event_type = universe.first().expect("non-empty universe");
        return Ok(GateTree::leaf(event_type.clone()));
    }

    let classes = co_occurrence_classes(sets, universe);
    if classes.len() == 1 {
        return Ok(class_tree(&classes[0]));
    }

    let class_of: BTreeMap<&str, usize> = classes
        .iter()
        .enumerate()
        .flat_map(|(id, class)| class.iter().map(move |event| (event.as_str(), id)))
        .collect();
    let class_sets: BTreeSet<BTreeSet<usize>> = sets
        .iter()
        .map(|set| set.iter().map(|event| class_of[event.as_str()]).collect())
        .collect();

    // Never-co-occurring groups are exclusive alternatives.
    let components = connected_components(&class_sets, classes.len());
    if components.len() > 1 {
        let mut children = Vec::with_capacity(components.len());
        for component in &components {
            let component_universe: BTreeSet<String> = component
                .iter()
                .flat_map(|&id| classes[id].iter().cloned())
                .collect();
            let component_sets: BTreeSet<BTreeSet<String>> = sets
                .iter()
                .filter(|set| set.iter().all(|event| component_universe.contains(event)))
                .cloned()
                .collect();
            children.push(infer_structure(&component_sets, &component_universe)?);
        }
        return Ok(GateTree::gate(GateKind::Xor, children));
    }

    // Every observation saw the whole universe: plain concurrency.
    if class_sets.len() == 1 {
        let children = classes.iter().map(|class| class_tree(class)).collect();
        return Ok(GateTree::gate(GateKind::And, children));
    }

    // Classes present in every observation factor out.
    let mut common: BTreeSet<usize> = class_sets.first().expect("non-empty").clone();
    for set in &class_sets {
        common = common.intersection(set).copied().collect();
    }
    if !common.is_empty() {
        let common_universe: BTreeSet<String> = common
            .iter()
            .flat_map(|&id| classes[id].iter().cloned())
            .collect();
        let residual_universe: BTreeSet<String> =
            universe.difference(&common_universe).cloned().collect();
        let residual_sets: BTreeSet<BTreeSet<String>> = sets
            .iter()
            .map(|set| set.difference(&common_universe).cloned().collect())
            .collect();
        let common_trees: Vec<GateTree> =
            common.iter().map(|&id| class_tree(&classes[id])).collect();

        if residual_sets.contains(&BTreeSet::new()) {
            // The factored part was observed on its own, so the remainder is
            // optional next to it: the whole node is an inclusive choice.
            let observed_residuals: BTreeSet<BTreeSet<String>> = residual_sets
                .into_iter()
                .filter(|set| !set.is_empty())
                .collect();
            if observed_residuals.is_empty() {
                return Err(ambiguous(universe));
            }
            let residual = infer_structure(&observed_residuals, &residual_universe)?;
            let mut children = common_trees;
            match residual {
                GateTree::Gate {
                    kind: GateKind::Or,
                    children: residual_children,
                } => children.extend(residual_children),
                other => children.push(other),
            }
            return Ok(GateTree::gate(GateKind::Or, children));
        }

        let residual = infer_structure(&residual_sets, &residual_universe)?;
        let mut children = common_trees;
        match residual {
            GateTree::Gate {
                kind: GateKind::And,
                children: residual_children,
            } => children.extend(residual_children),
            other => children.push(other),
        }
        return Ok(GateTree::gate(GateKind::And, children));
    }

    // No factoring applies; look for a disjoint cover whose blocks the
    // observations combine freely.
    let blocks = weighted_cover(sets, universe).ok_or_else(|| ambiguous(universe))?;
    let mut children = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let block_sets: BTreeSet<BTreeSet<String>> = sets
            .iter()
            .map(|set| set.intersection(block).cloned().collect::<BTreeSet<_>>())
            .filter(|projected: &BTreeSet<String>| !projected.is_empty())
            .collect();
        children.push(infer_structure(&block_sets, block)?);
    }
    Ok(GateTree::gate(GateKind::Or, children))
}

/// Partitions the universe into classes of event types that appear in
/// exactly the same observations. Types forced together this way always
/// fire together and form AND groups.
fn co_occurrence_classes(
    sets: &BTreeSet<BTreeSet<String>>,
    universe: &BTreeSet<String>,
) -> Vec<Vec<String>> {
    let mut by_signature: BTreeMap<Vec<bool>, Vec<String>> = BTreeMap::new();
    for event in universe {
        let signature: Vec<bool> = sets.iter().map(|set| set.contains(event)).collect();
        by_signature.entry(signature).or_default().push(event.clone());
    }
    let mut classes: Vec<Vec<String>> = by_signature.into_values().collect();
    classes.sort_by(|a, b| a[0].cmp(&b[0]));
    classes
}

fn class_tree(class: &[String]) -> GateTree {
    if class.len() == 1 {
        GateTree::leaf(class[0].clone())
    } else {
        GateTree::gate(
            GateKind::And,
            class.iter().map(|event| GateTree::leaf(event.clone())).collect(),
        )
    }
}

/// Connected components of the class co-occurrence relation, ordered by
/// smallest member.
fn connected_components(
    class_sets: &BTreeSet<BTreeSet<usize>>,
    class_count: usize,
) -> Vec<BTreeSet<usize>> {
    let mut parent: Vec<usize> = (0..class_count).collect();

    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        if parent[x] != x {
            let root = find(parent, parent[x]);
            parent[x] = root;
        }
        parent[x]
    }

    for set in class_sets {
        let mut iter = set.iter();
        if let Some(&first) = iter.next() {
            for &other in iter {
                let a = find(&mut parent, first);
                let b = find(&mut parent, other);
                if a != b {
                    parent[a] = b;
                }
            }
        }
    }

    let mut components: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for class in 0..class_count {
        let root = find(&mut parent, class);
        components.entry(root).or_default().insert(class);
    }
    let mut out: Vec<BTreeSet<usize>> = components.into_values().collect();
    out.sort_by_key(|component| *component.first().expect("non-empty component"));
    out
}

/// Greedy weighted cover of the universe by observed proper subsets, with a
/// quadratic penalty on block size. Valid only when the chosen blocks are
/// pairwise disjoint and every observation is a union of whole blocks.
fn weighted_cover(
    sets: &BTreeSet<BTreeSet<String>>,
    universe: &BTreeSet<String>,
) -> Option<Vec<BTreeSet<String>>> {
    let candidates: Vec<&BTreeSet<String>> =
        sets.iter().filter(|set| *set != universe).collect();
    if candidates.is_empty() {
        return None;
    }

    let mut remaining = universe.clone();
    let mut blocks: Vec<BTreeSet<String>> = Vec::new();
    while !remaining.is_empty() {
        let best = candidates
            .iter()
            .max_by(|a, b| {
                let score_a = cover_score(a, &remaining);
                let score_b = cover_score(b, &remaining);
                score_a
                    .partial_cmp(&score_b)
                    .expect("finite scores")
                    // ties break toward the set that sorts first
                    .then_with(|| (*b).cmp(*a))
            })
            .copied()?;
        let before = remaining.len();
        remaining = remaining.difference(best).cloned().collect();
        if remaining.len() == before {
            return None;
        }
        blocks.push(best.clone());
    }

    for (i, a) in blocks.iter().enumerate() {
        for b in blocks.iter().skip(i + 1) {
            if a.intersection(b).next().is_some() {
                return None;
            }
        }
    }
    for set in sets {
        let mut rest = set.clone();
        for block in &blocks {
            if block.is_subset(&rest) {
                rest = rest.difference(block).cloned().collect();
            }
        }
        if !rest.is_empty() {
            return None;
        }
    }

    blocks.sort_by_key(|block| block.first().cloned());
    Some(blocks)
}

fn cover_score(set: &BTreeSet<String>, remaining: &BTreeSet<String>) -> f64 {
    let overlap = set.intersection(remaining).count() as f64;
    let size = set.len() as f64;
    overlap / (size * size)
}

/// Collapses single-child gates and splices same-kind XOR/OR nests.
fn normalize(tree: GateTree) -> GateTree {
    match tree {
        GateTree::Leaf { .. } => tree,
        GateTree::Gate { kind, children } => {
            let mut flat: Vec<GateTree> = Vec::with_capacity(children.len());
            for child in children.into_iter().map(normalize) {
                match child {
                    GateTree::Gate {
                        kind: child_kind,
                        children: grandchildren,
                    } if child_kind == kind
                        && matches!(kind, GateKind::Xor | GateKind::Or) =>
                    {
                        flat.extend(grandchildren);
                    }
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 && kind != GateKind::Branch {
                flat.into_iter().next().expect("single child")
            } else {
                GateTree::Gate { kind, children: flat }
            }
        }
    }
}

/// Applies branch multiplicities to a finished structure: a fixed repeat
/// count annotates the leaf, varying counts wrap the whole tree in a BRANCH
/// gate.
pub(crate) fn apply_repeat_counts(tree: GateTree, sets: &FxHashSet<EventSet>) -> GateTree {
    let counts = event_set_counts(sets);
    let annotated = annotate_leaf_counts(tree, &counts);
    let varying = counts.values().any(|observed| observed.len() > 1);
    if varying {
        GateTree::gate(GateKind::Branch, vec![annotated])
    } else {
        annotated
    }
}

fn annotate_leaf_counts(
    tree: GateTree,
    counts: &BTreeMap<String, BTreeSet<u32>>,
) -> GateTree {
    match tree {
        GateTree::Leaf { event_type, count } => {
            let annotated = match counts.get(&event_type) {
                Some(observed) if observed.len() == 1 => {
                    *observed.first().expect("single count")
                }
                _ => count,
            };
            GateTree::Leaf {
                event_type,
                count: annotated,
            }
        }
        GateTree::Gate { kind, children } => GateTree::Gate {
            kind,
            children: children
                .into_iter()
                .map(|child| annotate_leaf_counts(child, counts))
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supports(observations: &[&[&str]]) -> BTreeSet<BTreeSet<String>> {
        observations
            .iter()
            .map(|events| events.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn universe_of(sets: &BTreeSet<BTreeSet<String>>) -> BTreeSet<String> {
        sets.iter().flatten().cloned().collect()
    }

    #[test]
    fn classes_group_inseparable_types() {
        let sets = supports(&[&["A", "B", "C"], &["A", "B"]]);
        let classes = co_occurrence_classes(&sets, &universe_of(&sets));
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0], vec!["A".to_string(), "B".to_string()]);
        assert_eq!(classes[1], vec!["C".to_string()]);
    }

    #[test]
    fn cover_finds_disjoint_blocks() {
        let sets = supports(&[&["A"], &["B", "C"], &["A", "B", "C"]]);
        let universe = universe_of(&sets);
        let blocks = weighted_cover(&sets, &universe).unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn cover_rejects_overlapping_blocks() {
        let sets = supports(&[&["A", "B"], &["B", "C"]]);
        let universe = universe_of(&sets);
        assert!(weighted_cover(&sets, &universe).is_none());
    }

    #[test]
    fn normalize_splices_nested_xor() {
        let tree = GateTree::gate(
            GateKind::Xor,
            vec![
                GateTree::leaf("A"),
                GateTree::gate(GateKind::Xor, vec![GateTree::leaf("B"), GateTree::leaf("C")]),
            ],
        );
        let normalized = normalize(tree);
        let GateTree::Gate { children, .. } = normalized else {
            panic!("expected gate");
        };
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn normalize_collapses_single_child_gates() {
        let tree = GateTree::gate(GateKind::Or, vec![GateTree::leaf("A")]);
        assert_eq!(normalize(tree), GateTree::leaf("A"));
    }

    #[test]
    fn three_way_xor_under_and() {
        // C always; exactly one of B, D, E.
        let mut sets = FxHashSet::default();
        sets.insert(EventSet::new(["B", "C"]));
        sets.insert(EventSet::new(["D", "C"]));
        sets.insert(EventSet::new(["E", "C"]));
        let tree = CoverSolver.solve(&sets).unwrap();
        let GateTree::Gate { kind, children } = &tree else {
            panic!("expected gate");
        };
        assert_eq!(*kind, GateKind::And);
        let nested = children.iter().find(|c| !c.is_leaf()).unwrap();
        assert_eq!(nested.kind(), Some(GateKind::Xor));
        assert_eq!(nested.leaf_types().len(), 3);
    }
}
