//! Depth-first diagram walk over the node graph.
//!
//! The walk keeps a stack of open logic blocks. At each step it either
//! follows plain sequencing, opens a block for an inferred gate and dives
//! into one branch, closes a block when every branch has agreed on a merge
//! point, or rotates to another branch when the current one cannot make
//! progress. Branches with no continuation detach through kill nodes, which
//! never block closing a block. Loop nodes are walked recursively through
//! their interior graphs; the nested diagrams are spliced in afterwards.
//!
//! The walk is iterative, not recursive, so branch depth never consumes
//! call stack. A step budget guards the merge-candidate rotation: when a
//! block demonstrably cannot find a merge point, the current branch is
//! forced to detach and the condition is flagged on the output instead of
//! aborting the job.

use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

use crate::errors::{FlagKind, OutputFlag, WalkError};
use crate::puml::{PumlGraph, PumlIx};
use crate::types::{GateKind, PumlOperator};
use crate::walk::logic_block::LogicBlockHolder;
use crate::walk::node::{NodeGraph, NodeId};

/// Walks a (possibly loop-nested) node graph into a diagram graph,
/// recursing into every loop node's interior and splicing the nested
/// diagrams into the events that reference them.
pub fn walk_nested_graph(graph: &mut NodeGraph) -> Result<PumlGraph, WalkError> {
    let sub_ids: Vec<NodeId> = graph
        .ids()
        .filter(|&id| graph.node(id).sub_graph.is_some())
        .collect();
    let mut nested: Vec<(uuid::Uuid, PumlGraph)> = Vec::new();
    for id in sub_ids {
        let mut sub = graph
            .node_mut(id)
            .sub_graph
            .take()
            .expect("filtered on sub-graph presence");
        let sub_puml = walk_nested_graph(&mut sub.graph)?;
        let uid = graph.node(id).uid;
        graph.node_mut(id).sub_graph = Some(sub);
        nested.push((uid, sub_puml));
    }
    let mut puml = create_puml_graph(graph)?;
    for (uid, sub_puml) in nested {
        puml.attach_sub_graph(uid, sub_puml);
    }
    Ok(puml)
}

fn walk_budget(node_count: usize) -> usize {
    512 + 64 * node_count * node_count
}

/// The iterative walk over one (flat) node graph.
pub(crate) fn create_puml_graph(graph: &mut NodeGraph) -> Result<PumlGraph, WalkError> {
    let head = graph.root().ok_or(WalkError::MissingRoot)?;
    let mut puml = PumlGraph::new();
    let head_node = graph.node(head);
    let head_name = head_node
        .event_type()
        .expect("walk root is an event node")
        .to_string();
    let mut prev_puml = puml.create_event_node(
        &head_name,
        head_node.flags,
        head_node.branch_count,
        Some(head_node.uid),
    );
    let mut prev_node = head;
    let mut blocks: Vec<LogicBlockHolder> = Vec::new();
    let budget = walk_budget(graph.len());
    let mut steps = 0usize;

    loop {
        steps += 1;
        if steps > budget {
            if blocks.is_empty() {
                break;
            }
            // the block provably cannot merge: detach the current branch
            // rather than abort the job
            let operator = blocks
                .last()
                .map(|block| block.kind.to_string())
                .unwrap_or_default();
            let position = graph
                .node(prev_node)
                .event_type()
                .unwrap_or("operator")
                .to_string();
            tracing::warn!(%operator, %position, "forcing kill for unmergeable branch");
            puml.push_flag(OutputFlag::new(
                FlagKind::ForcedKill,
                format!("no valid merge point for open {operator} block at `{position}`; branch detached"),
            ));
            let kill = puml.create_kill_node();
            puml.add_edge(prev_puml, kill);
            (prev_puml, prev_node) = handle_merge_point(graph, &mut puml, &mut blocks, kill, prev_node);
            steps = 0;
            continue;
        }

        let current = graph.node(prev_node);
        let plain_event = current.outgoing_logic.is_empty() && current.is_event();
        let next = current.outgoing.first().copied();
        let is_break = current.flags.break_point;

        if plain_event {
            if blocks.is_empty() && next.is_none() {
                break;
            }
            if !blocks.is_empty() {
                match next {
                    None => {
                        // a finished branch inside an open block detaches;
                        // break points carry their own marker instead of a
                        // kill node
                        let kill_ix = if is_break {
                            prev_puml
                        } else {
                            let kill = puml.create_kill_node();
                            puml.add_edge(prev_puml, kill);
                            kill
                        };
                        (prev_puml, prev_node) =
                            handle_merge_point(graph, &mut puml, &mut blocks, kill_ix, prev_node);
                        continue;
                    }
                    Some(next_node) => {
                        let top = blocks.last().expect("checked non-empty");
                        if check_is_merge_node_for_block(graph, next_node, top) {
                            (prev_puml, prev_node) = handle_potential_merge(
                                graph, &mut puml, &mut blocks, prev_puml, prev_node, next_node,
                            );
                            continue;
                        }
                    }
                }
            }
            let Some(next_node) = next else {
                break;
            };
            (prev_puml, prev_node) = emit_event(graph, &mut puml, next_node, prev_puml);
        } else {
            if let Some(top) = blocks.last()
                && top.is_on_lonely_merge_path()
                && let Some(&target) = graph.node(prev_node).outgoing_logic.first()
            {
                (prev_puml, prev_node) = handle_potential_merge(
                    graph, &mut puml, &mut blocks, prev_puml, prev_node, target,
                );
                continue;
            }
            (prev_puml, prev_node) =
                open_logic_block(graph, &mut puml, &mut blocks, prev_puml, prev_node);
        }
    }
    Ok(puml)
}

fn emit_event(
    graph: &NodeGraph,
    puml: &mut PumlGraph,
    node_id: NodeId,
    prev_puml: PumlIx,
) -> (PumlIx, NodeId) {
    let node = graph.node(node_id);
    let name = node
        .event_type()
        .expect("only event nodes are emitted")
        .to_string();
    let ix = puml.create_event_node(&name, node.flags, node.branch_count, Some(node.uid));
    puml.add_edge(prev_puml, ix);
    (ix, node_id)
}

/// Opens a new logic block for the gate at (or owned by) `prev_node`,
/// emitting the matched start/end operator pair and diving into the first
/// branch. Same-kind gates opening directly at an enclosing block's merge
/// candidate are flagged as bunched ambiguity; the nested gates are
/// preserved as the conservative reading.
fn open_logic_block(
    graph: &NodeGraph,
    puml: &mut PumlGraph,
    blocks: &mut Vec<LogicBlockHolder>,
    prev_puml: PumlIx,
    prev_node: NodeId,
) -> (PumlIx, NodeId) {
    let logic_node = if graph.node(prev_node).is_operator() {
        prev_node
    } else {
        graph.node(prev_node).outgoing_logic[0]
    };
    let kind = graph
        .node(logic_node)
        .operator_kind()
        .unwrap_or(GateKind::Or);
    if let Some(top) = blocks.last()
        && top.kind == kind
        && top.merge_nodes.contains(&Some(prev_node))
    {
        puml.push_flag(OutputFlag::new(
            FlagKind::BunchedAmbiguity,
            format!(
                "{kind} gate opens directly at the merge point of an enclosing {kind} block; nested gates preserved"
            ),
        ));
    }
    let (start, end) = puml.create_operator_pair(PumlOperator::from(kind));
    blocks.push(LogicBlockHolder::new(start, end, logic_node, graph));
    puml.add_edge(prev_puml, start);
    next_block_path(graph, puml, blocks, prev_node)
}

/// Picks up the current branch of the top block: pops the block when no
/// branch remains, re-enters at the block start for operator branches, and
/// emits the first event of event branches.
fn next_block_path(
    graph: &NodeGraph,
    puml: &mut PumlGraph,
    blocks: &mut Vec<LogicBlockHolder>,
    prev_node: NodeId,
) -> (PumlIx, NodeId) {
    let next = blocks.last().and_then(LogicBlockHolder::current_path);
    match next {
        None => {
            let end = blocks.pop().expect("next path requires an open block").end_ix;
            (end, prev_node)
        }
        Some(next_node) => {
            let start = blocks.last().expect("checked above").start_ix;
            if graph.node(next_node).is_operator() {
                (start, next_node)
            } else {
                emit_event(graph, puml, next_node, start)
            }
        }
    }
}

/// Connects a finished branch into the block's end operator and moves on to
/// the next branch, closing the block when it was the last one.
fn handle_merge_point(
    graph: &NodeGraph,
    puml: &mut PumlGraph,
    blocks: &mut Vec<LogicBlockHolder>,
    prev_puml: PumlIx,
    prev_node: NodeId,
) -> (PumlIx, NodeId) {
    let top = blocks.last_mut().expect("merge point requires an open block");
    // kill nodes detach for good; they close their branch without ever
    // gaining an outgoing edge
    if !puml.node(prev_puml).is_kill() {
        puml.add_edge(prev_puml, top.end_ix);
    }
    match top.pop_path() {
        None => {
            let end = blocks.pop().expect("checked above").end_ix;
            (end, prev_node)
        }
        Some(next_node) => {
            let at_start = {
                let top = blocks.last().expect("checked above");
                top.current_puml() == top.start_ix
            };
            if at_start {
                let (puml_ix, node_id) = next_block_path(graph, puml, blocks, prev_node);
                if let Some(top) = blocks.last_mut() {
                    top.set_current_puml(puml_ix);
                }
                (puml_ix, node_id)
            } else {
                (
                    blocks.last().expect("checked above").current_puml(),
                    next_node,
                )
            }
        }
    }
}

/// A branch reached a node that could merge the open block. Either the
/// whole block agrees and closes, or the walker untangles competing merge
/// candidates: impossible AND/OR merges advance through the candidate,
/// partial agreements consolidate into a nested sub-block, and anything
/// else rotates to the next branch.
fn handle_potential_merge(
    graph: &mut NodeGraph,
    puml: &mut PumlGraph,
    blocks: &mut Vec<LogicBlockHolder>,
    prev_puml: PumlIx,
    prev_node: NodeId,
    next_node: NodeId,
) -> (PumlIx, NodeId) {
    let merged = blocks
        .last_mut()
        .expect("potential merge requires an open block")
        .handle_path_merge(graph, next_node);
    if merged {
        return handle_merge_point(graph, puml, blocks, prev_puml, prev_node);
    }

    let stuck = {
        let top = blocks.last().expect("checked above");
        top.merge_counter > top.merge_nodes.len()
    };
    if !stuck {
        return rotate_path(graph, puml, blocks, prev_puml, prev_node);
    }

    blocks.last_mut().expect("checked above").merge_counter = 0;
    let impossible_current = blocks
        .last()
        .expect("checked above")
        .impossible_and_or_merges
        .last()
        .copied()
        .unwrap_or(false);
    if impossible_current {
        // the candidate cannot merge these branches: walk each stuck branch
        // through it individually
        let indices: Vec<usize> = {
            let top = blocks.last().expect("checked above");
            (0..top.paths.len())
                .filter(|&i| top.merge_nodes[i] == Some(next_node))
                .collect()
        };
        {
            let top = blocks.last_mut().expect("checked above");
            for &i in &indices {
                top.impossible_and_or_merges[i] = false;
            }
        }
        for &i in &indices {
            let from = blocks.last().expect("checked above").puml_nodes[i];
            let (new_puml, _) = emit_event(graph, puml, next_node, from);
            let top = blocks.last_mut().expect("checked above");
            top.puml_nodes[i] = new_puml;
            top.paths[i] = next_node;
        }
        let top = blocks.last().expect("checked above");
        return (
            top.current_puml(),
            top.current_path().expect("branches remain after advance"),
        );
    }
    if blocks
        .last()
        .expect("checked above")
        .impossible_and_or_merges
        .iter()
        .any(|&impossible| impossible)
    {
        return rotate_path(graph, puml, blocks, prev_puml, prev_node);
    }

    // branches disagree on where to merge: consolidate every group of at
    // least two branches sharing a candidate into a nested sub-block
    let candidate_counts: Vec<(NodeId, usize)> = {
        let top = blocks.last().expect("checked above");
        let mut counts: BTreeMap<NodeId, usize> = BTreeMap::new();
        for candidate in top.merge_nodes.iter().flatten() {
            *counts.entry(*candidate).or_insert(0) += 1;
        }
        let mut ordered: Vec<(NodeId, usize)> = counts.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ordered
    };
    let mut nodes_to_remove: FxHashSet<PumlIx> = FxHashSet::default();
    for (merge_node, count) in candidate_counts {
        if count < 2 {
            break;
        }
        let removed = blocks
            .last_mut()
            .expect("checked above")
            .create_logic_merge(graph, puml, merge_node);
        nodes_to_remove.extend(removed);
    }
    puml.remove_nodes(&nodes_to_remove);
    let logic_node = blocks.last().expect("checked above").logic_node;
    next_block_path(graph, puml, blocks, logic_node)
}

/// Rotates to the next branch; when the new branch has not started yet,
/// kicks it off from the block's start operator.
fn rotate_path(
    graph: &NodeGraph,
    puml: &mut PumlGraph,
    blocks: &mut Vec<LogicBlockHolder>,
    prev_puml: PumlIx,
    prev_node: NodeId,
) -> (PumlIx, NodeId) {
    let (puml_ix, node_id) = blocks
        .last_mut()
        .expect("rotation requires an open block")
        .rotate(prev_node, prev_puml);
    if puml_ix == blocks.last().expect("checked above").start_ix {
        let (started_puml, started_node) = next_block_path(graph, puml, blocks, node_id);
        if let Some(top) = blocks.last_mut() {
            top.set_current_puml(started_puml);
        }
        return (started_puml, started_node);
    }
    (puml_ix, node_id)
}

/// Whether `node` can be the merge point of the top block from the current
/// branch: some other unfinished branch must reach it through a path whose
/// last step is plain sequencing.
fn check_is_merge_node_for_block(
    graph: &NodeGraph,
    node: NodeId,
    top: &LogicBlockHolder,
) -> bool {
    if let Some(lonely_index) = top.lonely_merge_index {
        if lonely_index == top.paths.len() - 1 {
            return top.lonely_merge != Some(node);
        }
        return false;
    }
    if top.will_merge && !top.current_is_loop_kill() {
        return true;
    }
    let mut paths_to_check = if top.current_is_loop_kill() {
        top.paths_loop_kill()
    } else {
        top.paths_non_loop_kill()
    };
    // the current branch is the last of its peer group
    paths_to_check.pop();
    check_has_valid_merge(graph, node, &paths_to_check)
}

fn check_has_valid_merge(graph: &NodeGraph, node: NodeId, paths_to_check: &[NodeId]) -> bool {
    for &path in paths_to_check {
        for path_node in graph.logic_leaves(path) {
            if path_node == node {
                continue;
            }
            if !graph.has_path(path_node, node) {
                continue;
            }
            for &in_node in &graph.node(node).incoming {
                if graph.has_path(path_node, in_node)
                    && graph.node(in_node).outgoing_logic.is_empty()
                {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventModel;
    use crate::loops::detect_loops;
    use crate::walk::build::build_node_graph;

    fn walk(model: &EventModel) -> PumlGraph {
        let folded = detect_loops(model.graph().unwrap()).unwrap();
        let (mut graph, _) = build_node_graph(&folded);
        walk_nested_graph(&mut graph).unwrap()
    }

    #[test]
    fn and_branches_rejoin_through_matched_operators() {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B", "C"]);
        model.record_outgoing("B", &["D"]);
        model.record_outgoing("C", &["D"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("C", &["A"]);
        model.record_incoming("D", &["B", "C"]);
        model.ensure_event("D");
        let puml = walk(&model);
        assert!(puml.operator_pairs_balanced());
        let blocks = puml.write_uml_blocks(0, 4);
        assert_eq!(blocks.first().unwrap(), ":A;");
        assert!(blocks.contains(&"fork".to_string()));
        assert!(blocks.contains(&"fork again".to_string()));
        assert!(blocks.contains(&"end fork".to_string()));
        assert_eq!(blocks.last().unwrap(), ":D;");
    }

    #[test]
    fn xor_branches_use_if_blocks() {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B"]);
        model.record_outgoing("A", &["C"]);
        model.record_outgoing("B", &["D"]);
        model.record_outgoing("C", &["D"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("C", &["A"]);
        model.record_incoming("D", &["B"]);
        model.record_incoming("D", &["C"]);
        model.ensure_event("D");
        let puml = walk(&model);
        let blocks = puml.write_uml_blocks(0, 4);
        assert!(blocks.contains(&"if (XOR) then".to_string()));
        assert_eq!(blocks.last().unwrap(), ":D;");
        assert!(puml.operator_pairs_balanced());
    }

    #[test]
    fn branches_without_continuation_detach_through_kills() {
        // neither branch rejoins: B dies immediately, C dies after D
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B", "C"]);
        model.record_outgoing("C", &["D"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("C", &["A"]);
        model.record_incoming("D", &["C"]);
        model.ensure_event("B");
        model.ensure_event("D");
        let puml = walk(&model);
        let kills: Vec<PumlIx> = puml
            .nodes()
            .filter(|(_, node)| node.is_kill())
            .map(|(ix, _)| ix)
            .collect();
        assert_eq!(kills.len(), 2);
        for kill in kills {
            assert_eq!(puml.out_degree(kill), 0);
        }
        assert!(puml.operator_pairs_balanced());
    }

    #[test]
    fn loop_interior_renders_nested_diagram() {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B"]);
        model.record_outgoing("B", &["B"]);
        model.record_outgoing("B", &["C"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("B", &["B"]);
        model.record_incoming("C", &["B"]);
        model.ensure_event("C");
        let puml = walk(&model);
        let blocks = puml.write_uml_blocks(0, 4);
        assert_eq!(
            blocks,
            vec![
                ":A;".to_string(),
                "repeat".to_string(),
                "    :B;".to_string(),
                "repeat while".to_string(),
                ":C;".to_string(),
            ]
        );
    }

    #[test]
    fn walker_visits_every_event_exactly_once_in_sequence() {
        let mut model = EventModel::new();
        model.record_outgoing("A", &["B"]);
        model.record_outgoing("B", &["C"]);
        model.record_incoming("B", &["A"]);
        model.record_incoming("C", &["B"]);
        model.ensure_event("C");
        let puml = walk(&model);
        assert_eq!(puml.node_count(), 3);
        assert_eq!(puml.edge_count(), 2);
    }
}
