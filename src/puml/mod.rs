//! The emitted diagram graph and its PlantUML serialization.
//!
//! A [`PumlGraph`] is a simple directed graph over a closed sum of node
//! kinds: event nodes (optionally carrying a nested sub-diagram), operator
//! nodes in matched start/end pairs, and kill nodes. Serialization walks the
//! depth-first tree from each root, synthesizing the path separators between
//! the branches of an operator block (`fork again`, `split again`,
//! `elseif`), and tracks indentation per operator role.
//!
//! Operator gates serialize per gate kind: AND as `fork` blocks, XOR as
//! `if`/`elseif` blocks, OR as `split` blocks. Loop nodes render as a
//! `repeat`/`repeat while` block wrapping the nested diagram. Kill nodes
//! render as `kill` with no outgoing arrow, and a fixed branch count on an
//! event renders as a repetition construct wrapping that single event.

use petgraph::Direction;
use petgraph::stable_graph::StableDiGraph;
use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::errors::OutputFlag;
use crate::types::{
    DUMMY_END_EVENT, DUMMY_START_EVENT, EventFlags, OperatorRole, PumlOperator,
};

/// Index of a node in a [`PumlGraph`].
pub type PumlIx = petgraph::stable_graph::NodeIndex;

/// An event element of the diagram.
#[derive(Clone, Debug)]
pub struct PumlEventNode {
    pub name: String,
    pub occurrence: u32,
    pub flags: EventFlags,
    /// Diagram-wide numbering for events whose branch multiplicity varies.
    pub branch_number: Option<u32>,
    /// Fixed concurrent-occurrence count, rendered as a repetition block.
    pub branch_count: Option<u32>,
    pub sub_graph: Option<PumlGraph>,
    /// Identity of the walk node this element was emitted for; used to
    /// splice nested diagrams into every reference after the fact.
    pub parent_ref: Option<Uuid>,
}

/// An operator element: one end of a fork/split/if block.
#[derive(Clone, Debug)]
pub struct PumlOperatorNode {
    pub operator: PumlOperator,
    pub role: OperatorRole,
    pub occurrence: u32,
}

/// A kill/detach element. Never has outgoing edges.
#[derive(Clone, Debug)]
pub struct PumlKillNode {
    pub occurrence: u32,
}

/// Closed sum of diagram elements.
#[derive(Clone, Debug)]
pub enum PumlNode {
    Event(PumlEventNode),
    Operator(PumlOperatorNode),
    Kill(PumlKillNode),
}

impl PumlNode {
    #[must_use]
    pub fn as_event(&self) -> Option<&PumlEventNode> {
        match self {
            PumlNode::Event(event) => Some(event),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_operator(&self) -> Option<&PumlOperatorNode> {
        match self {
            PumlNode::Operator(operator) => Some(operator),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_kill(&self) -> bool {
        matches!(self, PumlNode::Kill(_))
    }

    /// Stable display label, used for counters and diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            PumlNode::Event(event) => format!("{}.{}", event.name, event.occurrence),
            PumlNode::Operator(op) => {
                format!("{}_{}.{}", op.role, op.operator, op.occurrence)
            }
            PumlNode::Kill(kill) => format!("KILL.{}", kill.occurrence),
        }
    }
}

/// Lines and indentation bookkeeping per operator role: the emitted lines,
/// the indent delta applied after the block, and how far the lines
/// themselves out-dent relative to the current level.
fn operator_lines(operator: PumlOperator, role: OperatorRole) -> (&'static str, i32, i32) {
    match (operator, role) {
        (PumlOperator::Xor, OperatorRole::Start) => ("if (XOR) then", 1, 0),
        (PumlOperator::Xor, OperatorRole::Path) => ("elseif (XOR) then", 0, 1),
        (PumlOperator::Xor, OperatorRole::End) => ("endif", -1, 1),
        (PumlOperator::And, OperatorRole::Start) => ("fork", 1, 0),
        (PumlOperator::And, OperatorRole::Path) => ("fork again", 0, 1),
        (PumlOperator::And, OperatorRole::End) => ("end fork", -1, 1),
        (PumlOperator::Or, OperatorRole::Start) => ("split", 1, 0),
        (PumlOperator::Or, OperatorRole::Path) => ("split again", 0, 1),
        (PumlOperator::Or, OperatorRole::End) => ("end split", -1, 1),
        (PumlOperator::Loop, OperatorRole::Start) => ("repeat", 1, 0),
        (PumlOperator::Loop, OperatorRole::Path) => ("", 0, 0),
        (PumlOperator::Loop, OperatorRole::End) => ("repeat while", -1, 1),
    }
}

enum OrderedItem {
    Real(PumlIx),
    PathSeparator(PumlOperator),
}

/// The output diagram graph.
#[derive(Clone, Debug, Default)]
pub struct PumlGraph {
    graph: StableDiGraph<PumlNode, ()>,
    node_counts: FxHashMap<String, u32>,
    branch_counts: u32,
    kill_counts: u32,
    parent_refs: FxHashMap<Uuid, Vec<PumlIx>>,
    flags: Vec<OutputFlag>,
}

impl PumlGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an event node, assigning its occurrence number and, for
    /// variable-branch events, the next diagram-wide branch number.
    pub fn create_event_node(
        &mut self,
        name: &str,
        flags: EventFlags,
        branch_count: Option<u32>,
        parent_ref: Option<Uuid>,
    ) -> PumlIx {
        let occurrence = self.node_counts.get(name).copied().unwrap_or(0);
        let branch_number = if flags.branch {
            let number = self.branch_counts;
            self.branch_counts += 1;
            Some(number)
        } else {
            None
        };
        let ix = self.graph.add_node(PumlNode::Event(PumlEventNode {
            name: name.to_string(),
            occurrence,
            flags,
            branch_number,
            branch_count,
            sub_graph: None,
            parent_ref,
        }));
        *self.node_counts.entry(name.to_string()).or_insert(0) += 1;
        if let Some(uid) = parent_ref {
            self.parent_refs.entry(uid).or_default().push(ix);
        }
        ix
    }

    /// Creates the matched start/end operator pair for a block.
    pub fn create_operator_pair(&mut self, operator: PumlOperator) -> (PumlIx, PumlIx) {
        let start = self.create_operator_node(operator, OperatorRole::Start);
        let end = self.create_operator_node(operator, OperatorRole::End);
        (start, end)
    }

    fn create_operator_node(&mut self, operator: PumlOperator, role: OperatorRole) -> PumlIx {
        let key = format!("{role}_{operator}");
        let occurrence = self.node_counts.get(&key).copied().unwrap_or(0);
        let ix = self.graph.add_node(PumlNode::Operator(PumlOperatorNode {
            operator,
            role,
            occurrence,
        }));
        *self.node_counts.entry(key).or_insert(0) += 1;
        ix
    }

    pub fn create_kill_node(&mut self) -> PumlIx {
        let ix = self.graph.add_node(PumlNode::Kill(PumlKillNode {
            occurrence: self.kill_counts,
        }));
        self.kill_counts += 1;
        ix
    }

    /// Adds an edge unless present; the edge set is a simple directed graph.
    pub fn add_edge(&mut self, from: PumlIx, to: PumlIx) {
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn remove_nodes(&mut self, nodes: &FxHashSet<PumlIx>) {
        for &ix in nodes {
            if self.graph.contains_node(ix) {
                self.graph.remove_node(ix);
            }
        }
    }

    #[must_use]
    pub fn node(&self, ix: PumlIx) -> &PumlNode {
        &self.graph[ix]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (PumlIx, &PumlNode)> {
        self.graph.node_indices().map(|ix| (ix, &self.graph[ix]))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn out_degree(&self, ix: PumlIx) -> usize {
        self.graph.neighbors_directed(ix, Direction::Outgoing).count()
    }

    #[must_use]
    pub fn in_degree(&self, ix: PumlIx) -> usize {
        self.graph.neighbors_directed(ix, Direction::Incoming).count()
    }

    pub fn push_flag(&mut self, flag: OutputFlag) {
        self.flags.push(flag);
    }

    /// Recovered conditions attached to this graph, including those of
    /// spliced sub-diagrams.
    #[must_use]
    pub fn flags(&self) -> &[OutputFlag] {
        &self.flags
    }

    /// Every node lying on some path between `from` and `to`, excluding
    /// `from` itself. The construction-time graph is acyclic, so this is the
    /// union of all simple paths.
    #[must_use]
    pub fn nodes_on_paths_between(&self, from: PumlIx, to: PumlIx) -> FxHashSet<PumlIx> {
        let forward = self.reachable_from(from, Direction::Outgoing);
        let backward = self.reachable_from(to, Direction::Incoming);
        forward
            .intersection(&backward)
            .copied()
            .filter(|&ix| ix != from)
            .collect()
    }

    fn reachable_from(&self, start: PumlIx, direction: Direction) -> FxHashSet<PumlIx> {
        let mut visited: FxHashSet<PumlIx> = FxHashSet::default();
        let mut stack = vec![start];
        while let Some(ix) = stack.pop() {
            if !visited.insert(ix) {
                continue;
            }
            for next in self.graph.neighbors_directed(ix, direction) {
                stack.push(next);
            }
        }
        visited
    }

    /// Splices a nested diagram into every event node emitted for `uid`.
    /// The sub-diagram's flags are carried up into this graph.
    pub fn attach_sub_graph(&mut self, uid: Uuid, sub_graph: PumlGraph) {
        let Some(refs) = self.parent_refs.get(&uid).cloned() else {
            tracing::warn!(%uid, "no diagram nodes reference this sub-graph");
            return;
        };
        self.flags.extend(sub_graph.flags.iter().cloned());
        for ix in refs {
            if let Some(PumlNode::Event(event)) = self.graph.node_weight_mut(ix) {
                event.sub_graph = Some(sub_graph.clone());
            }
        }
    }

    /// Removes synthetic start/end marker events, splicing their neighbors
    /// together, here and in every nested diagram.
    pub fn remove_dummy_nodes(&mut self) {
        let dummies: Vec<PumlIx> = self
            .graph
            .node_indices()
            .filter(|&ix| {
                self.graph[ix]
                    .as_event()
                    .map(|event| {
                        event.name == DUMMY_START_EVENT || event.name == DUMMY_END_EVENT
                    })
                    .unwrap_or(false)
            })
            .collect();
        for ix in dummies {
            let preds: Vec<PumlIx> = self
                .graph
                .neighbors_directed(ix, Direction::Incoming)
                .collect();
            let succs: Vec<PumlIx> = self
                .graph
                .neighbors_directed(ix, Direction::Outgoing)
                .collect();
            for &pred in &preds {
                for &succ in &succs {
                    self.add_edge(pred, succ);
                }
            }
            self.graph.remove_node(ix);
        }
        let indices: Vec<PumlIx> = self.graph.node_indices().collect();
        for ix in indices {
            if let Some(PumlNode::Event(event)) = self.graph.node_weight_mut(ix)
                && let Some(sub_graph) = event.sub_graph.as_mut()
            {
                sub_graph.remove_dummy_nodes();
            }
        }
    }

    /// Per operator kind, matched start and end node counts must agree.
    #[must_use]
    pub fn operator_pairs_balanced(&self) -> bool {
        let mut balance: FxHashMap<PumlOperator, i64> = FxHashMap::default();
        for (_, node) in self.nodes() {
            if let Some(op) = node.as_operator() {
                match op.role {
                    OperatorRole::Start => *balance.entry(op.operator).or_insert(0) += 1,
                    OperatorRole::End => *balance.entry(op.operator).or_insert(0) -= 1,
                    OperatorRole::Path => {}
                }
            }
        }
        balance.values().all(|&count| count == 0)
    }

    fn roots(&self) -> Vec<PumlIx> {
        let mut roots: Vec<PumlIx> = self
            .graph
            .externals(Direction::Incoming)
            .collect();
        roots.sort_by_key(|ix| ix.index());
        roots
    }

    /// Successors in edge insertion order.
    fn successors(&self, ix: PumlIx) -> Vec<PumlIx> {
        let mut successors: Vec<PumlIx> = self
            .graph
            .neighbors_directed(ix, Direction::Outgoing)
            .collect();
        successors.reverse();
        successors
    }

    /// Emission order: the depth-first tree from each root, with children of
    /// each tree node processed in reverse discovery order so the branch
    /// that carries an operator block's end node is emitted last. Path
    /// separators are synthesized between the branches of a start operator.
    fn ordered_items(&self) -> Vec<OrderedItem> {
        let mut items = Vec::new();
        let mut visited: FxHashSet<PumlIx> = FxHashSet::default();
        for root in self.roots() {
            if !visited.contains(&root) {
                let mut tree: FxHashMap<PumlIx, Vec<PumlIx>> = FxHashMap::default();
                self.dfs_tree(root, &mut visited, &mut tree);
                self.order_from_tree(root, &tree, &mut items);
            }
        }
        items
    }

    fn dfs_tree(
        &self,
        ix: PumlIx,
        visited: &mut FxHashSet<PumlIx>,
        tree: &mut FxHashMap<PumlIx, Vec<PumlIx>>,
    ) {
        visited.insert(ix);
        for succ in self.successors(ix) {
            if visited.insert(succ) {
                tree.entry(ix).or_default().push(succ);
                self.dfs_tree(succ, visited, tree);
            }
        }
    }

    fn order_from_tree(
        &self,
        ix: PumlIx,
        tree: &FxHashMap<PumlIx, Vec<PumlIx>>,
        items: &mut Vec<OrderedItem>,
    ) {
        items.push(OrderedItem::Real(ix));
        let Some(children) = tree.get(&ix) else {
            return;
        };
        let start_operator = self.graph[ix]
            .as_operator()
            .filter(|op| op.role == OperatorRole::Start && op.operator != PumlOperator::Loop)
            .map(|op| op.operator);
        for (i, &child) in children.iter().rev().enumerate() {
            if let Some(operator) = start_operator
                && i != 0
            {
                items.push(OrderedItem::PathSeparator(operator));
            }
            self.order_from_tree(child, tree, items);
        }
    }

    /// Writes the diagram body as indented PlantUML lines.
    #[must_use]
    pub fn write_uml_blocks(&self, indent: i32, tab_size: i32) -> Vec<String> {
        let mut blocks = Vec::new();
        let mut indent = indent;
        for item in self.ordered_items() {
            match item {
                OrderedItem::Real(ix) => {
                    let (lines, diff) = self.node_blocks(ix, indent, tab_size);
                    blocks.extend(lines);
                    indent += diff * tab_size;
                }
                OrderedItem::PathSeparator(operator) => {
                    let (line, _, unindent) = operator_lines(operator, OperatorRole::Path);
                    if !line.is_empty() {
                        blocks.push(indented(line, indent - unindent * tab_size));
                    }
                }
            }
        }
        blocks
    }

    fn node_blocks(&self, ix: PumlIx, indent: i32, tab_size: i32) -> (Vec<String>, i32) {
        match &self.graph[ix] {
            PumlNode::Event(event) => (event_blocks(event, indent, tab_size), 0),
            PumlNode::Operator(op) => {
                let (line, diff, unindent) = operator_lines(op.operator, op.role);
                let (effective_indent, effective_unindent) = if indent <= 0 {
                    (0, 0)
                } else {
                    (indent, unindent)
                };
                let lines = if line.is_empty() {
                    Vec::new()
                } else {
                    vec![indented(
                        line,
                        effective_indent - effective_unindent * tab_size,
                    )]
                };
                (lines, diff)
            }
            PumlNode::Kill(_) => (vec![indented("kill", indent)], 0),
        }
    }

    /// Writes the complete PlantUML document for the diagram.
    #[must_use]
    pub fn write_puml_string(&self, name: &str) -> String {
        let tab_size = 4;
        let mut lines = vec![
            "@startuml".to_string(),
            format!("{}partition \"{name}\" {{", " ".repeat(tab_size)),
            format!("{}group \"{name}\"", " ".repeat(2 * tab_size)),
        ];
        lines.extend(self.write_uml_blocks(3 * tab_size as i32, tab_size as i32));
        lines.push(format!("{}end group", " ".repeat(2 * tab_size)));
        lines.push(format!("{}}}", " ".repeat(tab_size)));
        lines.push("@enduml".to_string());
        lines.join("\n")
    }
}

fn indented(line: &str, indent: i32) -> String {
    let indent = indent.max(0) as usize;
    format!("{}{line}", " ".repeat(indent))
}

fn event_blocks(event: &PumlEventNode, indent: i32, tab_size: i32) -> Vec<String> {
    let mut blocks = Vec::new();
    if let Some(sub_graph) = &event.sub_graph {
        if event.flags.loop_node {
            blocks.push(indented("repeat", indent));
            blocks.extend(sub_graph.write_uml_blocks(indent + tab_size, tab_size));
            blocks.push(indented("repeat while", indent));
        } else {
            blocks.extend(sub_graph.write_uml_blocks(indent, tab_size));
        }
    } else if let Some(count) = event.branch_count.filter(|&count| count > 1) {
        blocks.push(indented("repeat", indent));
        blocks.push(indented(&format!(":{};", event.name), indent + tab_size));
        blocks.push(indented(&format!("repeat while (BC{count})"), indent));
    } else {
        let branch_info = match (event.flags.branch, event.branch_number) {
            (true, Some(number)) => {
                format!(",BCNT,user={},name=BC{number}", event.name)
            }
            _ => String::new(),
        };
        blocks.push(indented(
            &format!(":{}{branch_info};", event.name),
            indent,
        ));
    }
    if event.flags.break_point {
        blocks.push(indented("break", indent));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GateKind;

    fn flags() -> EventFlags {
        EventFlags::default()
    }

    #[test]
    fn occurrence_counts_increment_per_name() {
        let mut graph = PumlGraph::new();
        let first = graph.create_event_node("A", flags(), None, None);
        let second = graph.create_event_node("A", flags(), None, None);
        assert_eq!(graph.node(first).as_event().unwrap().occurrence, 0);
        assert_eq!(graph.node(second).as_event().unwrap().occurrence, 1);
    }

    #[test]
    fn linear_sequence_serializes_in_order() {
        let mut graph = PumlGraph::new();
        let a = graph.create_event_node("A", flags(), None, None);
        let b = graph.create_event_node("B", flags(), None, None);
        graph.add_edge(a, b);
        let blocks = graph.write_uml_blocks(0, 4);
        assert_eq!(blocks, vec![":A;".to_string(), ":B;".to_string()]);
    }

    #[test]
    fn fork_block_serializes_with_path_separator() {
        let mut graph = PumlGraph::new();
        let a = graph.create_event_node("A", flags(), None, None);
        let (start, end) = graph.create_operator_pair(PumlOperator::from(GateKind::And));
        let b = graph.create_event_node("B", flags(), None, None);
        let c = graph.create_event_node("C", flags(), None, None);
        let d = graph.create_event_node("D", flags(), None, None);
        graph.add_edge(a, start);
        graph.add_edge(start, b);
        graph.add_edge(b, end);
        graph.add_edge(start, c);
        graph.add_edge(c, end);
        graph.add_edge(end, d);
        let blocks = graph.write_uml_blocks(0, 4);
        assert_eq!(
            blocks,
            vec![
                ":A;".to_string(),
                "fork".to_string(),
                "    :C;".to_string(),
                "fork again".to_string(),
                "    :B;".to_string(),
                "end fork".to_string(),
                ":D;".to_string(),
            ]
        );
    }

    #[test]
    fn xor_serializes_as_if_block() {
        let mut graph = PumlGraph::new();
        let (start, end) = graph.create_operator_pair(PumlOperator::Xor);
        let b = graph.create_event_node("B", flags(), None, None);
        let c = graph.create_event_node("C", flags(), None, None);
        graph.add_edge(start, b);
        graph.add_edge(b, end);
        graph.add_edge(start, c);
        graph.add_edge(c, end);
        let blocks = graph.write_uml_blocks(0, 4);
        assert_eq!(blocks[0], "if (XOR) then");
        assert!(blocks.contains(&"elseif (XOR) then".to_string()));
        assert_eq!(blocks.last().unwrap(), "endif");
    }

    #[test]
    fn branch_count_renders_repetition_block() {
        let mut graph = PumlGraph::new();
        graph.create_event_node("B", flags(), Some(3), None);
        let blocks = graph.write_uml_blocks(0, 4);
        assert_eq!(
            blocks,
            vec![
                "repeat".to_string(),
                "    :B;".to_string(),
                "repeat while (BC3)".to_string(),
            ]
        );
    }

    #[test]
    fn kill_nodes_have_no_outgoing_edges() {
        let mut graph = PumlGraph::new();
        let a = graph.create_event_node("A", flags(), None, None);
        let kill = graph.create_kill_node();
        graph.add_edge(a, kill);
        assert_eq!(graph.out_degree(kill), 0);
        let blocks = graph.write_uml_blocks(0, 4);
        assert_eq!(blocks, vec![":A;".to_string(), "kill".to_string()]);
    }

    #[test]
    fn dummy_nodes_are_spliced_out() {
        let mut graph = PumlGraph::new();
        let dummy = graph.create_event_node(DUMMY_START_EVENT, flags(), None, None);
        let a = graph.create_event_node("A", flags(), None, None);
        graph.add_edge(dummy, a);
        graph.remove_dummy_nodes();
        assert_eq!(graph.node_count(), 1);
        let blocks = graph.write_uml_blocks(0, 4);
        assert_eq!(blocks, vec![":A;".to_string()]);
    }

    #[test]
    fn puml_document_wraps_partition_and_group() {
        let mut graph = PumlGraph::new();
        graph.create_event_node("A", flags(), None, None);
        let document = graph.write_puml_string("job");
        assert!(document.starts_with("@startuml"));
        assert!(document.contains("partition \"job\" {"));
        assert!(document.contains("group \"job\""));
        assert!(document.trim_end().ends_with("@enduml"));
    }

    #[test]
    fn balanced_operator_pairs_detected() {
        let mut graph = PumlGraph::new();
        let (_, _) = graph.create_operator_pair(PumlOperator::And);
        assert!(graph.operator_pairs_balanced());
    }
}
