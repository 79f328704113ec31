//! Nested node graph construction and the diagram walk.
//!
//! This stage turns the loop-folded event graph into a generic, walkable
//! node graph ([`node`]), with loop interiors embedded as nested graphs
//! ([`build`]), and then walks it depth-first into the output diagram
//! ([`walker`]), tracking open logic blocks along the way
//! ([`logic_block`]).

pub mod build;
pub(crate) mod logic_block;
pub mod node;
pub mod walker;

pub use build::build_node_graph;
pub use node::{Node, NodeClass, NodeGraph, NodeId, SubGraph};
pub use walker::walk_nested_graph;
