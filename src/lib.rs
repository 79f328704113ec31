//! # Causeway: Causal Traces to Activity Diagrams
//!
//! Causeway reconstructs a structured control-flow diagram (logical
//! AND/XOR/OR branching, loops, branch counts) from unordered observations
//! of causal event sequences, and serializes it as a PlantUML activity
//! diagram. It is, in effect, a decompiler for traces: "what followed what"
//! goes in, a program-shaped graph comes out.
//!
//! ## Pipeline
//!
//! Data flows strictly through six stages; every stage's output is an
//! immutable input to the next:
//!
//! 1. **Event model** ([`events`]): per event type, the multisets of
//!    successor and predecessor types observed across all sequences.
//! 2. **Event graph** ([`events::EventGraph`]): event types connected
//!    wherever an observed event set evidences reachability.
//! 3. **Logic gate inference** ([`logic`]): per node, the minimal AND/OR/XOR
//!    nesting under which every observed event set is realizable.
//! 4. **Loop detection** ([`loops`]): strongly connected components become
//!    opaque loop nodes with self-contained interior graphs, recursively.
//! 5. **Node graph** ([`walk`]): a generic walkable graph with logic
//!    annotations and nested sub-graphs.
//! 6. **Diagram walk** ([`walk::walk_nested_graph`]): depth-first emission
//!    of the output diagram ([`puml::PumlGraph`]) with matched fork/merge
//!    operators and kill paths.
//!
//! ## Quick Start
//!
//! ```
//! use causeway::events::CausalEvent;
//! use causeway::pipeline::{JobTrace, build_diagram_string};
//!
//! // two observed runs: A is followed by B and C concurrently, both rejoin at D
//! let run = vec![
//!     CausalEvent::new("1", "A", &[]),
//!     CausalEvent::new("2", "B", &["1"]),
//!     CausalEvent::new("3", "C", &["1"]),
//!     CausalEvent::new("4", "D", &["2", "3"]),
//! ];
//! let trace = JobTrace::new("example", vec![run.clone(), run]);
//!
//! let diagram = build_diagram_string(&trace).unwrap();
//! assert!(diagram.contains("fork"));
//! assert!(diagram.contains("end fork"));
//! ```
//!
//! ## Error Handling
//!
//! Fatal conditions (malformed input, detached cycles) abort the single job
//! that triggered them and surface as [`errors::PipelineError`]. Recoverable
//! conditions (infeasible gate partitions, forced kills, bunched-operator
//! ambiguity) degrade conservatively and are recorded as
//! [`errors::OutputFlag`]s on the produced graph for downstream reviewers.
//!
//! ## Concurrency
//!
//! Every stage is single-threaded and synchronous. Distinct jobs are fully
//! independent; [`pipeline::build_diagrams`] fans them out over blocking
//! workers.

pub mod errors;
pub mod events;
pub mod logic;
pub mod loops;
pub mod pipeline;
pub mod puml;
pub mod telemetry;
pub mod types;
pub mod walk;
