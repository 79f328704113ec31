//! Per-job orchestration of the inference stages, and concurrent fan-out
//! over independent jobs.
//!
//! A job flows strictly through model → event graph → loop folding → node
//! graph → walk → diagram; each stage consumes the previous stage's full
//! output before starting. Jobs are independent of each other, so the
//! concurrent runner simply fans each one out to a blocking worker: there
//! is no shared mutable state between jobs.
//!
//! # Examples
//!
//! ```
//! use causeway::events::CausalEvent;
//! use causeway::pipeline::{JobTrace, build_diagram};
//!
//! let job = JobTrace::new(
//!     "checkout",
//!     vec![vec![
//!         CausalEvent::new("1", "A", &[]),
//!         CausalEvent::new("2", "B", &["1"]),
//!     ]],
//! );
//! let diagram = build_diagram(&job).unwrap();
//! let text = diagram.write_puml_string("checkout");
//! assert!(text.contains(":A;"));
//! assert!(text.contains(":B;"));
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::events::{CausalEvent, EventModel};
use crate::loops::detect_loops;
use crate::puml::PumlGraph;
use crate::walk::{build_node_graph, walk_nested_graph};

/// One job's worth of ingested causal sequences.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobTrace {
    pub job_name: String,
    pub sequences: Vec<Vec<CausalEvent>>,
}

impl JobTrace {
    pub fn new(job_name: impl Into<String>, sequences: Vec<Vec<CausalEvent>>) -> Self {
        Self {
            job_name: job_name.into(),
            sequences,
        }
    }
}

/// Builds the per-job event model from the trace's sequences, inserting the
/// synthetic start event so every job graph has a unique root.
#[must_use]
pub fn build_event_model(trace: &JobTrace) -> EventModel {
    let mut model = EventModel::new();
    for sequence in &trace.sequences {
        model.record_causal_chain(sequence, true);
    }
    model
}

/// Runs the full inference pipeline for one job trace.
///
/// # Errors
///
/// Any fatal stage error ([`PipelineError`]); recoverable conditions are
/// attached to the returned graph as output flags instead.
pub fn build_diagram(trace: &JobTrace) -> Result<PumlGraph, PipelineError> {
    let span = tracing::debug_span!("build_diagram", job = %trace.job_name);
    let _guard = span.enter();
    let model = build_event_model(trace);
    build_diagram_from_model(&model)
}

/// Runs the pipeline stages for an already-accumulated event model.
pub fn build_diagram_from_model(model: &EventModel) -> Result<PumlGraph, PipelineError> {
    let graph = model.graph()?;
    let folded = detect_loops(graph)?;
    let (mut node_graph, flags) = build_node_graph(&folded);
    let mut diagram = walk_nested_graph(&mut node_graph)?;
    for flag in flags {
        diagram.push_flag(flag);
    }
    diagram.remove_dummy_nodes();
    tracing::debug!(
        nodes = diagram.node_count(),
        flags = diagram.flags().len(),
        "built diagram graph"
    );
    Ok(diagram)
}

/// Convenience wrapper producing the serialized PlantUML document.
pub fn build_diagram_string(trace: &JobTrace) -> Result<String, PipelineError> {
    let diagram = build_diagram(trace)?;
    Ok(diagram.write_puml_string(&trace.job_name))
}

/// Builds diagrams for independent jobs concurrently.
///
/// Each job runs on a blocking worker; a fatal error in one job does not
/// affect the others. Results come back in the input order.
pub async fn build_diagrams(
    jobs: Vec<JobTrace>,
) -> Vec<(String, Result<PumlGraph, PipelineError>)> {
    let mut join_set = tokio::task::JoinSet::new();
    for (position, trace) in jobs.into_iter().enumerate() {
        join_set.spawn_blocking(move || {
            let name = trace.job_name.clone();
            let result = build_diagram(&trace);
            (position, name, result)
        });
    }
    let mut results: Vec<Option<(String, Result<PumlGraph, PipelineError>)>> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((position, name, result)) => {
                if results.len() <= position {
                    results.resize_with(position + 1, || None);
                }
                results[position] = Some((name, result));
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "diagram worker panicked");
            }
        }
    }
    results.into_iter().flatten().collect()
}
