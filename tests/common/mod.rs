//! Shared helpers for integration tests.

#![allow(dead_code)]

use causeway::events::{CausalEvent, EventModel};
use causeway::pipeline::JobTrace;

/// Builds one causal sequence from `(id, type, previous ids)` triples.
pub fn sequence(links: &[(&str, &str, &[&str])]) -> Vec<CausalEvent> {
    links
        .iter()
        .map(|(id, ty, previous)| CausalEvent::new(*id, *ty, previous))
        .collect()
}

/// A job trace from several sequences.
pub fn trace(name: &str, sequences: Vec<Vec<CausalEvent>>) -> JobTrace {
    JobTrace::new(name, sequences)
}

/// A model built from direct outgoing/incoming observations, without the
/// synthetic start event.
pub fn model_from_observations(
    outgoing: &[(&str, &[&str])],
    incoming: &[(&str, &[&str])],
) -> EventModel {
    let mut model = EventModel::new();
    for (event, successors) in outgoing {
        model.record_outgoing(event, successors);
    }
    for (event, predecessors) in incoming {
        model.record_incoming(event, predecessors);
    }
    model
}
