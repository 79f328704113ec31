//! Per-job event model: observed event sets and their accumulation.
//!
//! The event model is the entry point of the inference pipeline. For every
//! event type in a job it accumulates the multisets of successor event types
//! ([`EventSet`]s) and predecessor event types observed across all ingested
//! sequences. The model is an explicit per-job context object; nothing in
//! this crate accumulates global state, so independent jobs can be processed
//! concurrently without coordination.
//!
//! Accumulation is append-only: once the model has been turned into an
//! [`EventGraph`](crate::events::EventGraph) and handed to the downstream
//! stages, the recorded sets are never mutated again.
//!
//! # Examples
//!
//! Recording observations directly:
//!
//! ```
//! use causeway::events::EventModel;
//!
//! let mut model = EventModel::new();
//! model.record_outgoing("A", &["B", "C"]);
//! model.record_outgoing("A", &["D", "C"]);
//! model.record_incoming("C", &["A"]);
//! model.record_incoming("B", &["A"]);
//! model.record_incoming("D", &["A"]);
//! model.record_outgoing("B", &[]);
//! model.record_outgoing("C", &[]);
//! model.record_outgoing("D", &[]);
//!
//! let graph = model.graph().unwrap();
//! assert_eq!(graph.node_count(), 4);
//! ```
//!
//! Deriving the model from causal chains:
//!
//! ```
//! use causeway::events::{CausalEvent, EventModel};
//!
//! let chain = vec![
//!     CausalEvent::new("1", "A", &[]),
//!     CausalEvent::new("2", "B", &["1"]),
//!     CausalEvent::new("3", "C", &["2"]),
//! ];
//! let mut model = EventModel::new();
//! model.record_causal_chain(&chain, false);
//! assert!(model.event("A").is_some());
//! ```

mod graph;

pub use graph::{EventGraph, EventIx, GraphEvent, markov_graph};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::errors::ModelError;
use crate::types::DUMMY_START_EVENT;

/// One observed multiset of co-occurring successor (or predecessor) event
/// types for a single causal step.
///
/// Event sets compare and hash by content, never by identity, so identical
/// observations from different sequences collapse into one. The backing map
/// is ordered, which keeps every derived iteration deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventSet(BTreeMap<String, u32>);

impl EventSet {
    /// Builds an event set from a list of event types, counting repeats.
    pub fn new<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for event in events {
            *counts.entry(event.into()).or_insert(0) += 1;
        }
        EventSet(counts)
    }

    /// Number of distinct event types in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The observed count for an event type, zero if absent.
    #[must_use]
    pub fn count(&self, event_type: &str) -> u32 {
        self.0.get(event_type).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.0.contains_key(event_type)
    }

    /// The distinct event types, discarding multiplicities.
    #[must_use]
    pub fn support(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    /// Event types observed more than once in this set.
    #[must_use]
    pub fn repeated(&self) -> BTreeMap<String, u32> {
        self.0
            .iter()
            .filter(|&(_, &count)| count > 1)
            .map(|(event, &count)| (event.clone(), count))
            .collect()
    }

    /// Whether every `(type, count)` entry of `self` matches `other`
    /// exactly. Used by the walker's merge feasibility check.
    #[must_use]
    pub fn matches_within(&self, other: &EventSet) -> bool {
        self.0
            .iter()
            .all(|(event, &count)| other.count(event) == count)
    }

    /// Expands the multiset into a list with repeats.
    #[must_use]
    pub fn to_list(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(event, &count)| std::iter::repeat_n(event.clone(), count as usize))
            .collect()
    }

    /// Iterates `(event_type, count)` pairs in type order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(event, &count)| (event.as_str(), count))
    }
}

impl fmt::Display for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (event, count)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{event}:{count}")?;
        }
        write!(f, "}}")
    }
}

/// Reduces a collection of event sets to their distinct supports.
#[must_use]
pub fn reduced_event_sets(sets: &FxHashSet<EventSet>) -> BTreeSet<BTreeSet<String>> {
    sets.iter().map(EventSet::support).collect()
}

/// Whether `events`, taken as one observation, matches any of `sets`
/// entry-for-entry.
#[must_use]
pub fn has_event_set_as_subset(sets: &FxHashSet<EventSet>, events: &[String]) -> bool {
    let candidate = EventSet::new(events.iter().cloned());
    sets.iter().any(|set| candidate.matches_within(set))
}

/// One event type's aggregated behavior across all sequences of a job.
#[derive(Clone, Debug)]
pub struct Event {
    uid: Uuid,
    event_type: String,
    /// Multisets of successor types observed after this event.
    pub event_sets: FxHashSet<EventSet>,
    /// Multisets of predecessor types observed before this event.
    pub in_event_sets: FxHashSet<EventSet>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            event_type: event_type.into(),
            event_sets: FxHashSet::default(),
            in_event_sets: FxHashSet::default(),
        }
    }

    #[must_use]
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Records one observed multiset of successors. Empty observations are
    /// ignored so terminal events stay terminal.
    pub fn update_event_sets(&mut self, events: &[String]) {
        if events.is_empty() {
            return;
        }
        self.event_sets.insert(EventSet::new(events.iter().cloned()));
    }

    /// Records one observed multiset of predecessors.
    pub fn update_in_event_sets(&mut self, events: &[String]) {
        if events.is_empty() {
            return;
        }
        self.in_event_sets
            .insert(EventSet::new(events.iter().cloned()));
    }

    /// Distinct successor supports.
    #[must_use]
    pub fn reduced_event_sets(&self) -> BTreeSet<BTreeSet<String>> {
        reduced_event_sets(&self.event_sets)
    }

    /// Distinct predecessor supports.
    #[must_use]
    pub fn reduced_in_event_sets(&self) -> BTreeSet<BTreeSet<String>> {
        reduced_event_sets(&self.in_event_sets)
    }

    /// Per successor type, the set of counts it was observed with.
    #[must_use]
    pub fn event_set_counts(&self) -> BTreeMap<String, BTreeSet<u32>> {
        event_set_counts(&self.event_sets)
    }

    /// Drops every successor set mentioning `event_type`. Used when loop
    /// folding removes the corresponding edges.
    pub fn remove_event_type_from_event_sets(&mut self, event_type: &str) {
        self.event_sets.retain(|set| !set.contains(event_type));
    }

    /// Drops every predecessor set mentioning `event_type`.
    pub fn remove_event_type_from_in_event_sets(&mut self, event_type: &str) {
        self.in_event_sets.retain(|set| !set.contains(event_type));
    }
}

/// Per type, the set of counts it was observed with across `sets`.
#[must_use]
pub fn event_set_counts(sets: &FxHashSet<EventSet>) -> BTreeMap<String, BTreeSet<u32>> {
    let mut counts: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    for set in sets {
        for (event, count) in set.iter() {
            counts.entry(event.to_string()).or_default().insert(count);
        }
    }
    counts
}

/// One ingested event instance carrying causal links to its predecessors.
///
/// This is the boundary form handed over by the sequencing collaborator:
/// instance identity plus `previous_event_ids`. Timestamps and job metadata
/// are not consumed here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalEvent {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub previous_event_ids: Vec<String>,
}

impl CausalEvent {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>, previous: &[&str]) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            previous_event_ids: previous.iter().map(|id| (*id).to_string()).collect(),
        }
    }
}

/// Per-job accumulation context for all observed events.
///
/// The model owns one [`Event`] per event type and is the only mutable stage
/// of the pipeline. Once [`EventModel::graph`] has been called the produced
/// graph is an immutable input to the downstream stages.
#[derive(Clone, Debug, Default)]
pub struct EventModel {
    events: FxHashMap<String, Event>,
}

impl EventModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the aggregated event for a type.
    #[must_use]
    pub fn event(&self, event_type: &str) -> Option<&Event> {
        self.events.get(event_type)
    }

    /// Returns the event for a type, creating it on first sight.
    pub fn ensure_event(&mut self, event_type: &str) -> &mut Event {
        self.events
            .entry(event_type.to_string())
            .or_insert_with(|| Event::new(event_type))
    }

    /// Records one observed multiset of successors for `event_type`.
    pub fn record_outgoing(&mut self, event_type: &str, successors: &[&str]) {
        let successors: Vec<String> = successors.iter().map(|s| (*s).to_string()).collect();
        self.ensure_event(event_type).update_event_sets(&successors);
    }

    /// Records one observed multiset of predecessors for `event_type`.
    pub fn record_incoming(&mut self, event_type: &str, predecessors: &[&str]) {
        let predecessors: Vec<String> = predecessors.iter().map(|s| (*s).to_string()).collect();
        self.ensure_event(event_type)
            .update_in_event_sets(&predecessors);
    }

    /// Accumulates one causal chain (a single job run) into the model.
    ///
    /// For every instance, the outgoing event set is the multiset of types
    /// of the instances that list it as a predecessor, and the incoming set
    /// is the multiset of its predecessors' types. With `add_dummy_start`,
    /// instances without predecessors are linked from a synthetic start
    /// event so the job graph has a unique root.
    pub fn record_causal_chain(&mut self, chain: &[CausalEvent], add_dummy_start: bool) {
        let type_by_id: FxHashMap<&str, &str> = chain
            .iter()
            .map(|event| (event.event_id.as_str(), event.event_type.as_str()))
            .collect();

        let mut successors_by_id: FxHashMap<&str, Vec<String>> = FxHashMap::default();
        for event in chain {
            for previous in &event.previous_event_ids {
                successors_by_id
                    .entry(previous.as_str())
                    .or_default()
                    .push(event.event_type.clone());
            }
        }

        let mut roots: Vec<String> = Vec::new();
        for event in chain {
            let mut successors = successors_by_id
                .remove(event.event_id.as_str())
                .unwrap_or_default();
            successors.sort();
            self.ensure_event(&event.event_type)
                .update_event_sets(&successors);

            let mut predecessors: Vec<String> = event
                .previous_event_ids
                .iter()
                .filter_map(|id| type_by_id.get(id.as_str()).map(|ty| (*ty).to_string()))
                .collect();
            predecessors.sort();
            if predecessors.is_empty() {
                if add_dummy_start {
                    self.ensure_event(&event.event_type)
                        .update_in_event_sets(&[DUMMY_START_EVENT.to_string()]);
                }
                roots.push(event.event_type.clone());
            } else {
                self.ensure_event(&event.event_type)
                    .update_in_event_sets(&predecessors);
            }
        }

        if add_dummy_start && !roots.is_empty() {
            roots.sort();
            self.ensure_event(DUMMY_START_EVENT).update_event_sets(&roots);
        }
    }

    /// Iterates events in event-type order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        let mut events: Vec<&Event> = self.events.values().collect();
        events.sort_by(|a, b| a.event_type().cmp(b.event_type()));
        events.into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Builds the event graph: one node per observed event type, one edge
    /// from an event to every type appearing in any of its outgoing event
    /// sets. No edge is invented beyond what an event set evidences.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownEventType`] when an event set references a type
    /// that was never recorded as an event. The condition is fatal for the
    /// job and is not retried.
    pub fn graph(&self) -> Result<EventGraph, ModelError> {
        EventGraph::from_model(self)
    }
}
