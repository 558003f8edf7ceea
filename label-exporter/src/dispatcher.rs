//! Event dispatcher: applies entity lifecycle events to the label index.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use label_exporter_common::entity::{EntityKey, EntityKind};
use tracing::{debug, trace, warn};

use crate::filter::LabelFilter;
use crate::index::{AddOutcome, RemoveOutcome, SharedIndex};
use crate::metrics::{EventOutcome, ExporterMetrics};

/// A lifecycle event for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelEvent {
    /// The entity exists with this full label map.
    Added {
        kind: EntityKind,
        key: EntityKey,
        labels: HashMap<String, String>,
    },
    /// The entity is gone.
    Removed { kind: EntityKind, key: EntityKey },
}

impl LabelEvent {
    pub fn kind(&self) -> EntityKind {
        match self {
            LabelEvent::Added { kind, .. } | LabelEvent::Removed { kind, .. } => *kind,
        }
    }

    pub fn key(&self) -> &EntityKey {
        match self {
            LabelEvent::Added { key, .. } | LabelEvent::Removed { key, .. } => key,
        }
    }
}

/// Why an incoming event could not be turned into a [`LabelEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The payload or key does not describe an entity.
    Malformed,
    /// The event is about a kind of resource that is not tracked.
    UnsupportedKind,
}

/// What dispatching an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Added(AddOutcome),
    Removed(RemoveOutcome),
}

/// Routes lifecycle events to the label index.
#[derive(Debug)]
pub struct EventDispatcher {
    index: SharedIndex,
    filter: LabelFilter,
    metrics: ExporterMetrics,
}

impl EventDispatcher {
    pub fn new(index: SharedIndex, filter: LabelFilter, metrics: ExporterMetrics) -> Self {
        Self {
            index,
            filter,
            metrics,
        }
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    /// Apply one event to the index.
    pub fn dispatch(&self, event: LabelEvent) -> DispatchOutcome {
        let outcome = match event {
            LabelEvent::Added { kind, key, labels } => match kind {
                EntityKind::Pod => DispatchOutcome::Added(self.added(&key, &labels)),
            },
            LabelEvent::Removed { kind, key } => match kind {
                EntityKind::Pod => DispatchOutcome::Removed(self.removed(&key)),
            },
        };

        let (entities, known) = self.index.counts();
        self.metrics.set_index_size(entities, known);

        outcome
    }

    /// Record an event that was dropped before reaching the index.
    pub fn discard(&self, reason: DiscardReason, key: &str, detail: &dyn fmt::Display) {
        match reason {
            DiscardReason::Malformed => {
                warn!(key = %key, error = %detail, "Discarding malformed event");
                self.metrics.record_event(EventOutcome::Malformed);
            }
            DiscardReason::UnsupportedKind => {
                debug!(key = %key, reason = %detail, "Ignoring event for unsupported kind");
                self.metrics.record_event(EventOutcome::UnsupportedKind);
            }
        }
    }

    fn added(&self, key: &EntityKey, labels: &HashMap<String, String>) -> AddOutcome {
        let outcome = self.index.apply_add(key, labels, &self.filter);

        match &outcome {
            AddOutcome::NotOptedIn => {
                trace!(
                    entity = %key,
                    "Entity does not carry the opt-in label"
                );
                self.metrics.record_event(EventOutcome::NotOptedIn);
            }
            AddOutcome::Tracked { created, labels } => {
                debug!(entity = %key, created, labels, "Entity labels recorded");
                self.metrics.record_event(EventOutcome::Tracked);
            }
        }

        outcome
    }

    fn removed(&self, key: &EntityKey) -> RemoveOutcome {
        let outcome = self.index.apply_remove(key);

        match &outcome {
            RemoveOutcome::Absent => {
                trace!(entity = %key, "Removed entity was not tracked");
                self.metrics.record_event(EventOutcome::Absent);
            }
            RemoveOutcome::Removed { purged } => {
                debug!(entity = %key, purged = ?purged, "Entity removed");
                self.metrics.record_event(EventOutcome::Removed);
            }
        }

        outcome
    }
}

/// Create a shareable dispatcher handle.
pub type SharedDispatcher = Arc<EventDispatcher>;
