//! Exporter self-metrics and registry assembly.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;

use crate::collector::LabelCollector;
use crate::index::SharedIndex;

/// Labels of the event counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub event: String,
    pub outcome: String,
}

/// Counters and gauges describing the exporter itself.
#[derive(Debug, Clone, Default)]
pub struct ExporterMetrics {
    events: Family<EventLabels, Counter>,
    entities: Gauge,
    known_labels: Gauge,
}

impl ExporterMetrics {
    /// Register all self-metrics with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "label_exporter_events",
            "Entity events processed, by event type and outcome",
            self.events.clone(),
        );
        registry.register(
            "label_exporter_entities",
            "Entities currently tracked",
            self.entities.clone(),
        );
        registry.register(
            "label_exporter_known_labels",
            "Label names currently exported as columns",
            self.known_labels.clone(),
        );
    }

    /// Count one processed event.
    pub fn record_event(&self, outcome: EventOutcome) {
        self.events.get_or_create(&outcome.labels()).inc();
    }

    /// Publish the current index size.
    pub fn set_index_size(&self, entities: usize, known_labels: usize) {
        self.entities.set(entities as i64);
        self.known_labels.set(known_labels as i64);
    }

    /// Number of events counted with `outcome`.
    pub fn event_count(&self, outcome: EventOutcome) -> u64 {
        self.events.get_or_create(&outcome.labels()).get()
    }

    /// Total events counted across all outcomes.
    pub fn total_events(&self) -> u64 {
        EventOutcome::ALL.iter().map(|o| self.event_count(*o)).sum()
    }
}

/// What processing an event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Tracked,
    NotOptedIn,
    Removed,
    Absent,
    Malformed,
    UnsupportedKind,
}

impl EventOutcome {
    pub const ALL: [EventOutcome; 6] = [
        EventOutcome::Tracked,
        EventOutcome::NotOptedIn,
        EventOutcome::Removed,
        EventOutcome::Absent,
        EventOutcome::Malformed,
        EventOutcome::UnsupportedKind,
    ];

    pub fn event(&self) -> &'static str {
        match self {
            EventOutcome::Tracked | EventOutcome::NotOptedIn => "added",
            EventOutcome::Removed | EventOutcome::Absent => "removed",
            EventOutcome::Malformed | EventOutcome::UnsupportedKind => "discarded",
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            EventOutcome::Tracked => "tracked",
            EventOutcome::NotOptedIn => "not_opted_in",
            EventOutcome::Removed => "removed",
            EventOutcome::Absent => "absent",
            EventOutcome::Malformed => "malformed",
            EventOutcome::UnsupportedKind => "unsupported_kind",
        }
    }

    fn labels(&self) -> EventLabels {
        EventLabels {
            event: self.event().to_string(),
            outcome: self.outcome().to_string(),
        }
    }
}

/// Build the registry served on the metrics endpoint.
///
/// Contains the label family backed by `index`, the exporter self-metrics
/// and a build info metric.
pub fn build_registry(index: SharedIndex, metrics: &ExporterMetrics) -> Registry {
    let mut registry = Registry::default();

    registry.register_collector(Box::new(LabelCollector::new(index)));
    metrics.register(&mut registry);

    let build_info = Info::new(vec![(
        "version".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    )]);
    registry.register(
        "label_exporter_build",
        "Label exporter build information",
        build_info,
    );

    registry
}
