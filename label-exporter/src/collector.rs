//! Snapshot publisher: turns the label index into the `label_exporter`
//! metric family on every scrape.

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::gauge::ConstGauge;

use crate::index::{SharedIndex, Snapshot};
use crate::mapping::{column_names, escape_label_value};

/// Name of the exported metric family.
pub const METRIC_NAME: &str = "label_exporter";

/// Help text of the exported metric family.
pub const METRIC_HELP: &str = "Labeled pod labels";

/// Columns every sample carries before the dynamic label columns.
pub const BASE_COLUMNS: [&str; 2] = ["pod_name", "pod_namespace"];

/// Value of every sample; the labels are the payload.
pub const PLACEHOLDER_VALUE: i64 = 0;

/// Shape of the metric family for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescription {
    pub name: &'static str,
    pub help: &'static str,
    pub base_columns: Vec<String>,
    /// Exported names of the known labels, in snapshot column order.
    pub dynamic_columns: Vec<String>,
}

impl MetricDescription {
    /// Describe the metric family for `snapshot`.
    ///
    /// Must be recomputed for every snapshot since the known label set can
    /// change between scrapes.
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            name: METRIC_NAME,
            help: METRIC_HELP,
            base_columns: BASE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            dynamic_columns: column_names(&snapshot.columns, &BASE_COLUMNS),
        }
    }

    /// One label set per snapshot row, in row order.
    ///
    /// Values follow the base columns, then the dynamic columns; labels an
    /// entity does not carry are exported as empty strings.
    pub fn label_sets(&self, snapshot: &Snapshot) -> Vec<Vec<(String, String)>> {
        snapshot
            .rows
            .iter()
            .map(|row| {
                let mut labels = Vec::with_capacity(self.base_columns.len() + row.values.len());
                labels.push((
                    self.base_columns[0].clone(),
                    escape_label_value(&row.key.name),
                ));
                labels.push((
                    self.base_columns[1].clone(),
                    escape_label_value(&row.key.namespace),
                ));
                for (column, value) in self.dynamic_columns.iter().zip(&row.values) {
                    let value = value.as_deref().map(escape_label_value).unwrap_or_default();
                    labels.push((column.clone(), value));
                }
                labels
            })
            .collect()
    }
}

/// Prometheus collector over the label index.
#[derive(Debug)]
pub struct LabelCollector {
    index: SharedIndex,
}

impl LabelCollector {
    pub fn new(index: SharedIndex) -> Self {
        Self { index }
    }
}

impl Collector for LabelCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        let snapshot = self.index.snapshot();
        let description = MetricDescription::for_snapshot(&snapshot);
        let gauge = ConstGauge::new(PLACEHOLDER_VALUE);

        let mut metric_encoder = encoder.encode_descriptor(
            description.name,
            description.help,
            None,
            gauge.metric_type(),
        )?;

        for labels in description.label_sets(&snapshot) {
            let sample_encoder = metric_encoder.encode_family(&labels)?;
            gauge.encode(sample_encoder)?;
        }

        Ok(())
    }
}
