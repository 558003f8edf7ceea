//! Label selection: which entities are tracked and which of their labels
//! are exported.

use std::collections::HashMap;

use crate::config::LabelConfig;

/// Decide whether a label name is exported.
///
/// True when `expose_all` is set or when `label` contains `prefix` anywhere
/// in it. The match is substring containment, not an anchored prefix.
pub fn should_track(label: &str, prefix: &str, expose_all: bool) -> bool {
    expose_all || label.contains(prefix)
}

/// Filter for entity labels.
#[derive(Debug, Clone)]
pub struct LabelFilter {
    prefix: String,
    expose_all: bool,
    opt_in_label: String,
}

impl LabelFilter {
    /// Create a new filter from configuration.
    pub fn new(config: &LabelConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            expose_all: config.expose_all,
            opt_in_label: config.opt_in_label.clone(),
        }
    }

    /// Check if a label name should be exported.
    pub fn should_track(&self, label: &str) -> bool {
        should_track(label, &self.prefix, self.expose_all)
    }

    /// Check if an entity carrying `labels` is tracked at all.
    ///
    /// Only the presence of the opt-in label matters, not its value.
    pub fn is_opted_in(&self, labels: &HashMap<String, String>) -> bool {
        self.expose_all || labels.contains_key(&self.opt_in_label)
    }

    /// The label names of `labels` this filter exports, with their values.
    pub fn tracked<'a>(
        &'a self,
        labels: &'a HashMap<String, String>,
    ) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
        labels.iter().filter(|(name, _)| self.should_track(name))
    }
}

impl Default for LabelFilter {
    fn default() -> Self {
        Self::new(&LabelConfig::default())
    }
}
