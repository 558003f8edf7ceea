//! The label index: known label names plus per-entity label values.
//!
//! Both tables live behind one lock and are only ever touched together, so
//! a reader can never observe the column set and the values out of sync.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use label_exporter_common::entity::EntityKey;
use parking_lot::Mutex;
use tracing::trace;

use crate::config::CleanupStrategy;
use crate::filter::LabelFilter;

/// Tracked label values of one entity, ordered by label name.
pub type EntityLabels = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct IndexState {
    /// Every label name some tracked entity carries (possibly more, see
    /// [`CleanupStrategy::EarlyExit`]).
    known: BTreeSet<String>,
    /// Tracked labels per entity.
    entities: BTreeMap<EntityKey, EntityLabels>,
}

impl IndexState {
    fn in_use(&self, label: &str) -> bool {
        self.entities.values().any(|labels| labels.contains_key(label))
    }

    fn cleanup(
        &mut self,
        captured: impl IntoIterator<Item = String>,
        strategy: CleanupStrategy,
    ) -> Vec<String> {
        let mut purged = Vec::new();

        for label in captured {
            if self.in_use(&label) {
                match strategy {
                    CleanupStrategy::Independent => continue,
                    CleanupStrategy::EarlyExit => break,
                }
            }
            self.known.remove(&label);
            purged.push(label);
        }

        purged
    }
}

/// Result of [`LabelIndex::apply_add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The entity does not carry the opt-in label; nothing changed.
    NotOptedIn,
    /// The entity is tracked.
    Tracked {
        /// The entity had no entry before this call.
        created: bool,
        /// Number of labels that passed the filter.
        labels: usize,
    },
}

/// Result of [`LabelIndex::apply_remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The key was not tracked; nothing changed.
    Absent,
    /// The entity was dropped.
    Removed {
        /// Label names dropped from the known set.
        purged: Vec<String>,
    },
}

/// One entity in a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub key: EntityKey,
    /// One value per snapshot column, `None` where the entity lacks the label.
    pub values: Vec<Option<String>>,
}

/// A point-in-time copy of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Known label names, sorted.
    pub columns: Vec<String>,
    /// Entities ordered by key.
    pub rows: Vec<SnapshotRow>,
}

/// Thread-safe label index.
#[derive(Debug, Default)]
pub struct LabelIndex {
    state: Mutex<IndexState>,
    cleanup: CleanupStrategy,
}

impl LabelIndex {
    /// Create an empty index using the given cleanup strategy.
    pub fn new(cleanup: CleanupStrategy) -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            cleanup,
        }
    }

    pub fn cleanup_strategy(&self) -> CleanupStrategy {
        self.cleanup
    }

    /// Record the labels of an entity.
    ///
    /// `labels` is the full label map of the entity as last reported. Nothing
    /// happens unless the filter accepts the entity. Otherwise the entity gets
    /// an entry (possibly empty) and every label passing the filter is set on
    /// it and added to the known set. Labels the entity carried before but no
    /// longer reports are kept until the entity is removed.
    pub fn apply_add(
        &self,
        key: &EntityKey,
        labels: &HashMap<String, String>,
        filter: &LabelFilter,
    ) -> AddOutcome {
        if !filter.is_opted_in(labels) {
            trace!(entity = %key, "Entity not opted in");
            return AddOutcome::NotOptedIn;
        }

        let mut state = self.state.lock();
        let state = &mut *state;

        let created = !state.entities.contains_key(key);
        let entry = state.entities.entry(key.clone()).or_default();

        let mut tracked = 0;
        for (name, value) in filter.tracked(labels) {
            entry.insert(name.clone(), value.clone());
            if !state.known.contains(name) {
                state.known.insert(name.clone());
            }
            tracked += 1;
        }

        AddOutcome::Tracked {
            created,
            labels: tracked,
        }
    }

    /// Drop an entity and clean up label names nobody uses anymore.
    ///
    /// The removed entity's label names are checked in lexicographic order
    /// against the remaining entities; what happens to a name still in use
    /// depends on the index's [`CleanupStrategy`]. Removing an unknown key is
    /// a no-op.
    pub fn apply_remove(&self, key: &EntityKey) -> RemoveOutcome {
        let mut state = self.state.lock();

        let Some(labels) = state.entities.remove(key) else {
            return RemoveOutcome::Absent;
        };

        let purged = state.cleanup(labels.into_keys(), self.cleanup);
        RemoveOutcome::Removed { purged }
    }

    /// Copy the index out as one consistent snapshot.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();

        let columns: Vec<String> = state.known.iter().cloned().collect();
        let rows = state
            .entities
            .iter()
            .map(|(key, labels)| SnapshotRow {
                key: key.clone(),
                values: columns.iter().map(|c| labels.get(c).cloned()).collect(),
            })
            .collect();

        Snapshot { columns, rows }
    }

    /// Both counts read under a single lock.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.entities.len(), state.known.len())
    }
}

#[cfg(test)]
impl LabelIndex {
    /// Sorted known label names.
    pub fn known_labels(&self) -> Vec<String> {
        self.state.lock().known.iter().cloned().collect()
    }

    /// Tracked labels of one entity.
    pub fn entity_labels(&self, key: &EntityKey) -> Option<EntityLabels> {
        self.state.lock().entities.get(key).cloned()
    }

    /// Check the index invariants: every label an entity carries is known,
    /// and with [`CleanupStrategy::Independent`] every known label is carried
    /// by some entity.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.lock();

        for (key, labels) in &state.entities {
            if let Some(missing) = labels.keys().find(|l| !state.known.contains(*l)) {
                return Err(format!("{} carries unknown label '{}'", key, missing));
            }
        }

        if self.cleanup == CleanupStrategy::Independent
            && let Some(orphan) = state.known.iter().find(|l| !state.in_use(l))
        {
            return Err(format!("known label '{}' is carried by no entity", orphan));
        }

        Ok(())
    }
}

/// Create a shareable index handle.
pub type SharedIndex = Arc<LabelIndex>;
