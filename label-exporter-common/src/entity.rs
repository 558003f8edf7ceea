use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable identity of a tracked resource.
///
/// Ordered by namespace first, then name, so iteration over a keyed map
/// groups entities per namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub namespace: String,
    pub name: String,
}

impl EntityKey {
    /// Create a new entity key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource kinds the exporter knows how to track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Pod,
}

impl EntityKind {
    /// Get the string representation used in key expressions.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Pod => "pods",
        }
    }

    /// Resolve a key expression segment to a kind.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "pods" => Some(EntityKind::Pod),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Object metadata carried by an event source payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,

    /// Full label map of the object at publication time.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// A resource object as published by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityObject {
    /// Object kind as reported by the source (e.g. "Pod").
    #[serde(default)]
    pub kind: Option<String>,

    pub metadata: ObjectMeta,
}

impl EntityObject {
    /// Create a new object with no labels.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: None,
            metadata: ObjectMeta {
                namespace: namespace.into(),
                name: name.into(),
                labels: HashMap::new(),
            },
        }
    }

    /// Set the object kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Add a label to this object.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Add multiple labels to this object.
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.metadata.labels.extend(labels);
        self
    }

    /// The identity of this object.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.metadata.namespace, &self.metadata.name)
    }
}
