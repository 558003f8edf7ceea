use crate::entity::{EntityKey, EntityKind};
use crate::error::{Error, Result};

/// Default key expression prefix for the event source.
pub const KEY_PREFIX: &str = "labels";

/// Builder for constructing event source key expressions.
///
/// Key expressions follow the pattern:
/// `<prefix>/<kind>/<namespace>/<name>`
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
    kind: EntityKind,
}

impl KeyExprBuilder {
    /// Create a new key expression builder for a kind.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            prefix: KEY_PREFIX.to_string(),
            kind,
        }
    }

    /// Create a builder with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
        }
    }

    /// Build the key expression of a single entity.
    ///
    /// # Example
    /// ```
    /// use label_exporter_common::entity::{EntityKey, EntityKind};
    /// use label_exporter_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new(EntityKind::Pod);
    /// let key = builder.build(&EntityKey::new("default", "web-0"));
    /// assert_eq!(key, "labels/pods/default/web-0");
    /// ```
    pub fn build(&self, key: &EntityKey) -> String {
        format!(
            "{}/{}/{}/{}",
            self.prefix,
            self.kind.as_str(),
            key.namespace,
            key.name
        )
    }

    /// Build a wildcard key expression for all entities of this kind.
    ///
    /// # Example
    /// ```
    /// use label_exporter_common::entity::EntityKind;
    /// use label_exporter_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new(EntityKind::Pod);
    /// assert_eq!(builder.kind_wildcard(), "labels/pods/**");
    /// ```
    pub fn kind_wildcard(&self) -> String {
        format!("{}/{}/**", self.prefix, self.kind.as_str())
    }
}

/// Build a wildcard key expression for every event under a prefix.
///
/// # Example
/// ```
/// use label_exporter_common::keyexpr::all_entities_wildcard;
///
/// assert_eq!(all_entities_wildcard("labels"), "labels/**");
/// ```
pub fn all_entities_wildcard(prefix: &str) -> String {
    format!("{}/**", prefix)
}

/// Check that a prefix can be used as the root of the event key space.
///
/// The prefix must be non-empty, must not contain wildcards and must not
/// start or end with `/`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::KeyExpr("prefix must not be empty".to_string()));
    }
    if prefix.starts_with('/') || prefix.ends_with('/') {
        return Err(Error::KeyExpr(format!(
            "prefix '{}' must not start or end with '/'",
            prefix
        )));
    }
    if prefix.contains('*') || prefix.contains('$') || prefix.contains("//") {
        return Err(Error::KeyExpr(format!(
            "prefix '{}' must be a literal key expression",
            prefix
        )));
    }
    Ok(())
}

/// Parse a key expression into its kind segment and entity identity.
///
/// The kind segment is returned as-is so that callers can tell an
/// unsupported kind apart from a malformed key. Returns `None` if the key
/// does not live under `prefix` or does not have exactly
/// `kind/namespace/name` below it.
pub fn parse_key_expr<'a>(prefix: &str, key: &'a str) -> Option<ParsedKeyExpr<'a>> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();

    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    Some(ParsedKeyExpr {
        kind: parts[0],
        namespace: parts[1],
        name: parts[2],
    })
}

/// Parsed components of an event source key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr<'a> {
    pub kind: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl ParsedKeyExpr<'_> {
    /// The supported kind named by this key, if any.
    pub fn entity_kind(&self) -> Option<EntityKind> {
        EntityKind::from_segment(self.kind)
    }

    /// The entity identity named by this key.
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.namespace, self.name)
    }
}
