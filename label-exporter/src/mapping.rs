//! Mapping from entity label names and values to Prometheus label syntax.

use std::collections::HashSet;

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
/// Kubernetes-style names such as `app.kubernetes.io/name` become
/// `app_kubernetes_io_name`.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') && result.len() > 1 {
        result.pop();
    }

    if result.is_empty() || result == "_" {
        return "label".to_string();
    }

    // Reserved prefix
    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Turn label names into exported column names.
///
/// Names that are already valid and not in `reserved` are exported as is,
/// whatever other labels are known. Every other name is sanitized and gets
/// the first free `_<n>` suffix when it collides, in input order. Only those
/// rewritten names can change between scrapes as the known set changes.
/// The output has the same length and order as `labels` and contains no
/// duplicates, provided `labels` has none.
pub fn column_names(labels: &[String], reserved: &[&str]) -> Vec<String> {
    let mut taken: HashSet<String> = reserved.iter().map(|r| r.to_string()).collect();
    let mut columns: Vec<Option<String>> = labels
        .iter()
        .map(|label| {
            let verbatim =
                sanitize_label_name(label) == *label && !reserved.contains(&label.as_str());
            verbatim.then(|| label.clone())
        })
        .collect();
    taken.extend(columns.iter().flatten().cloned());

    for (label, column) in labels.iter().zip(columns.iter_mut()) {
        if column.is_some() {
            continue;
        }
        let base = sanitize_label_name(label);
        let mut candidate = base.clone();
        let mut n = 1;
        while taken.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        taken.insert(candidate.clone());
        *column = Some(candidate);
    }

    columns.into_iter().flatten().collect()
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}
