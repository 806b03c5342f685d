//! Best-effort correction of node paths named by the decision provider.
//!
//! Precedence is fixed: exact match, then a unique dot-segment suffix match,
//! then the alias table, then not found. An ambiguous suffix does not win; it
//! falls through to the alias table and its candidates are reported if
//! nothing else matches.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::NodeMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum Resolution {
    Exact { path: String },
    Suffix { path: String },
    Alias { path: String },
    NotFound {
        requested: String,
        candidates: Vec<String>,
    },
}

impl Resolution {
    /// The resolved canonical path, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Resolution::Exact { path }
            | Resolution::Suffix { path }
            | Resolution::Alias { path } => Some(path),
            Resolution::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.path().is_some()
    }

    /// Human-readable explanation for a failed resolution.
    pub fn describe(&self) -> String {
        match self {
            Resolution::Exact { path } => format!("'{path}'"),
            Resolution::Suffix { path } => format!("'{path}' (suffix match)"),
            Resolution::Alias { path } => format!("'{path}' (alias)"),
            Resolution::NotFound {
                requested,
                candidates,
            } if candidates.is_empty() => format!("Node '{requested}' not found"),
            Resolution::NotFound {
                requested,
                candidates,
            } => format!(
                "Node '{requested}' is ambiguous; did you mean one of: {}",
                candidates.join(", ")
            ),
        }
    }
}

pub(crate) fn resolve_path<S: AsRef<str>>(
    requested: &str,
    known: &[S],
    nodes: &BTreeMap<String, NodeMetadata>,
    aliases: &HashMap<String, String>,
) -> Resolution {
    let requested = requested.trim();
    let universe: BTreeSet<&str> = known
        .iter()
        .map(AsRef::as_ref)
        .chain(nodes.keys().map(String::as_str))
        .collect();

    if requested.is_empty() {
        return Resolution::NotFound {
            requested: requested.to_string(),
            candidates: Vec::new(),
        };
    }

    if universe.contains(requested) {
        return Resolution::Exact {
            path: requested.to_string(),
        };
    }

    let needle = format!(".{}", requested.trim_start_matches('.'));
    let suffix_matches: Vec<&str> = universe
        .iter()
        .copied()
        .filter(|p| p.ends_with(&needle))
        .collect();
    if let [only] = suffix_matches.as_slice() {
        return Resolution::Suffix {
            path: (*only).to_string(),
        };
    }

    if let Some(target) = aliases.get(requested) {
        if universe.contains(target.as_str()) {
            return Resolution::Alias {
                path: target.clone(),
            };
        }
    }

    Resolution::NotFound {
        requested: requested.to_string(),
        candidates: suffix_matches.into_iter().map(str::to_string).collect(),
    }
}
