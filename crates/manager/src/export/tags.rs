//! Inventory tag expressions (`namespace/key=value`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::error::{ExportError, ExportResult};

/// A single parsed tag filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagExpression {
    pub namespace: String,
    pub key: String,
    pub value: String,
}

impl TagExpression {
    /// Parse one `namespace/key=value` literal.
    ///
    /// The namespace ends at the first `/`; the key ends at the first `=` after
    /// it, so values may themselves contain `/` or `=`.
    pub fn parse(raw: &str) -> ExportResult<Self> {
        let invalid = || ExportError::InvalidTag(raw.to_string());

        let (namespace, rest) = raw.split_once('/').ok_or_else(invalid)?;
        let (key, value) = rest.split_once('=').ok_or_else(invalid)?;

        if namespace.is_empty() || key.is_empty() || value.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for TagExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.namespace, self.key, self.value)
    }
}

/// Parse every raw tag, failing on the first malformed literal.
pub fn parse_tags<S: AsRef<str>>(raw: &[S]) -> ExportResult<Vec<TagExpression>> {
    raw.iter().map(|t| TagExpression::parse(t.as_ref())).collect()
}

/// How multiple tag expressions combine into one system predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCombination {
    /// A system must carry every requested tag.
    #[default]
    All,
    /// Tags sharing a namespace are alternatives; namespaces are ANDed.
    AnyWithinNamespace,
}

impl FromStr for TagCombination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(TagCombination::All),
            "any_within_namespace" => Ok(TagCombination::AnyWithinNamespace),
            other => Err(format!("unknown tag combination '{other}'")),
        }
    }
}

impl TagCombination {
    /// Group tags into clauses: each inner vec is an OR-set, clauses are ANDed.
    ///
    /// Clause order is deterministic (first appearance for `All`, namespace
    /// order for `AnyWithinNamespace`) so generated SQL is stable.
    pub fn clauses<'a>(&self, tags: &'a [TagExpression]) -> Vec<Vec<&'a TagExpression>> {
        match self {
            TagCombination::All => tags.iter().map(|t| vec![t]).collect(),
            TagCombination::AnyWithinNamespace => {
                let mut by_namespace: BTreeMap<&str, Vec<&TagExpression>> = BTreeMap::new();
                for tag in tags {
                    by_namespace.entry(&tag.namespace).or_default().push(tag);
                }
                by_namespace.into_values().collect()
            }
        }
    }
}
