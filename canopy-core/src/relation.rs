//! Relation normalization — one canonical edge record out of the several
//! shapes the model emits
//!
//! Extraction responses mix three element shapes in the same array:
//! `[source, relation, target]` triples, `[source, relation, target, flag]`
//! quadruples, and `{source, relation, target, highlighted}` objects. The
//! normalizer matches each shape explicitly and skips anything else with a
//! warning rather than failing the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CanopyError;

/// A directed, labeled relation between two concept labels.
///
/// `highlighted` carries the per-relation flag from quadruple/object shapes.
/// It only influences a build when `mastery.seed_from_extraction` is on;
/// otherwise fresh graphs start unlit and prior progress is restored by the
/// mastery merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub source: String,
    pub relation: String,
    pub target: String,
    #[serde(default)]
    pub highlighted: bool,
}

impl RelationEdge {
    pub fn new(source: impl Into<String>, relation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
            highlighted: false,
        }
    }
}

/// Convert a repaired JSON array into canonical relation edges.
///
/// Fails with `InvalidEdgeFormat` only when a non-empty input yields zero
/// usable edges; individual malformed elements are skipped with a warning.
pub fn normalize(parsed: &Value) -> Result<Vec<RelationEdge>, CanopyError> {
    let items = parsed
        .as_array()
        .ok_or_else(|| CanopyError::InvalidEdgeFormat("expected an array of relations".to_string()))?;

    let mut edges = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match parse_element(item) {
            Some(edge) => edges.push(edge),
            None => {
                tracing::warn!(index, element = %item, "Skipping relation with unrecognized shape");
            }
        }
    }

    if edges.is_empty() && !items.is_empty() {
        return Err(CanopyError::InvalidEdgeFormat(format!(
            "none of the {} elements matched a known relation shape",
            items.len()
        )));
    }

    Ok(edges)
}

fn parse_element(item: &Value) -> Option<RelationEdge> {
    match item {
        Value::Array(parts) => match parts.as_slice() {
            [source, relation, target] => Some(RelationEdge {
                source: label(source)?,
                relation: label(relation)?,
                target: label(target)?,
                highlighted: false,
            }),
            [source, relation, target, flag] => Some(RelationEdge {
                source: label(source)?,
                relation: label(relation)?,
                target: label(target)?,
                highlighted: flag.as_bool().unwrap_or(false),
            }),
            _ => None,
        },
        Value::Object(map) => Some(RelationEdge {
            source: label(map.get("source")?)?,
            relation: label(map.get("relation")?)?,
            target: label(map.get("target")?)?,
            highlighted: map.get("highlighted").and_then(Value::as_bool).unwrap_or(false),
        }),
        _ => None,
    }
}

fn label(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

// ============================================================================
// TESTS
// ============================================================================
