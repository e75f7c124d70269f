//! Parameter patching for loaded workflow graphs.
//!
//! All writes go through [`set_input`], which overwrites exactly one
//! existing input on one existing node. Batches are plain ordered lists of
//! [`FieldEdit`]s applied by [`apply_edits`]; a failing edit stops the batch
//! and earlier edits stay applied.
//!
//! Also hosts the values derived right before patching: sampler seeds,
//! joined prompt text and the output filename prefix.

use rand::Rng;
use serde_json::Value;

use crate::error::CoreError;
use crate::graph::{Graph, InputValue};

/// Smallest sampler seed (15 decimal digits).
pub const SEED_MIN: u64 = 100_000_000_000_000;

/// Largest sampler seed (16 decimal digits).
pub const SEED_MAX: u64 = 9_999_999_999_999_999;

/// Separator placed between prompt entries.
const PROMPT_SEPARATOR: &str = ", ";

/// One named field write on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEdit {
    pub node_id: String,
    pub field: String,
    pub value: Value,
}

impl FieldEdit {
    pub fn new(node_id: &str, field: &str, value: impl Into<Value>) -> Self {
        Self {
            node_id: node_id.to_string(),
            field: field.to_string(),
            value: value.into(),
        }
    }
}

/// Overwrite a single input field on a single node.
///
/// The node and the field must already exist, the current value must be a
/// literal (node links are graph structure, not parameters), and a
/// reference-shaped replacement must point to an existing node.
pub fn set_input(
    graph: &mut Graph,
    node_id: &str,
    field: &str,
    value: Value,
) -> Result<(), CoreError> {
    if let InputValue::Reference { node_id: target, .. } = InputValue::classify(&value) {
        if !graph.contains(&target) {
            return Err(CoreError::MalformedGraph(format!(
                "edit of '{field}' on node {node_id} references missing node {target}"
            )));
        }
    }

    let inputs = graph
        .inputs_mut(node_id)
        .ok_or_else(|| CoreError::UnknownNode(node_id.to_string()))?;

    let current = inputs.get_mut(field).ok_or_else(|| CoreError::UnknownField {
        node_id: node_id.to_string(),
        field: field.to_string(),
    })?;

    if InputValue::classify(current).is_reference() {
        return Err(CoreError::ReferenceOverwrite {
            node_id: node_id.to_string(),
            field: field.to_string(),
        });
    }

    *current = value;
    Ok(())
}

/// Apply edits in order, stopping at the first failure.
///
/// There is no rollback: edits before the failing one remain applied.
pub fn apply_edits(graph: &mut Graph, edits: &[FieldEdit]) -> Result<(), CoreError> {
    for edit in edits {
        set_input(graph, &edit.node_id, &edit.field, edit.value.clone())?;
    }
    Ok(())
}

/// Draw a fresh sampler seed uniformly from [`SEED_MIN`]..=[`SEED_MAX`].
pub fn generate_seed() -> u64 {
    rand::rng().random_range(SEED_MIN..=SEED_MAX)
}

/// Join prompt entries into a single conditioning string.
///
/// Entries are trimmed; empty and whitespace-only entries are dropped
/// entirely. Order is preserved.
///
/// # Examples
///
/// ```
/// use comfybox_core::patch::join_prompts;
///
/// assert_eq!(join_prompts(&["red car", "", "  sunset  "]), "red car, sunset");
/// ```
pub fn join_prompts<S: AsRef<str>>(entries: &[S]) -> String {
    entries
        .iter()
        .map(|entry| entry.as_ref().trim())
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join(PROMPT_SEPARATOR)
}

/// Output basename shared by the writer node prefix and version scanning.
///
/// Convention: `{project}_{node_name}`.
pub fn output_basename(project: &str, node_name: &str) -> String {
    format!("{project}_{node_name}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
