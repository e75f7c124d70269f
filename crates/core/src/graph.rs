//! Workflow graph store.
//!
//! Holds a ComfyUI API-format workflow as a mapping from node ID to
//! [`Node`], validated once at load time. The set of nodes and their
//! class types never changes after [`Graph::load`]; only input values are
//! rewritten, and only through [`crate::patch`].
//!
//! The expected document shape is an object keyed by node ID:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "inputs": { "seed": 42, "model": ["4", 0] }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single node of a loaded workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    class_type: String,
    inputs: Map<String, Value>,
    /// Any other per-node keys (e.g. `_meta`), kept so the submitted
    /// document matches the loaded one.
    extra: Map<String, Value>,
}

/// Classification of a single input value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue<'a> {
    /// Link to another node's output: `[node_id, output_slot]`.
    Reference { node_id: String, slot: u64 },
    /// Anything else: number, string, boolean, object, ...
    Literal(&'a Value),
}

/// An execution graph keyed by node ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
}

// ---------------------------------------------------------------------------
// Node / InputValue
// ---------------------------------------------------------------------------

impl Node {
    /// Declared node type (e.g. `"KSampler"`).
    pub fn class_type(&self) -> &str {
        &self.class_type
    }

    /// All inputs of this node.
    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    /// A single named input, if present.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    fn to_value(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert(
            "class_type".to_string(),
            Value::String(self.class_type.clone()),
        );
        obj.insert("inputs".to_string(), Value::Object(self.inputs.clone()));
        Value::Object(obj)
    }
}

impl<'a> InputValue<'a> {
    /// Classify a raw input value.
    ///
    /// ComfyUI encodes links as two-element arrays whose first element is
    /// the source node ID (string, occasionally an integer) and whose second
    /// is a non-negative output slot index.
    pub fn classify(value: &'a Value) -> Self {
        if let Some([node, slot]) = value.as_array().map(Vec::as_slice) {
            let node_id = match node {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => n.as_u64().map(|n| n.to_string()),
                _ => None,
            };
            if let (Some(node_id), Some(slot)) = (node_id, slot.as_u64()) {
                return Self::Reference { node_id, slot };
            }
        }
        Self::Literal(value)
    }

    /// Whether this value links to another node.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

impl Graph {
    /// Load and validate a workflow document.
    ///
    /// Fails with [`CoreError::MalformedGraph`] when the document is not a
    /// non-empty object, a node lacks a string `class_type`, `inputs` is not
    /// an object, or any input references a node ID that does not exist.
    pub fn load(document: &Value) -> Result<Self, CoreError> {
        let obj = document.as_object().ok_or_else(|| {
            CoreError::MalformedGraph("workflow document must be a JSON object".to_string())
        })?;

        if obj.is_empty() {
            return Err(CoreError::MalformedGraph(
                "workflow document must contain at least one node".to_string(),
            ));
        }

        let mut nodes = BTreeMap::new();
        for (node_id, node_value) in obj {
            let node_obj = node_value.as_object().ok_or_else(|| {
                CoreError::MalformedGraph(format!("node '{node_id}' is not an object"))
            })?;

            let class_type = node_obj
                .get("class_type")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CoreError::MalformedGraph(format!(
                        "node '{node_id}' is missing required 'class_type' field"
                    ))
                })?
                .to_string();

            let inputs = match node_obj.get("inputs") {
                None => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(CoreError::MalformedGraph(format!(
                        "node '{node_id}' has non-object 'inputs'"
                    )))
                }
            };

            let extra = node_obj
                .iter()
                .filter(|(key, _)| key.as_str() != "class_type" && key.as_str() != "inputs")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            nodes.insert(
                node_id.clone(),
                Node {
                    class_type,
                    inputs,
                    extra,
                },
            );
        }

        let graph = Self { nodes };
        graph.check_references()?;
        Ok(graph)
    }

    /// Parse a workflow from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let document: Value = serde_json::from_str(text)
            .map_err(|e| CoreError::MalformedGraph(format!("invalid workflow JSON: {e}")))?;
        Self::load(&document)
    }

    /// Read and parse a workflow file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Render the graph back into the document submitted to the server.
    pub fn to_document(&self) -> Value {
        Value::Object(
            self.nodes
                .iter()
                .map(|(id, node)| (id.clone(), node.to_value()))
                .collect(),
        )
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Node IDs in sorted order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// A single input of a single node.
    pub fn input(&self, node_id: &str, input_name: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.input(input_name)
    }

    /// The only node whose class type is `class_type`.
    ///
    /// Zero matches is [`CoreError::MissingRole`], several is
    /// [`CoreError::AmbiguousRole`]; one is never picked arbitrarily.
    pub fn find_unique_by_type(&self, class_type: &str) -> Result<String, CoreError> {
        let matches = self
            .nodes
            .iter()
            .filter(|(_, node)| node.class_type == class_type)
            .map(|(id, _)| id.clone())
            .collect();
        unique_match(format!("class_type '{class_type}'"), matches)
    }

    /// The only node of `class_type` whose input `field` equals `value`.
    ///
    /// Used when several nodes share a type and are told apart by a
    /// configured value, e.g. writers distinguished by `filename_prefix`.
    pub fn find_unique_by_type_and_field(
        &self,
        class_type: &str,
        field: &str,
        value: &Value,
    ) -> Result<String, CoreError> {
        let matches = self
            .nodes
            .iter()
            .filter(|(_, node)| node.class_type == class_type && node.input(field) == Some(value))
            .map(|(id, _)| id.clone())
            .collect();
        unique_match(format!("class_type '{class_type}' with {field} = {value}"), matches)
    }

    /// Follow a reference-shaped input to the node it points to.
    pub fn resolve_reference(&self, node_id: &str, input_name: &str) -> Result<String, CoreError> {
        let value = self.input(node_id, input_name).ok_or_else(|| {
            CoreError::MissingRole(format!("node {node_id} has no input '{input_name}'"))
        })?;

        match InputValue::classify(value) {
            InputValue::Reference { node_id: target, .. } => Ok(target),
            InputValue::Literal(_) => Err(CoreError::MissingRole(format!(
                "input '{input_name}' on node {node_id} is not a node reference"
            ))),
        }
    }

    pub(crate) fn inputs_mut(&mut self, node_id: &str) -> Option<&mut Map<String, Value>> {
        self.nodes.get_mut(node_id).map(|node| &mut node.inputs)
    }

    // ---- private helpers ----

    /// Every reference must point at a node of this graph.
    fn check_references(&self) -> Result<(), CoreError> {
        for (node_id, node) in &self.nodes {
            for (input_name, value) in &node.inputs {
                if let InputValue::Reference { node_id: target, .. } = InputValue::classify(value) {
                    if !self.nodes.contains_key(&target) {
                        return Err(CoreError::MalformedGraph(format!(
                            "input '{input_name}' on node {node_id} references missing node {target}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn unique_match(role: String, mut matches: Vec<String>) -> Result<String, CoreError> {
    match matches.len() {
        0 => Err(CoreError::MissingRole(format!("no node with {role}"))),
        1 => Ok(matches.remove(0)),
        _ => Err(CoreError::AmbiguousRole {
            role,
            node_ids: matches,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn sample_workflow_json() -> Value {
        json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 42,
                    "steps": 20,
                    "model": ["4", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["5", 0]
                }
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": "sd_xl_base_1.0.safetensors" }
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": { "width": 1024, "height": 1024, "batch_size": 1 }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a landscape", "clip": ["4", 1] },
                "_meta": { "title": "Positive" }
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "ugly", "clip": ["4", 1] }
            },
            "9": {
                "class_type": "SaveEXR",
                "inputs": { "images": ["3", 0], "filename_prefix": "Result", "frame_pad": 4 }
            }
        })
    }

    // -- load -----------------------------------------------------------------

    #[test]
    fn load_sample_workflow() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.node("3").unwrap().class_type(), "KSampler");
    }

    #[test]
    fn load_non_object_fails() {
        assert_matches!(
            Graph::load(&json!(["not", "an", "object"])),
            Err(CoreError::MalformedGraph(_))
        );
    }

    #[test]
    fn load_empty_object_fails() {
        let err = Graph::load(&json!({})).unwrap_err();
        assert!(err.to_string().contains("at least one node"));
    }

    #[test]
    fn load_node_missing_class_type_fails() {
        let err = Graph::load(&json!({ "1": { "inputs": {} } })).unwrap_err();
        assert_matches!(err, CoreError::MalformedGraph(ref msg) if msg.contains("class_type"));
    }

    #[test]
    fn load_dangling_reference_fails() {
        let doc = json!({
            "1": { "class_type": "VAEDecode", "inputs": { "samples": ["99", 0] } }
        });
        let err = Graph::load(&doc).unwrap_err();
        assert_matches!(err, CoreError::MalformedGraph(ref msg) if msg.contains("99"));
    }

    #[test]
    fn load_node_without_inputs_uses_empty_map() {
        let graph = Graph::load(&json!({ "1": { "class_type": "SaveImage" } })).unwrap();
        assert!(graph.node("1").unwrap().inputs().is_empty());
    }

    #[test]
    fn load_integer_reference_ids_resolve() {
        let doc = json!({
            "1": { "class_type": "A", "inputs": {} },
            "2": { "class_type": "B", "inputs": { "x": [1, 0] } }
        });
        let graph = Graph::load(&doc).unwrap();
        assert_eq!(graph.resolve_reference("2", "x").unwrap(), "1");
    }

    #[test]
    fn from_json_str_rejects_invalid_json() {
        assert_matches!(
            Graph::from_json_str("{ not json"),
            Err(CoreError::MalformedGraph(_))
        );
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("workflow_api.json");
        std::fs::write(&path, sample_workflow_json().to_string()).expect("write workflow");
        let graph = Graph::from_path(&path).unwrap();
        assert_eq!(graph.len(), 6);
    }

    #[test]
    fn from_path_missing_file_is_io_error() {
        assert_matches!(
            Graph::from_path("/nonexistent/workflow_api.json"),
            Err(CoreError::Io(_))
        );
    }

    #[test]
    fn to_document_preserves_loaded_content() {
        let doc = sample_workflow_json();
        let graph = Graph::load(&doc).unwrap();
        assert_eq!(graph.to_document(), doc);
    }

    // -- role lookup ------------------------------------------------------------

    #[test]
    fn find_unique_by_type_returns_single_match() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_eq!(graph.find_unique_by_type("KSampler").unwrap(), "3");
    }

    #[test]
    fn find_unique_by_type_missing() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_matches!(
            graph.find_unique_by_type("LoadEXR"),
            Err(CoreError::MissingRole(_))
        );
    }

    #[test]
    fn find_unique_by_type_ambiguous() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        let err = graph.find_unique_by_type("CLIPTextEncode").unwrap_err();
        assert_matches!(err, CoreError::AmbiguousRole { ref node_ids, .. } if node_ids == &["6", "7"]);
    }

    #[test]
    fn find_unique_by_type_and_field_disambiguates() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        let id = graph
            .find_unique_by_type_and_field("CLIPTextEncode", "text", &json!("ugly"))
            .unwrap();
        assert_eq!(id, "7");
    }

    #[test]
    fn find_unique_by_type_and_field_no_match() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_matches!(
            graph.find_unique_by_type_and_field("SaveEXR", "filename_prefix", &json!("Matte")),
            Err(CoreError::MissingRole(_))
        );
    }

    // -- resolve_reference ------------------------------------------------------

    #[test]
    fn resolve_reference_follows_link() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_eq!(graph.resolve_reference("3", "latent_image").unwrap(), "5");
    }

    #[test]
    fn resolve_reference_on_literal_fails() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_matches!(
            graph.resolve_reference("3", "seed"),
            Err(CoreError::MissingRole(_))
        );
    }

    #[test]
    fn resolve_reference_on_absent_input_fails() {
        let graph = Graph::load(&sample_workflow_json()).unwrap();
        assert_matches!(
            graph.resolve_reference("3", "vae"),
            Err(CoreError::MissingRole(_))
        );
    }

    // -- InputValue -------------------------------------------------------------

    #[test]
    fn classify_reference_and_literals() {
        assert!(InputValue::classify(&json!(["4", 1])).is_reference());
        assert!(!InputValue::classify(&json!("text")).is_reference());
        assert!(!InputValue::classify(&json!([1.5, 2.5])).is_reference());
        assert!(!InputValue::classify(&json!(["a", "b"])).is_reference());
    }
}
