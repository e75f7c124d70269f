//! Domain errors shared by every `comfybox-core` module.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Structural problem in a loaded workflow document.
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    /// No node satisfies a required role.
    #[error("Missing role: {0}")]
    MissingRole(String),

    /// More than one node satisfies a role that must be unique.
    #[error("Ambiguous role: {role} matched nodes {node_ids:?}")]
    AmbiguousRole { role: String, node_ids: Vec<String> },

    /// An existing output file in scope carries a non-integer version token.
    #[error("Malformed output name: {path} (version token '{token}')")]
    MalformedOutputName { path: String, token: String },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown field '{field}' on node {node_id}")]
    UnknownField { node_id: String, field: String },

    /// Attempt to replace a node link with a parameter value.
    #[error("Field '{field}' on node {node_id} is a node reference and cannot be overwritten")]
    ReferenceOverwrite { node_id: String, field: String },

    #[error("Invalid control value: {0}")]
    InvalidControl(String),

    /// Controls of one workflow family were handed to another.
    #[error("Controls for {got} cannot drive a {expected} workflow")]
    ControlMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
