//! Workflow graph patching and job lifecycle for ComfyUI operators.
//!
//! Loads API-format workflow graphs, locates the nodes each workflow
//! family drives, applies validated parameter edits, allocates versioned
//! output names, and tracks one submitted job at a time through a
//! transport-agnostic state machine. No I/O beyond the local filesystem;
//! the HTTP transport lives in `comfybox-comfyui`.

pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod models;
pub mod output;
pub mod patch;
pub mod status;
pub mod types;
pub mod versioning;
pub mod workflow;
