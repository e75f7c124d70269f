//! Workflow families.
//!
//! Each supported workflow family knows which nodes of its graph play which
//! role, which defaults to read back from the graph, and which fields to
//! patch before a submission. The set is closed: [`WorkflowKind`] names the
//! families and [`LoadedWorkflow`] dispatches to them.

pub mod depth_anything;
pub mod marigold;
pub mod stable_diffusion;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::patch::FieldEdit;

pub use depth_anything::{DepthAnythingControls, DepthAnythingRoles};
pub use marigold::{MarigoldControls, MarigoldRoles, ReductionMethod, Scheduler};
pub use stable_diffusion::{StableDiffusionControls, StableDiffusionRoles};

// ---------------------------------------------------------------------------
// Node class types and field names shared by several families
// ---------------------------------------------------------------------------

/// EXR reader node class type.
pub const LOAD_EXR_CLASS: &str = "LoadEXR";

/// EXR writer node class type.
pub const SAVE_EXR_CLASS: &str = "SaveEXR";

/// Writer input holding the output filename prefix.
pub const FILENAME_PREFIX_FIELD: &str = "filename_prefix";

/// Writer input holding the zero-padding width of the output counter.
pub const FRAME_PAD_FIELD: &str = "frame_pad";

/// Reader input holding the source file path.
pub const FILEPATH_FIELD: &str = "filepath";

/// Writer `filename_prefix` marking the result writer in depth workflows.
pub const RESULT_LAYER: &str = "Result";

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The supported workflow families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    StableDiffusion,
    DepthAnything,
    Marigold,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] = [
        WorkflowKind::StableDiffusion,
        WorkflowKind::DepthAnything,
        WorkflowKind::Marigold,
    ];

    /// Short identifier used in configuration and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::StableDiffusion => "stable-diffusion",
            Self::DepthAnything => "depth-anything",
            Self::Marigold => "marigold",
        }
    }

    /// Workflow file location relative to the workflows directory.
    pub fn workflow_path(self) -> PathBuf {
        match self {
            Self::StableDiffusion => PathBuf::from("stable-diffusion/api/comfyui_sd_workflow_api.json"),
            Self::DepthAnything => {
                PathBuf::from("zdepth/api/comfyui_zdepth_depth_anything_workflow_api.json")
            }
            Self::Marigold => PathBuf::from("zdepth/api/comfyui_zdepth_marigold_workflow_api.json"),
        }
    }

    /// Model directories, relative to the models directory.
    pub fn model_dirs(self) -> &'static [&'static str] {
        match self {
            Self::StableDiffusion => &["checkpoints", "diffusers"],
            Self::DepthAnything => &["depthanything"],
            Self::Marigold => &[],
        }
    }

    /// Resolve roles and read defaults from a freshly loaded graph.
    pub fn load_workflow(self, graph: &Graph) -> Result<LoadedWorkflow, CoreError> {
        let (roles, frame_pad) = match self {
            Self::StableDiffusion => {
                let roles = StableDiffusionRoles::resolve(graph)?;
                let pad = read_frame_pad(graph, &roles.writer)?;
                (RoleIndex::StableDiffusion(roles), pad)
            }
            Self::DepthAnything => {
                let roles = DepthAnythingRoles::resolve(graph)?;
                let pad = read_frame_pad(graph, &roles.writer)?;
                (RoleIndex::DepthAnything(roles), pad)
            }
            Self::Marigold => {
                let roles = MarigoldRoles::resolve(graph)?;
                let pad = read_frame_pad(graph, &roles.writer)?;
                (RoleIndex::Marigold(roles), pad)
            }
        };
        Ok(LoadedWorkflow { roles, frame_pad })
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CoreError::InvalidControl(format!("unknown workflow kind '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Role index / controls
// ---------------------------------------------------------------------------

/// Node IDs playing each role, resolved once per loaded graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RoleIndex {
    StableDiffusion(StableDiffusionRoles),
    DepthAnything(DepthAnythingRoles),
    Marigold(MarigoldRoles),
}

/// Current UI control values, one shape per family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "kebab-case")]
pub enum Controls {
    StableDiffusion(StableDiffusionControls),
    DepthAnything(DepthAnythingControls),
    Marigold(MarigoldControls),
}

impl Controls {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::StableDiffusion(_) => WorkflowKind::StableDiffusion,
            Self::DepthAnything(_) => WorkflowKind::DepthAnything,
            Self::Marigold(_) => WorkflowKind::Marigold,
        }
    }
}

/// Per-operator values a setup needs besides the controls.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext<'a> {
    /// Output basename (`{project}_{node_name}`).
    pub basename: &'a str,
    /// Discovered model file names; model controls index into this list.
    pub models: &'a [String],
}

// ---------------------------------------------------------------------------
// Loaded workflow
// ---------------------------------------------------------------------------

/// A workflow family bound to the role index of one loaded graph.
///
/// Derived from the graph; rebuild it whenever the graph is reloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedWorkflow {
    roles: RoleIndex,
    frame_pad: usize,
}

impl LoadedWorkflow {
    pub fn kind(&self) -> WorkflowKind {
        match self.roles {
            RoleIndex::StableDiffusion(_) => WorkflowKind::StableDiffusion,
            RoleIndex::DepthAnything(_) => WorkflowKind::DepthAnything,
            RoleIndex::Marigold(_) => WorkflowKind::Marigold,
        }
    }

    pub fn role_index(&self) -> &RoleIndex {
        &self.roles
    }

    /// The writer node's `frame_pad` input.
    pub fn frame_pad(&self) -> usize {
        self.frame_pad
    }

    /// Digits the writer pads its output version to: one past `frame_pad`.
    pub fn version_width(&self) -> usize {
        self.frame_pad + 1
    }

    /// Filename prefix handed to the writer node; also the versioning scope.
    pub fn output_prefix(&self, basename: &str) -> String {
        match self.roles {
            RoleIndex::StableDiffusion(_) => basename.to_string(),
            RoleIndex::DepthAnything(_) | RoleIndex::Marigold(_) => {
                format!("{basename}_{RESULT_LAYER}")
            }
        }
    }

    /// Control values mirroring what the graph currently holds.
    pub fn default_controls(&self, graph: &Graph, models: &[String]) -> Result<Controls, CoreError> {
        Ok(match &self.roles {
            RoleIndex::StableDiffusion(roles) => {
                Controls::StableDiffusion(roles.default_controls(graph, models)?)
            }
            RoleIndex::DepthAnything(roles) => {
                Controls::DepthAnything(roles.default_controls(graph, models)?)
            }
            RoleIndex::Marigold(roles) => Controls::Marigold(roles.default_controls(graph)?),
        })
    }

    /// Ordered field edits applying `controls` to the graph.
    pub fn workflow_setup(
        &self,
        controls: &Controls,
        ctx: &SetupContext<'_>,
    ) -> Result<Vec<FieldEdit>, CoreError> {
        let prefix = self.output_prefix(ctx.basename);
        match (&self.roles, controls) {
            (RoleIndex::StableDiffusion(roles), Controls::StableDiffusion(c)) => {
                roles.workflow_setup(c, ctx.models, &prefix)
            }
            (RoleIndex::DepthAnything(roles), Controls::DepthAnything(c)) => {
                roles.workflow_setup(c, ctx.models, &prefix)
            }
            (RoleIndex::Marigold(roles), Controls::Marigold(c)) => Ok(roles.workflow_setup(c, &prefix)),
            (_, other) => Err(CoreError::ControlMismatch {
                expected: self.kind().name(),
                got: other.kind().name(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// The result writer of a depth workflow: the `SaveEXR` node whose
/// `filename_prefix` is `"Result"`.
fn find_result_writer(graph: &Graph) -> Result<String, CoreError> {
    graph.find_unique_by_type_and_field(
        SAVE_EXR_CLASS,
        FILENAME_PREFIX_FIELD,
        &Value::String(RESULT_LAYER.to_string()),
    )
}

fn read_frame_pad(graph: &Graph, writer: &str) -> Result<usize, CoreError> {
    let pad = read_u64(graph, writer, FRAME_PAD_FIELD)?;
    usize::try_from(pad)
        .map_err(|_| CoreError::MalformedGraph(format!("frame_pad {pad} on node {writer} is too large")))
}

fn read_literal<'a>(graph: &'a Graph, node_id: &str, field: &str) -> Result<&'a Value, CoreError> {
    graph.input(node_id, field).ok_or_else(|| {
        CoreError::MalformedGraph(format!("node {node_id} is missing input '{field}'"))
    })
}

fn wrong_type(node_id: &str, field: &str, expected: &str) -> CoreError {
    CoreError::MalformedGraph(format!(
        "input '{field}' on node {node_id} must be {expected}"
    ))
}

fn read_u64(graph: &Graph, node_id: &str, field: &str) -> Result<u64, CoreError> {
    let value = read_literal(graph, node_id, field)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        .ok_or_else(|| wrong_type(node_id, field, "a non-negative integer"))
}

fn read_u32(graph: &Graph, node_id: &str, field: &str) -> Result<u32, CoreError> {
    let value = read_u64(graph, node_id, field)?;
    u32::try_from(value).map_err(|_| wrong_type(node_id, field, "a 32-bit integer"))
}

fn read_f64(graph: &Graph, node_id: &str, field: &str) -> Result<f64, CoreError> {
    read_literal(graph, node_id, field)?
        .as_f64()
        .ok_or_else(|| wrong_type(node_id, field, "a number"))
}

fn read_bool(graph: &Graph, node_id: &str, field: &str) -> Result<bool, CoreError> {
    read_literal(graph, node_id, field)?
        .as_bool()
        .ok_or_else(|| wrong_type(node_id, field, "a boolean"))
}

fn read_str<'a>(graph: &'a Graph, node_id: &str, field: &str) -> Result<&'a str, CoreError> {
    read_literal(graph, node_id, field)?
        .as_str()
        .ok_or_else(|| wrong_type(node_id, field, "a string"))
}

/// Model name selected by `index`, or `None` to keep the graph's model.
fn select_model<'a>(models: &'a [String], index: Option<usize>) -> Result<Option<&'a str>, CoreError> {
    match index {
        None => Ok(None),
        Some(i) => models.get(i).map(|m| Some(m.as_str())).ok_or_else(|| {
            CoreError::InvalidControl(format!(
                "model index {i} out of range ({} models available)",
                models.len()
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn kind_names_round_trip_through_from_str() {
        for kind in WorkflowKind::ALL {
            assert_eq!(kind.name().parse::<WorkflowKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert_matches!("sdxl".parse::<WorkflowKind>(), Err(CoreError::InvalidControl(_)));
    }

    #[test]
    fn controls_deserialize_with_workflow_tag() {
        let controls: Controls = serde_json::from_value(serde_json::json!({
            "workflow": "depth-anything",
            "model_index": 0,
            "front_path": "/work/in/front.exr"
        }))
        .unwrap();
        assert_eq!(controls.kind(), WorkflowKind::DepthAnything);
    }

    #[test]
    fn select_model_bounds() {
        let models = vec!["a.safetensors".to_string()];
        assert_eq!(select_model(&models, None).unwrap(), None);
        assert_eq!(select_model(&models, Some(0)).unwrap(), Some("a.safetensors"));
        assert_matches!(select_model(&models, Some(1)), Err(CoreError::InvalidControl(_)));
    }
}
