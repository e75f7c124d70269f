//! Depth Anything V2 depth estimation workflow.

use serde::{Deserialize, Serialize};

use super::{
    find_result_writer, read_str, select_model, FILENAME_PREFIX_FIELD, FILEPATH_FIELD,
    LOAD_EXR_CLASS,
};
use crate::error::CoreError;
use crate::graph::Graph;
use crate::patch::FieldEdit;

/// Model loader node class type.
pub const MODEL_LOADER_CLASS: &str = "DownloadAndLoadDepthAnythingV2Model";

/// Node IDs of a Depth Anything workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthAnythingRoles {
    pub model_loader: String,
    pub reader: String,
    pub writer: String,
}

/// UI controls of a Depth Anything operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthAnythingControls {
    #[serde(default)]
    pub model_index: Option<usize>,
    /// Source image read by the `LoadEXR` node.
    pub front_path: String,
}

impl DepthAnythingRoles {
    pub fn resolve(graph: &Graph) -> Result<Self, CoreError> {
        Ok(Self {
            model_loader: graph.find_unique_by_type(MODEL_LOADER_CLASS)?,
            reader: graph.find_unique_by_type(LOAD_EXR_CLASS)?,
            writer: find_result_writer(graph)?,
        })
    }

    pub(super) fn default_controls(
        &self,
        graph: &Graph,
        models: &[String],
    ) -> Result<DepthAnythingControls, CoreError> {
        let model = read_str(graph, &self.model_loader, "model")?;
        Ok(DepthAnythingControls {
            model_index: models.iter().position(|m| m == model),
            front_path: read_str(graph, &self.reader, FILEPATH_FIELD)?.to_string(),
        })
    }

    pub(super) fn workflow_setup(
        &self,
        controls: &DepthAnythingControls,
        models: &[String],
        output_prefix: &str,
    ) -> Result<Vec<FieldEdit>, CoreError> {
        if controls.front_path.trim().is_empty() {
            return Err(CoreError::InvalidControl("front_path must not be empty".into()));
        }

        let mut edits = Vec::with_capacity(3);
        if let Some(model) = select_model(models, controls.model_index)? {
            edits.push(FieldEdit::new(&self.model_loader, "model", model));
        }
        edits.push(FieldEdit::new(&self.reader, FILEPATH_FIELD, controls.front_path.as_str()));
        edits.push(FieldEdit::new(&self.writer, FILENAME_PREFIX_FIELD, output_prefix));
        Ok(edits)
    }
}
