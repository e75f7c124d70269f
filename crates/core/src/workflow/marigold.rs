//! Marigold diffusion-based depth estimation workflow.
//!
//! All tuning parameters live on the single `MarigoldDepthEstimation`
//! node; the operator mirrors each of them as a control.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    find_result_writer, read_bool, read_f64, read_str, read_u32, wrong_type, FILENAME_PREFIX_FIELD,
    FILEPATH_FIELD, LOAD_EXR_CLASS,
};
use crate::error::CoreError;
use crate::graph::Graph;
use crate::patch::FieldEdit;

/// Depth estimator node class type.
pub const ESTIMATOR_CLASS: &str = "MarigoldDepthEstimation";

/// How the repeated estimates are merged into one depth map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    Median,
    Mean,
}

impl ReductionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Mean => "mean",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "median" => Some(Self::Median),
            "mean" => Some(Self::Mean),
            _ => None,
        }
    }
}

/// Diffusion scheduler used by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheduler {
    DDIMScheduler,
    DDPMScheduler,
    PNDMScheduler,
    DEISMultiStepScheduler,
}

impl Scheduler {
    pub const ALL: [Scheduler; 4] = [
        Scheduler::DDIMScheduler,
        Scheduler::DDPMScheduler,
        Scheduler::PNDMScheduler,
        Scheduler::DEISMultiStepScheduler,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DDIMScheduler => "DDIMScheduler",
            Self::DDPMScheduler => "DDPMScheduler",
            Self::PNDMScheduler => "PNDMScheduler",
            Self::DEISMultiStepScheduler => "DEISMultiStepScheduler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scheduler| scheduler.as_str() == s)
    }
}

/// Node IDs of a Marigold workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarigoldRoles {
    pub estimator: String,
    pub reader: String,
    pub writer: String,
}

/// UI controls of a Marigold operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarigoldControls {
    pub denoise_steps: u32,
    pub n_repeat: u32,
    pub regularizer_strength: f64,
    pub reduction_method: ReductionMethod,
    pub max_iter: u32,
    pub tol: f64,
    pub invert: bool,
    pub keep_model_loaded: bool,
    pub n_repeat_batch_size: u32,
    pub use_fp16: bool,
    pub scheduler: Scheduler,
    pub normalize: bool,
    /// Source image read by the `LoadEXR` node.
    pub front_path: String,
}

impl MarigoldRoles {
    pub fn resolve(graph: &Graph) -> Result<Self, CoreError> {
        Ok(Self {
            estimator: graph.find_unique_by_type(ESTIMATOR_CLASS)?,
            reader: graph.find_unique_by_type(LOAD_EXR_CLASS)?,
            writer: find_result_writer(graph)?,
        })
    }

    pub(super) fn default_controls(&self, graph: &Graph) -> Result<MarigoldControls, CoreError> {
        let est = self.estimator.as_str();

        let reduction = read_str(graph, est, "reduction_method")?;
        let reduction_method = ReductionMethod::parse(reduction)
            .ok_or_else(|| wrong_type(est, "reduction_method", "median or mean"))?;
        let scheduler = read_str(graph, est, "scheduler")?;
        let scheduler = Scheduler::parse(scheduler)
            .ok_or_else(|| wrong_type(est, "scheduler", "a known scheduler"))?;

        Ok(MarigoldControls {
            denoise_steps: read_u32(graph, est, "denoise_steps")?,
            n_repeat: read_u32(graph, est, "n_repeat")?,
            regularizer_strength: read_f64(graph, est, "regularizer_strength")?,
            reduction_method,
            max_iter: read_u32(graph, est, "max_iter")?,
            tol: read_f64(graph, est, "tol")?,
            invert: read_bool(graph, est, "invert")?,
            keep_model_loaded: read_bool(graph, est, "keep_model_loaded")?,
            n_repeat_batch_size: read_u32(graph, est, "n_repeat_batch_size")?,
            use_fp16: read_bool(graph, est, "use_fp16")?,
            scheduler,
            normalize: read_bool(graph, est, "normalize")?,
            front_path: read_str(graph, &self.reader, FILEPATH_FIELD)?.to_string(),
        })
    }

    pub(super) fn workflow_setup(&self, c: &MarigoldControls, output_prefix: &str) -> Vec<FieldEdit> {
        let est = self.estimator.as_str();
        let params: [(&str, Value); 12] = [
            ("denoise_steps", json!(c.denoise_steps)),
            ("n_repeat", json!(c.n_repeat)),
            ("reduction_method", json!(c.reduction_method.as_str())),
            ("regularizer_strength", json!(c.regularizer_strength)),
            ("max_iter", json!(c.max_iter)),
            ("tol", json!(c.tol)),
            ("invert", json!(c.invert)),
            ("keep_model_loaded", json!(c.keep_model_loaded)),
            ("n_repeat_batch_size", json!(c.n_repeat_batch_size)),
            ("use_fp16", json!(c.use_fp16)),
            ("scheduler", json!(c.scheduler.as_str())),
            ("normalize", json!(c.normalize)),
        ];

        let mut edits: Vec<FieldEdit> = params
            .into_iter()
            .map(|(field, value)| FieldEdit::new(est, field, value))
            .collect();
        edits.push(FieldEdit::new(&self.reader, FILEPATH_FIELD, c.front_path.as_str()));
        edits.push(FieldEdit::new(&self.writer, FILENAME_PREFIX_FIELD, output_prefix));
        edits
    }
}
