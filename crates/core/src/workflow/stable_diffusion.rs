//! Text-to-image stable diffusion workflow.
//!
//! The sampler is the anchor: the checkpoint loader, both prompt encoders
//! and the latent image node are found by following the sampler's links,
//! so workflows with several `CLIPTextEncode` nodes still resolve.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    read_str, read_u32, select_model, FILENAME_PREFIX_FIELD, SAVE_EXR_CLASS,
};
use crate::error::CoreError;
use crate::graph::Graph;
use crate::patch::{generate_seed, join_prompts, FieldEdit};

/// Sampler node class type.
pub const KSAMPLER_CLASS: &str = "KSampler";

/// Maximum output width accepted from the UI (8K UHD).
pub const IMAGE_WIDTH_MAX: u32 = 7680;

/// Maximum output height accepted from the UI (8K UHD).
pub const IMAGE_HEIGHT_MAX: u32 = 4320;

/// Maximum sampling steps accepted from the UI.
pub const SAMPLING_STEPS_MAX: u32 = 100;

/// Node IDs of a stable diffusion workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StableDiffusionRoles {
    pub sampler: String,
    pub checkpoint: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub latent_image: String,
    pub writer: String,
}

/// UI controls of a stable diffusion operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableDiffusionControls {
    /// Index into the discovered models; `None` keeps the graph's checkpoint.
    #[serde(default)]
    pub model_index: Option<usize>,
    /// Positive prompt entries in control order.
    #[serde(default)]
    pub positive_prompts: Vec<String>,
    /// Negative prompt entries in control order.
    #[serde(default)]
    pub negative_prompts: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
}

impl StableDiffusionRoles {
    /// Resolve every role; any missing or ambiguous role fails the load.
    pub fn resolve(graph: &Graph) -> Result<Self, CoreError> {
        let sampler = graph.find_unique_by_type(KSAMPLER_CLASS)?;
        Ok(Self {
            checkpoint: graph.resolve_reference(&sampler, "model")?,
            positive_prompt: graph.resolve_reference(&sampler, "positive")?,
            negative_prompt: graph.resolve_reference(&sampler, "negative")?,
            latent_image: graph.resolve_reference(&sampler, "latent_image")?,
            writer: graph.find_unique_by_type(SAVE_EXR_CLASS)?,
            sampler,
        })
    }

    pub(super) fn default_controls(
        &self,
        graph: &Graph,
        models: &[String],
    ) -> Result<StableDiffusionControls, CoreError> {
        let checkpoint = read_str(graph, &self.checkpoint, "ckpt_name")?;
        let prompt_entry = |node_id: &str| -> Result<Vec<String>, CoreError> {
            let text = read_str(graph, node_id, "text")?.trim();
            Ok(if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            })
        };

        Ok(StableDiffusionControls {
            model_index: models.iter().position(|m| m == checkpoint),
            positive_prompts: prompt_entry(&self.positive_prompt)?,
            negative_prompts: prompt_entry(&self.negative_prompt)?,
            width: read_u32(graph, &self.latent_image, "width")?,
            height: read_u32(graph, &self.latent_image, "height")?,
            steps: read_u32(graph, &self.sampler, "steps")?,
        })
    }

    /// Edits for one submission: model, prompts, size, a fresh seed, the
    /// writer prefix and the step count, in that order.
    pub(super) fn workflow_setup(
        &self,
        controls: &StableDiffusionControls,
        models: &[String],
        output_prefix: &str,
    ) -> Result<Vec<FieldEdit>, CoreError> {
        validate_range("width", controls.width, 1, IMAGE_WIDTH_MAX)?;
        validate_range("height", controls.height, 1, IMAGE_HEIGHT_MAX)?;
        validate_range("steps", controls.steps, 1, SAMPLING_STEPS_MAX)?;

        let mut edits = Vec::with_capacity(8);
        if let Some(model) = select_model(models, controls.model_index)? {
            edits.push(FieldEdit::new(&self.checkpoint, "ckpt_name", model));
        }
        edits.extend([
            FieldEdit::new(
                &self.positive_prompt,
                "text",
                join_prompts(&controls.positive_prompts),
            ),
            FieldEdit::new(
                &self.negative_prompt,
                "text",
                join_prompts(&controls.negative_prompts),
            ),
            FieldEdit::new(&self.latent_image, "width", controls.width),
            FieldEdit::new(&self.latent_image, "height", controls.height),
            FieldEdit::new(&self.sampler, "seed", json!(generate_seed())),
            FieldEdit::new(&self.writer, FILENAME_PREFIX_FIELD, output_prefix),
            FieldEdit::new(&self.sampler, "steps", controls.steps),
        ]);
        Ok(edits)
    }
}

fn validate_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), CoreError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::InvalidControl(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::Value;

    use super::*;
    use crate::patch::{apply_edits, SEED_MAX, SEED_MIN};
    use crate::workflow::{Controls, SetupContext, WorkflowKind};

    fn sd_workflow() -> Graph {
        Graph::load(&json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 156680208700286u64,
                    "steps": 20,
                    "cfg": 8,
                    "sampler_name": "euler",
                    "model": ["4", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["5", 0]
                }
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": "v1-5-pruned-emaonly.safetensors" }
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": { "width": 1920, "height": 1080, "batch_size": 1 }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a bottle of wine", "clip": ["4", 1] }
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "", "clip": ["4", 1] }
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
            },
            "9": {
                "class_type": "SaveEXR",
                "inputs": {
                    "images": ["8", 0],
                    "filename_prefix": "ComfyUI",
                    "frame_pad": 4,
                    "sRGB_to_linear": true,
                    "version": 1,
                    "start_frame": 1001
                }
            }
        }))
        .unwrap()
    }

    fn models() -> Vec<String> {
        vec![
            "sd_xl_base_1.0.safetensors".to_string(),
            "v1-5-pruned-emaonly.safetensors".to_string(),
        ]
    }

    fn controls() -> StableDiffusionControls {
        StableDiffusionControls {
            model_index: Some(0),
            positive_prompts: vec!["red car".into(), "".into(), "  sunset  ".into()],
            negative_prompts: vec!["blurry".into()],
            width: 1024,
            height: 576,
            steps: 30,
        }
    }

    #[test]
    fn resolves_roles_through_sampler_links() {
        let roles = StableDiffusionRoles::resolve(&sd_workflow()).unwrap();
        assert_eq!(
            roles,
            StableDiffusionRoles {
                sampler: "3".into(),
                checkpoint: "4".into(),
                positive_prompt: "6".into(),
                negative_prompt: "7".into(),
                latent_image: "5".into(),
                writer: "9".into(),
            }
        );
    }

    #[test]
    fn missing_writer_fails_load() {
        let mut doc = sd_workflow().to_document();
        doc.as_object_mut().unwrap().remove("9");
        let graph = Graph::load(&doc).unwrap();
        assert_matches!(
            StableDiffusionRoles::resolve(&graph),
            Err(CoreError::MissingRole(_))
        );
    }

    #[test]
    fn defaults_are_read_from_graph() {
        let graph = sd_workflow();
        let loaded = WorkflowKind::StableDiffusion.load_workflow(&graph).unwrap();
        assert_eq!(loaded.frame_pad(), 4);
        assert_eq!(loaded.version_width(), 5);

        let defaults = loaded.default_controls(&graph, &models()).unwrap();
        assert_eq!(
            defaults,
            Controls::StableDiffusion(StableDiffusionControls {
                model_index: Some(1),
                positive_prompts: vec!["a bottle of wine".into()],
                negative_prompts: vec![],
                width: 1920,
                height: 1080,
                steps: 20,
            })
        );
    }

    #[test]
    fn setup_patches_every_parameter() {
        let mut graph = sd_workflow();
        let loaded = WorkflowKind::StableDiffusion.load_workflow(&graph).unwrap();
        let models = models();
        let ctx = SetupContext {
            basename: "moonshot_sd1",
            models: &models,
        };

        let edits = loaded
            .workflow_setup(&Controls::StableDiffusion(controls()), &ctx)
            .unwrap();
        apply_edits(&mut graph, &edits).unwrap();

        assert_eq!(graph.input("4", "ckpt_name"), Some(&json!("sd_xl_base_1.0.safetensors")));
        assert_eq!(graph.input("6", "text"), Some(&json!("red car, sunset")));
        assert_eq!(graph.input("7", "text"), Some(&json!("blurry")));
        assert_eq!(graph.input("5", "width"), Some(&json!(1024)));
        assert_eq!(graph.input("5", "height"), Some(&json!(576)));
        assert_eq!(graph.input("3", "steps"), Some(&json!(30)));
        assert_eq!(graph.input("9", "filename_prefix"), Some(&json!("moonshot_sd1")));
        assert_eq!(graph.input("3", "model"), Some(&json!(["4", 0])));

        let seed = graph.input("3", "seed").and_then(Value::as_u64).unwrap();
        assert!((SEED_MIN..=SEED_MAX).contains(&seed));
    }

    #[test]
    fn each_setup_draws_a_new_seed() {
        let graph = sd_workflow();
        let loaded = WorkflowKind::StableDiffusion.load_workflow(&graph).unwrap();
        let ctx = SetupContext {
            basename: "p_n",
            models: &[],
        };
        let controls = Controls::StableDiffusion(StableDiffusionControls {
            model_index: None,
            ..controls()
        });

        let seed_of = |edits: Vec<FieldEdit>| {
            edits
                .into_iter()
                .find(|e| e.field == "seed")
                .map(|e| e.value)
                .unwrap()
        };
        let first = seed_of(loaded.workflow_setup(&controls, &ctx).unwrap());
        let second = seed_of(loaded.workflow_setup(&controls, &ctx).unwrap());
        assert_ne!(first, second);
    }

    #[test]
    fn no_model_index_keeps_checkpoint() {
        let graph = sd_workflow();
        let loaded = WorkflowKind::StableDiffusion.load_workflow(&graph).unwrap();
        let ctx = SetupContext {
            basename: "p_n",
            models: &[],
        };
        let controls = Controls::StableDiffusion(StableDiffusionControls {
            model_index: None,
            ..controls()
        });
        let edits = loaded.workflow_setup(&controls, &ctx).unwrap();
        assert!(edits.iter().all(|e| e.field != "ckpt_name"));
    }

    #[test]
    fn out_of_range_size_is_rejected() {
        let graph = sd_workflow();
        let loaded = WorkflowKind::StableDiffusion.load_workflow(&graph).unwrap();
        let models = models();
        let ctx = SetupContext {
            basename: "p_n",
            models: &models,
        };
        let controls = Controls::StableDiffusion(StableDiffusionControls {
            width: IMAGE_WIDTH_MAX + 1,
            ..controls()
        });
        assert_matches!(
            loaded.workflow_setup(&controls, &ctx),
            Err(CoreError::InvalidControl(_))
        );
    }

    #[test]
    fn mismatched_controls_are_rejected() {
        let graph = sd_workflow();
        let loaded = WorkflowKind::StableDiffusion.load_workflow(&graph).unwrap();
        let ctx = SetupContext {
            basename: "p_n",
            models: &[],
        };
        let controls = Controls::DepthAnything(crate::workflow::DepthAnythingControls {
            model_index: None,
            front_path: "/in/front.exr".into(),
        });
        assert_matches!(
            loaded.workflow_setup(&controls, &ctx),
            Err(CoreError::ControlMismatch { expected: "stable-diffusion", got: "depth-anything" })
        );
    }
}
