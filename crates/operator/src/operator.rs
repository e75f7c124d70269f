//! Per-instance operator state and the execute-phase refresh cycle.

use std::path::{Path, PathBuf};

use serde::Serialize;

use comfybox_core::error::CoreError;
use comfybox_core::graph::Graph;
use comfybox_core::lifecycle::{
    InterruptOutcome, JobController, JobState, PollOutcome, SubmitOutcome, Transport,
};
use comfybox_core::models::{find_models, DEFAULT_EXCLUDED_DIRS, DEFAULT_MODEL_EXTENSIONS};
use comfybox_core::patch::{apply_edits, output_basename};
use comfybox_core::status::{status_display, StatusDisplay};
use comfybox_core::versioning::{latest_output, next_version, render_path, INITIAL_VERSION};
use comfybox_core::workflow::{Controls, LoadedWorkflow, SetupContext, WorkflowKind};
use comfybox_core::output;

use crate::config::{ConfigError, OperatorConfig};

/// Placeholder color shown until an output exists.
pub const PLACEHOLDER_COLOR: &str = "black";

/// Placeholder size used when the controls carry no image size.
pub const DEFAULT_PLACEHOLDER_SIZE: (u32, u32) = (1920, 1080);

/// Errors that abort operator construction or a workflow reload.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Host-provided names the operator's outputs are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    pub project: String,
    pub node_name: String,
}

/// What the UI asks for in one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct RefreshRequest {
    /// The submit trigger fired since the last cycle.
    pub submit: bool,
    /// The user asked to stop the running job.
    pub interrupt: bool,
    /// The UI has shown the terminal state and wants to return to idle.
    pub acknowledge: bool,
    /// Current control values; `None` keeps the previous ones.
    pub controls: Option<Controls>,
}

/// What the UI shows after one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub state: JobState,
    pub status: StatusDisplay,
    /// Produced output, or the placeholder when none exists yet.
    pub output_path: PathBuf,
    /// The UI should reset its submit trigger.
    pub clear_submit: bool,
}

/// One operator instance: a loaded workflow, its controls and its job.
pub struct Operator<T: Transport> {
    config: OperatorConfig,
    identity: OperatorIdentity,
    transport: T,
    workflow_path: PathBuf,
    graph: Graph,
    workflow: LoadedWorkflow,
    controls: Controls,
    models: Vec<String>,
    controller: JobController,
    version: u32,
    expected_output: PathBuf,
}

impl<T: Transport> Operator<T> {
    /// Load `kind`'s workflow from the configured workflows directory and
    /// derive everything the first refresh needs.
    ///
    /// Any load-time failure (unreadable or malformed graph, missing or
    /// ambiguous role, malformed output name) aborts construction.
    pub fn initialize(
        config: OperatorConfig,
        kind: WorkflowKind,
        identity: OperatorIdentity,
        transport: T,
    ) -> Result<Self, OperatorError> {
        let workflow_path = config.workflow_path(kind);
        let graph = Graph::from_path(&workflow_path)?;
        let workflow = kind.load_workflow(&graph)?;
        let models = find_models(
            &config.model_dirs(kind),
            DEFAULT_EXCLUDED_DIRS,
            DEFAULT_MODEL_EXTENSIONS,
        )?;
        let controls = workflow.default_controls(&graph, &models)?;

        let mut operator = Self {
            config,
            identity,
            transport,
            workflow_path,
            graph,
            workflow,
            controls,
            models,
            controller: JobController::new(),
            version: INITIAL_VERSION,
            expected_output: PathBuf::new(),
        };
        operator.update_output_version()?;

        tracing::info!(
            workflow = %kind,
            path = %operator.workflow_path.display(),
            node_name = %operator.identity.node_name,
            models = operator.models.len(),
            version = operator.version,
            client_id = %operator.controller.client_id(),
            "Operator initialized"
        );
        Ok(operator)
    }

    /// Replace the graph with the workflow at `path`.
    ///
    /// The role index and controls are rebuilt from the new graph. If the
    /// new graph does not load, the previous workflow stays in place.
    pub fn reload_workflow(&mut self, path: impl AsRef<Path>) -> Result<(), OperatorError> {
        let path = path.as_ref();
        let kind = self.workflow.kind();
        let graph = Graph::from_path(path)?;
        let workflow = kind.load_workflow(&graph)?;
        let controls = workflow.default_controls(&graph, &self.models)?;

        self.graph = graph;
        self.workflow = workflow;
        self.controls = controls;
        self.workflow_path = path.to_path_buf();
        self.update_output_version()?;

        tracing::info!(workflow = %kind, path = %path.display(), "Workflow reloaded");
        Ok(())
    }

    /// Swap the transport, e.g. after the host or port was edited.
    pub fn set_transport(&mut self, transport: T) {
        self.transport = transport;
    }

    /// Run one execute-phase cycle.
    ///
    /// Submits when asked, interrupts when asked, polls at most once and
    /// always resolves the output. Never fails: runtime errors end up as
    /// [`JobState::Failed`] with `clear_submit` set.
    pub async fn refresh(&mut self, request: RefreshRequest) -> RefreshReport {
        let mut clear_submit = false;

        if let Some(controls) = request.controls {
            self.controls = controls;
        }
        if request.acknowledge {
            self.controller.acknowledge();
        }

        if request.interrupt {
            match self.controller.interrupt(&self.transport).await {
                InterruptOutcome::NotInFlight => {}
                InterruptOutcome::Interrupted { server_error } => {
                    if let Some(error) = server_error {
                        tracing::warn!(error = %error, "Interrupt request failed, job dropped locally");
                    }
                    self.controller.acknowledge();
                    clear_submit = true;
                }
            }
        } else if request.submit {
            clear_submit |= self.submit().await;
        }

        if self.controller.state().is_in_flight() {
            clear_submit |= self.poll().await;
        }

        let state = self.controller.state();
        RefreshReport {
            state,
            status: status_display(state),
            output_path: self.resolve_output(),
            clear_submit,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.workflow.kind()
    }

    pub fn state(&self) -> JobState {
        self.controller.state()
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    /// `{project}_{node_name}`.
    pub fn basename(&self) -> String {
        output_basename(&self.identity.project, &self.identity.node_name)
    }

    /// Version of the file the expected output path points at.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn expected_output(&self) -> &Path {
        &self.expected_output
    }

    /// Placeholder image for the current controls.
    pub fn fallback_output(&self) -> PathBuf {
        let (width, height) = match &self.controls {
            Controls::StableDiffusion(c) => (c.width, c.height),
            _ => DEFAULT_PLACEHOLDER_SIZE,
        };
        output::placeholder_path(
            &self.config.presets_dir(),
            PLACEHOLDER_COLOR,
            width,
            height,
            &self.config.image_format,
        )
    }

    // ---- private helpers ----

    /// Patch and submit. Returns whether the submit trigger must be cleared.
    async fn submit(&mut self) -> bool {
        if self.controller.state().is_in_flight() {
            tracing::debug!("Submit ignored, a job is already in flight");
            return false;
        }

        let basename = self.basename();
        let ctx = SetupContext {
            basename: &basename,
            models: &self.models,
        };
        let patched = self
            .workflow
            .workflow_setup(&self.controls, &ctx)
            .and_then(|edits| apply_edits(&mut self.graph, &edits));
        if let Err(e) = patched {
            tracing::error!(error = %e, node_name = %self.identity.node_name, "Failed to patch workflow");
            self.controller.fail_submission();
            return true;
        }

        match self.controller.submit(&self.transport, &self.graph).await {
            SubmitOutcome::Submitted(handle) => {
                let prefix = self.workflow.output_prefix(&basename);
                match next_version(&self.config.output_dir(), &prefix, &self.config.image_format) {
                    Ok(upcoming) => tracing::info!(
                        prompt_id = %handle.prompt_id,
                        node_name = %self.identity.node_name,
                        upcoming_version = upcoming,
                        "Workflow submitted"
                    ),
                    Err(e) => tracing::warn!(
                        prompt_id = %handle.prompt_id,
                        node_name = %self.identity.node_name,
                        error = %e,
                        "Workflow submitted, upcoming output version unknown"
                    ),
                }
                false
            }
            SubmitOutcome::AlreadyInFlight => false,
            SubmitOutcome::Failed(error) => {
                tracing::error!(error = %error, "Failed to submit workflow");
                true
            }
        }
    }

    /// Poll once. Returns whether the submit trigger must be cleared.
    async fn poll(&mut self) -> bool {
        match self.controller.poll(&self.transport).await {
            PollOutcome::NotInFlight | PollOutcome::Running => false,
            PollOutcome::Completed => {
                if let Err(e) = self.update_output_version() {
                    tracing::error!(error = %e, "Failed to locate produced output");
                }
                tracing::info!(
                    version = self.version,
                    output = %self.expected_output.display(),
                    "Execution completed"
                );
                true
            }
            PollOutcome::Failed(error) => {
                let prompt_id = self
                    .controller
                    .handle()
                    .map(|h| h.prompt_id.as_str())
                    .unwrap_or_default();
                tracing::error!(prompt_id, error = %error, "Execution failed");
                true
            }
        }
    }

    /// Point the expected output at the latest produced file.
    ///
    /// An existing file is adopted under the name it was written with. With
    /// nothing produced yet, the path is rendered at the writer's padding.
    fn update_output_version(&mut self) -> Result<(), CoreError> {
        let prefix = self.workflow.output_prefix(&self.basename());
        let output_dir = self.config.output_dir();
        match latest_output(&output_dir, &prefix, &self.config.image_format)? {
            Some((version, path)) => {
                self.version = version;
                self.expected_output = path;
            }
            None => {
                self.expected_output = render_path(
                    &prefix,
                    self.version,
                    self.workflow.version_width(),
                    &self.config.image_format,
                    &output_dir,
                );
            }
        }
        Ok(())
    }

    fn resolve_output(&self) -> PathBuf {
        output::resolve(&self.expected_output, &self.fallback_output())
    }
}

impl<T: Transport> std::fmt::Debug for Operator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("kind", &self.workflow.kind())
            .field("workflow_path", &self.workflow_path)
            .field("identity", &self.identity)
            .field("state", &self.controller.state())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Controls for `kind` parsed from JSON, tagged or untagged.
pub fn parse_controls(kind: WorkflowKind, text: &str) -> Result<Controls, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    if let Some(obj) = value.as_object_mut() {
        obj.entry("workflow")
            .or_insert_with(|| serde_json::Value::String(kind.name().to_string()));
    }
    serde_json::from_value(value)
}
