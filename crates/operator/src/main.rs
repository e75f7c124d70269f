//! `comfybox-operator` -- headless driver for a single operator.
//!
//! Loads one workflow, submits it once to a ComfyUI server and polls it
//! to completion, then reports the resolved output path. Ctrl-C
//! interrupts the running job.
//!
//! # Environment variables
//!
//! Server and directory settings are read by [`OperatorConfig::from_env`].
//!
//! | Variable             | Required | Default            | Description                         |
//! |----------------------|----------|--------------------|-------------------------------------|
//! | `OPERATOR_WORKFLOW`  | no       | `stable-diffusion` | Workflow family to load             |
//! | `OPERATOR_CONTROLS`  | no       | --                 | JSON file with control values       |
//! | `PROJECT_NAME`       | no       | `comfybox`         | Project part of the output basename |
//! | `NODE_NAME`          | no       | workflow name      | Node part of the output basename    |
//! | `POLL_INTERVAL_SECS` | no       | `2`                | Seconds between refresh cycles      |

use std::time::Duration;

use comfybox_comfyui::api::ComfyUIApi;
use comfybox_core::lifecycle::JobState;
use comfybox_core::workflow::WorkflowKind;
use comfybox_operator::{parse_controls, Operator, OperatorConfig, OperatorIdentity, RefreshRequest};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default interval between refresh cycles.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfybox_operator=info,comfybox_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OperatorConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let kind: WorkflowKind = std::env::var("OPERATOR_WORKFLOW")
        .unwrap_or_else(|_| WorkflowKind::StableDiffusion.name().to_string())
        .parse()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "OPERATOR_WORKFLOW must name a known workflow");
            std::process::exit(1);
        });

    let identity = OperatorIdentity {
        project: std::env::var("PROJECT_NAME").unwrap_or_else(|_| "comfybox".into()),
        node_name: std::env::var("NODE_NAME").unwrap_or_else(|_| kind.name().replace('-', "_")),
    };

    let interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let interval = Duration::from_secs(interval_secs);

    let controls = match std::env::var("OPERATOR_CONTROLS") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                tracing::error!(path = %path, error = %e, "Failed to read controls file");
                std::process::exit(1);
            });
            let controls = parse_controls(kind, &text).unwrap_or_else(|e| {
                tracing::error!(path = %path, error = %e, "Invalid controls file");
                std::process::exit(1);
            });
            Some(controls)
        }
        Err(_) => None,
    };

    tracing::info!(
        api_url = %config.api_url(),
        workflow = %kind,
        interval_secs,
        "Starting comfybox-operator",
    );

    let api = ComfyUIApi::new(config.api_url(), config.request_timeout()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP client");
        std::process::exit(1);
    });

    let mut operator = Operator::initialize(config, kind, identity, api).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to initialize operator");
        std::process::exit(1);
    });

    let mut request = RefreshRequest {
        submit: true,
        controls,
        ..Default::default()
    };

    let final_state = loop {
        let report = operator.refresh(std::mem::take(&mut request)).await;
        tracing::info!(
            state = ?report.state,
            status = report.status.label,
            output = %report.output_path.display(),
            "Refreshed"
        );
        if !report.state.is_in_flight() {
            break report.state;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt requested");
                request.interrupt = true;
            }
        }
    };

    if final_state != JobState::Completed {
        std::process::exit(1);
    }
}
