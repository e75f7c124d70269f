//! `comfybox-operator` library crate.
//!
//! One [`Operator`] per host node: it owns the loaded workflow graph, the
//! current controls and the job, and is driven by the host through
//! [`Operator::refresh`]. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod operator;

pub use config::{ConfigError, OperatorConfig};
pub use operator::{
    parse_controls, Operator, OperatorError, OperatorIdentity, RefreshReport, RefreshRequest,
};
