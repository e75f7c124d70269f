//! ComfyUI REST client library.
//!
//! Provides typed parsing of the history and queue endpoints and an HTTP
//! API wrapper implementing the core [`Transport`](comfybox_core::lifecycle::Transport)
//! seam for ComfyUI image-generation servers.

pub mod api;
pub mod messages;
