//! Job state presentation for the host UI.
//!
//! The UI shows the lifecycle as a colored swatch with a label. These
//! values are what it renders; nothing here feeds back into the lifecycle.

use serde::Serialize;

use crate::lifecycle::JobState;

/// RGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Color(pub [f32; 3]);

impl Color {
    pub const RED: Color = Color([1.0, 0.0, 0.0]);
    pub const GREEN: Color = Color([0.0, 1.0, 0.0]);
    pub const BLUE: Color = Color([0.0, 0.0, 1.0]);
    pub const YELLOW: Color = Color([1.0, 1.0, 0.0]);
    pub const GRAY: Color = Color([0.14, 0.14, 0.14]);
}

/// Label and swatch color for one job state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusDisplay {
    pub label: &'static str,
    pub color: Color,
}

/// Map a job state to what the UI shows.
pub fn status_display(state: JobState) -> StatusDisplay {
    let (label, color) = match state {
        JobState::Idle => ("Idle", Color::GRAY),
        JobState::Queued => ("Waiting", Color::YELLOW),
        JobState::Executing => ("Executing", Color::BLUE),
        JobState::Completed => ("Processed", Color::GREEN),
        JobState::Failed => ("Failed", Color::RED),
        JobState::Interrupted => ("Interrupted", Color::GRAY),
    };
    StatusDisplay { label, color }
}
