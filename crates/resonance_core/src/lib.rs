//! # Resonance core
//!
//! Shared vocabulary for the turn pipeline: the canonical per-user
//! `ConversationState`, the tri-state `StatePatch` written at turn end,
//! candidate texts, configuration, typed errors and the telemetry port.

pub mod candidate;
pub mod config;
pub mod error;
pub mod patch;
pub mod state;
pub mod telemetry;

pub use candidate::{CandidateSource, CandidateText};
pub use config::{
    GateConfig, GenerationConfig, HistoryConfig, RenderConfig, ResonanceConfig, StoreConfig,
};
pub use error::{ConfigError, GenerationError, StoreError};
pub use patch::{Patch, StatePatch};
pub use state::{
    sanitize_f32, ContinuityCounters, ConversationState, DepthBand, DepthStage, DescentGate,
    EmotionalCode, ParseLabelError, Phase, SpinLoop, SpinStep, TargetKind,
};
pub use telemetry::{
    RecordingTelemetry, TelemetryEvent, TracingTelemetry, TurnDiagnostics, TurnTelemetry,
};

use serde::{Deserialize, Serialize};

/// Who said a line in the recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of recent history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Keep only the most recent `max_turns` entries, in order.
pub fn bounded_history(history: &[HistoryEntry], max_turns: usize) -> Vec<HistoryEntry> {
    let start = history.len().saturating_sub(max_turns);
    history[start..].to_vec()
}
