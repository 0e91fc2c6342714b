//! Diagnostics port.
//!
//! The pipeline stays pure; whatever wants to observe a turn is injected as a
//! `TurnTelemetry` and receives explicit events.

use crate::candidate::CandidateSource;
use crate::state::DescentGate;
use serde::Serialize;
use std::sync::Mutex;

/// Per-turn render diagnostics. For logs only, never shown to users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnDiagnostics {
    pub blocks_count: usize,
    pub picked_from: Option<CandidateSource>,
    pub fallback_from: Option<CandidateSource>,
    pub applied_line_budget: usize,
    pub out_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    TurnRendered {
        user_id: String,
        frame: &'static str,
        gate: DescentGate,
        gate_reason: String,
        diagnostics: TurnDiagnostics,
    },
    GenerationFailed {
        user_id: String,
        reason: String,
    },
    DirectiveLeak {
        user_id: String,
        line: String,
    },
    StoreFailure {
        user_id: String,
        operation: &'static str,
        reason: String,
    },
}

pub trait TurnTelemetry: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Default port: structured `tracing` output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TurnTelemetry for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::TurnRendered {
                user_id,
                frame,
                gate,
                gate_reason,
                diagnostics,
            } => {
                tracing::info!(
                    user_id = %user_id,
                    frame = *frame,
                    gate = %gate,
                    gate_reason = %gate_reason,
                    blocks = diagnostics.blocks_count,
                    picked_from = ?diagnostics.picked_from,
                    fallback_from = ?diagnostics.fallback_from,
                    line_budget = diagnostics.applied_line_budget,
                    out_len = diagnostics.out_len,
                    "Turn rendered"
                );
            }
            TelemetryEvent::GenerationFailed { user_id, reason } => {
                tracing::warn!(user_id = %user_id, "Generation failed, falling back: {}", reason);
            }
            TelemetryEvent::DirectiveLeak { user_id, line } => {
                tracing::warn!(
                    user_id = %user_id,
                    "Directive-shaped line survived stripping: {:?}",
                    line
                );
            }
            TelemetryEvent::StoreFailure {
                user_id,
                operation,
                reason,
            } => {
                tracing::error!(
                    user_id = %user_id,
                    operation = *operation,
                    "State store failure: {}",
                    reason
                );
            }
        }
    }
}

/// Keeps every event in memory. Handy for tests and replay tooling.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TurnTelemetry for RecordingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
