//! One conversational turn, end to end.
//!
//! The engine reads a state snapshot once, runs the pure pipeline against it
//! (rotation, gate, frame, slots, resolution, render), makes at most one
//! bounded generation call, and writes a single patch at the end. No failure
//! inside a turn reaches the user: store and generation errors are logged,
//! reported through telemetry, and routed around.

use crate::candidates::{resolve, ResolveContext};
use crate::fallback::build_from_slots;
use crate::generator::{extract_reply, generate_bounded, GenerationRequest, TextGenerator};
use crate::render::{is_silence_response, RenderContext, RenderOutput, RenderPipeline, TurnShape};
use chrono::Utc;
use resonance_core::{
    bounded_history, CandidateSource, CandidateText, ContinuityCounters, ConversationState,
    DepthBand, DepthStage, EmotionalCode, HistoryEntry, Patch, Phase, ResonanceConfig, StatePatch,
    TargetKind, TelemetryEvent, TracingTelemetry, TurnDiagnostics, TurnTelemetry,
};
use resonance_expression::{
    build_slots, classify_input, select_frame, FrameTag, InputKind, SlotContext, SlotPlan,
};
use resonance_limbic::{DescentGateEngine, GateDecision, RotationEngine, SpinState};
use resonance_memory::StateStore;
use serde::Serialize;
use std::sync::Arc;

/// Upstream classification for this turn. Anything left `None` falls back
/// to the stored snapshot.
#[derive(Debug, Clone, Default)]
pub struct TurnSignals {
    pub depth_stage: Option<DepthStage>,
    pub emotional_code: Option<EmotionalCode>,
    pub self_acceptance: Option<f32>,
    pub phase: Option<Phase>,
    pub target: Option<TargetKind>,
    /// Passed through to the commit untouched
    pub intent_layer: Patch<DepthBand>,
    pub intent_anchor_key: Patch<String>,
    pub situation_summary: Patch<String>,
    pub situation_topic: Patch<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub user_id: String,
    pub text: String,
    pub history: Vec<HistoryEntry>,
    /// Caller-side classification; classified locally when absent
    pub input_kind: Option<InputKind>,
    pub signals: TurnSignals,
    /// Extra candidates from other generators (secondary, tertiary, rephrase, …)
    pub candidates: Vec<CandidateText>,
    pub external_blocks: Option<Vec<String>>,
    pub existing_blocks: usize,
}

impl TurnRequest {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub text: String,
    pub frame: FrameTag,
    pub input_kind: InputKind,
    pub shape: TurnShape,
    pub spin: SpinState,
    pub gate: GateDecision,
    pub diagnostics: TurnDiagnostics,
    /// State after this turn: as stored, or as it would have been if the
    /// commit failed
    pub state: ConversationState,
    pub committed: bool,
}

pub struct TurnEngine {
    config: ResonanceConfig,
    store: Arc<dyn StateStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    telemetry: Arc<dyn TurnTelemetry>,
    rotation: RotationEngine,
    gate: DescentGateEngine,
    renderer: RenderPipeline,
}

impl TurnEngine {
    pub fn new(config: ResonanceConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            gate: DescentGateEngine::new(config.gate.clone()),
            renderer: RenderPipeline::new(config.render.clone()),
            rotation: RotationEngine::default(),
            generator: None,
            telemetry: Arc::new(TracingTelemetry),
            store,
            config,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TurnTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &ResonanceConfig {
        &self.config
    }

    pub async fn run_turn(&self, request: TurnRequest) -> TurnOutcome {
        let user_id = request.user_id.as_str();
        let snapshot = self.load_snapshot(user_id).await;

        // === Decide ===
        let input_kind = request
            .input_kind
            .unwrap_or_else(|| classify_input(&request.text));
        let signals = &request.signals;
        let depth = signals.depth_stage.or(snapshot.depth_stage);
        let code = signals.emotional_code.or(snapshot.emotional_code);
        let self_acceptance = signals.self_acceptance.or(snapshot.self_acceptance);

        let spin = self.rotation.compute(
            depth,
            code,
            signals.phase,
            snapshot.spin_loop,
            snapshot.spin_step,
            snapshot.phase,
        );
        let gate = self
            .gate
            .decide(code, self_acceptance, depth, signals.target, snapshot.descent_gate);
        let frame = select_frame(depth, gate.gate, input_kind);
        let plan = build_slots(
            frame,
            SlotContext {
                descent_gate: gate.gate,
                spin_loop: Some(spin.spin_loop),
            },
        );
        tracing::debug!(
            "Turn for {}: input={:?} frame={} gate={} ({}) loop={}",
            user_id,
            input_kind,
            frame,
            gate.gate,
            gate.reason,
            spin.spin_loop
        );

        // === Generate ===
        let generated = self.generate(&request, frame, &plan).await;

        // === Resolve & render ===
        let mut candidates = Vec::new();
        if let Some(raw) = &generated {
            if let Some(extracted) = extract_reply(raw) {
                candidates.push(CandidateText::new(CandidateSource::PrimaryContent, &extracted));
                candidates.push(CandidateText::new(CandidateSource::ExtractedModel, extracted));
            }
            candidates.push(CandidateText::new(CandidateSource::RawModel, raw.as_str()));
        }
        candidates.extend(request.candidates.iter().cloned());
        candidates.push(CandidateText::new(
            CandidateSource::SlotPlanFallback,
            build_from_slots(&plan),
        ));

        let generated_silence = generated
            .as_deref()
            .and_then(extract_reply)
            .is_some_and(|t| is_silence_response(&t));
        let shape = match input_kind {
            InputKind::Debug => TurnShape::Diagnostic,
            InputKind::Micro => TurnShape::Silence,
            _ if generated_silence => TurnShape::Silence,
            _ => TurnShape::Normal,
        };

        let external_blocks = if self.config.render.engine_enabled {
            request.external_blocks.clone()
        } else {
            None
        };
        let resolution = resolve(
            &candidates,
            &ResolveContext {
                external_blocks,
                is_diagnostic: shape == TurnShape::Diagnostic,
                is_silence: shape == TurnShape::Silence,
                existing_blocks: request.existing_blocks,
            },
        );
        let planned_blocks = resolution
            .rebuilt_blocks
            .as_ref()
            .map_or(request.existing_blocks, Vec::len);
        let rendered = self.renderer.render(
            &resolution,
            &RenderContext {
                shape,
                planned_blocks,
                last_good_reply: snapshot.last_good_reply.clone(),
            },
        );
        for line in &rendered.leaks {
            self.telemetry.record(&TelemetryEvent::DirectiveLeak {
                user_id: user_id.to_string(),
                line: line.clone(),
            });
        }

        // === Commit ===
        let patch = build_patch(&snapshot, &request.signals, &spin, &gate, &rendered);
        let (state, committed) = self.commit(user_id, &snapshot, patch).await;

        self.telemetry.record(&TelemetryEvent::TurnRendered {
            user_id: user_id.to_string(),
            frame: frame.as_str(),
            gate: gate.gate,
            gate_reason: gate.reason.clone(),
            diagnostics: rendered.diagnostics.clone(),
        });

        TurnOutcome {
            text: rendered.text,
            frame,
            input_kind,
            shape,
            spin,
            gate,
            diagnostics: rendered.diagnostics,
            state,
            committed,
        }
    }

    async fn load_snapshot(&self, user_id: &str) -> ConversationState {
        match self.store.get(user_id).await {
            Ok(Some(state)) => state,
            Ok(None) => ConversationState::first_turn(),
            Err(e) => {
                self.telemetry.record(&TelemetryEvent::StoreFailure {
                    user_id: user_id.to_string(),
                    operation: "get",
                    reason: e.to_string(),
                });
                ConversationState::first_turn()
            }
        }
    }

    /// The single generation call. `None` on any failure, after reporting it.
    async fn generate(
        &self,
        request: &TurnRequest,
        frame: FrameTag,
        plan: &SlotPlan,
    ) -> Option<String> {
        if !self.config.generation.enabled {
            return None;
        }
        let generator = self.generator.as_ref()?;
        let gen_request = GenerationRequest {
            user_text: request.text.clone(),
            history: bounded_history(&request.history, self.config.history.max_turns),
            frame,
            slots: plan.clone(),
        };
        match generate_bounded(generator.as_ref(), &gen_request, self.config.generation.timeout())
            .await
        {
            Ok(raw) => Some(raw),
            Err(e) => {
                self.telemetry.record(&TelemetryEvent::GenerationFailed {
                    user_id: request.user_id.clone(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    /// One upsert, retried `commit_retries` times, then dropped.
    async fn commit(
        &self,
        user_id: &str,
        snapshot: &ConversationState,
        patch: StatePatch,
    ) -> (ConversationState, bool) {
        let attempts = self.config.store.commit_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.store.upsert(user_id, &patch).await {
                Ok(state) => return (state, true),
                Err(e) => {
                    tracing::warn!(
                        "State commit attempt {}/{} failed for {}: {}",
                        attempt,
                        attempts,
                        user_id,
                        e
                    );
                    self.telemetry.record(&TelemetryEvent::StoreFailure {
                        user_id: user_id.to_string(),
                        operation: "upsert",
                        reason: e.to_string(),
                    });
                }
            }
        }
        tracing::error!("Dropping state update for {} after {} attempts", user_id, attempts);
        let mut local = snapshot.clone();
        local.apply_patch(patch);
        (local, false)
    }
}

/// The single write of a turn.
fn build_patch(
    snapshot: &ConversationState,
    signals: &TurnSignals,
    spin: &SpinState,
    gate: &GateDecision,
    rendered: &RenderOutput,
) -> StatePatch {
    let topic_continues = match &signals.situation_topic {
        Patch::Set(topic) => snapshot.situation_topic.as_deref() == Some(topic.as_str()),
        Patch::Clear => false,
        Patch::Absent => snapshot.situation_topic.is_some(),
    };
    let has_topic = match &signals.situation_topic {
        Patch::Set(_) => true,
        Patch::Clear => false,
        Patch::Absent => snapshot.situation_topic.is_some(),
    };
    let prev = snapshot.continuity;
    let continuity = ContinuityCounters {
        turn_count: prev.turn_count.saturating_add(1),
        same_topic_streak: match (has_topic, topic_continues) {
            (false, _) => 0,
            (true, true) => prev.same_topic_streak.saturating_add(1),
            (true, false) => 1,
        },
        gate_hold_turns: if gate.gate.is_open() {
            prev.gate_hold_turns.saturating_add(1)
        } else {
            0
        },
    };

    StatePatch {
        depth_stage: Patch::set_if(signals.depth_stage),
        emotional_code: Patch::set_if(signals.emotional_code),
        self_acceptance: Patch::set_if(signals.self_acceptance),
        phase: Patch::set_if(spin.phase),
        spin_loop: Patch::Set(spin.spin_loop),
        spin_step: Patch::Set(spin.spin_step),
        descent_gate: Patch::Set(gate.gate),
        intent_layer: signals.intent_layer.clone(),
        intent_anchor_key: signals.intent_anchor_key.clone(),
        continuity: Patch::Set(continuity),
        situation_summary: signals.situation_summary.clone(),
        situation_topic: signals.situation_topic.clone(),
        last_good_reply: if rendered.origin.is_fresh() {
            Patch::Set(rendered.text.clone())
        } else {
            Patch::Absent
        },
        updated_at: Patch::Set(Utc::now()),
    }
}
