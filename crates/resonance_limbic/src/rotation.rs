//! Rotation loops with inertia
//!
//! Loop A (`SRI`) runs self → resonance → intention; loop B (`TCF`) runs
//! transcend → create → form. A recorded loop is held unless:
//! - A→B: phase turns Inner→Outer while depth sits at the A/B boundary
//! - B→A: phase turns Outer→Inner while the emotional code is a pivot code
//!
//! The step is the depth band's position inside the active loop. When the
//! band is not part of that loop the previous step is kept.

use resonance_core::{DepthStage, EmotionalCode, Phase, SpinLoop, SpinStep};
use serde::Serialize;

/// Result of one rotation update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpinState {
    pub spin_loop: SpinLoop,
    pub spin_step: SpinStep,
    /// Phase carried forward: the current one, else the last known one
    pub phase: Option<Phase>,
    /// Whether the loop changed this turn
    pub flipped: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RotationEngine {
    /// Depth stages close enough to the A/B boundary to allow an A→B flip.
    near_boundary: Vec<DepthStage>,
}

impl Default for RotationEngine {
    fn default() -> Self {
        Self {
            near_boundary: vec![DepthStage::I2, DepthStage::I3, DepthStage::T1],
        }
    }
}

impl RotationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_near_boundary(near_boundary: Vec<DepthStage>) -> Self {
        Self { near_boundary }
    }

    pub fn is_near_boundary(&self, depth: DepthStage) -> bool {
        self.near_boundary.contains(&depth)
    }

    pub fn compute(
        &self,
        depth_stage: Option<DepthStage>,
        emotional_code: Option<EmotionalCode>,
        phase: Option<Phase>,
        last_spin_loop: Option<SpinLoop>,
        last_spin_step: Option<SpinStep>,
        last_phase: Option<Phase>,
    ) -> SpinState {
        let carried_phase = phase.or(last_phase);

        let Some(last_loop) = last_spin_loop else {
            // Genuine first turn: seed from the depth band's group.
            let spin_loop = depth_stage
                .map(|d| d.band().loop_group())
                .unwrap_or(SpinLoop::Sri);
            let spin_step = depth_stage
                .and_then(|d| spin_loop.step_of(d.band()))
                .unwrap_or(SpinStep::FIRST);
            return SpinState {
                spin_loop,
                spin_step,
                phase: carried_phase,
                flipped: false,
                reason: match depth_stage {
                    Some(d) => format!("initial loop {} from depth {}", spin_loop, d),
                    None => format!("initial loop {} (no depth yet)", spin_loop),
                },
            };
        };

        let (spin_loop, reason) =
            self.next_loop(last_loop, depth_stage, emotional_code, phase, last_phase);
        let flipped = spin_loop != last_loop;

        let mapped = depth_stage.and_then(|d| spin_loop.step_of(d.band()));
        let spin_step = match (mapped, last_spin_step) {
            (Some(step), _) => step,
            (None, Some(prev)) => prev,
            (None, None) => {
                tracing::debug!("Recorded loop {} without a step, seeding step 0", last_loop);
                SpinStep::FIRST
            }
        };

        tracing::debug!(
            "Rotation: {} -> {} step {} ({})",
            last_loop,
            spin_loop,
            spin_step.value(),
            reason
        );

        SpinState {
            spin_loop,
            spin_step,
            phase: carried_phase,
            flipped,
            reason,
        }
    }

    fn next_loop(
        &self,
        last_loop: SpinLoop,
        depth_stage: Option<DepthStage>,
        emotional_code: Option<EmotionalCode>,
        phase: Option<Phase>,
        last_phase: Option<Phase>,
    ) -> (SpinLoop, String) {
        match (last_loop, last_phase, phase) {
            (SpinLoop::Sri, Some(Phase::Inner), Some(Phase::Outer)) => match depth_stage {
                Some(d) if self.is_near_boundary(d) => (
                    SpinLoop::Tcf,
                    format!("flip SRI->TCF: inner->outer at boundary depth {}", d),
                ),
                _ => (
                    SpinLoop::Sri,
                    "hold SRI: inner->outer but depth not at boundary".to_string(),
                ),
            },
            (SpinLoop::Tcf, Some(Phase::Outer), Some(Phase::Inner)) => match emotional_code {
                Some(code) if code.is_pivot() => (
                    SpinLoop::Sri,
                    format!("flip TCF->SRI: outer->inner with pivot code {}", code),
                ),
                _ => (
                    SpinLoop::Tcf,
                    "hold TCF: outer->inner without pivot code".to_string(),
                ),
            },
            (held, _, _) => (held, format!("hold {}: no qualifying phase transition", held)),
        }
    }
}

/// Rotation update with the default boundary set.
pub fn compute_spin_state(
    depth_stage: Option<DepthStage>,
    emotional_code: Option<EmotionalCode>,
    phase: Option<Phase>,
    last_spin_loop: Option<SpinLoop>,
    last_spin_step: Option<SpinStep>,
    last_phase: Option<Phase>,
) -> SpinState {
    RotationEngine::default().compute(
        depth_stage,
        emotional_code,
        phase,
        last_spin_loop,
        last_spin_step,
        last_phase,
    )
}
