//! Descent gate with asymmetric thresholds
//!
//! closed → offered: self-acceptance at or below the enter threshold, a
//! negative emotional code, and either a low depth band or a defensive target.
//!
//! offered/accepted → closed: only when recover fires (positive code with
//! enough self-acceptance, or a high band with more). Until then the gate is
//! held at accepted, so a single calmer turn does not bounce it shut.

use resonance_core::{sanitize_f32, DepthStage, DescentGate, EmotionalCode, GateConfig, TargetKind};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub gate: DescentGate,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DescentGateEngine {
    config: GateConfig,
}

impl DescentGateEngine {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn decide(
        &self,
        emotional_code: Option<EmotionalCode>,
        self_acceptance: Option<f32>,
        depth_stage: Option<DepthStage>,
        target_kind: Option<TargetKind>,
        prev_gate: DescentGate,
    ) -> GateDecision {
        let sa = self_acceptance.map(|v| sanitize_f32(v, 0.5).clamp(0.0, 1.0));

        let decision = match prev_gate {
            DescentGate::Closed => match self.enter_reason(
                emotional_code,
                sa,
                depth_stage,
                target_kind,
            ) {
                Some(why) => GateDecision {
                    gate: DescentGate::Offered,
                    reason: format!("enter: {}", why),
                },
                None => GateDecision {
                    gate: DescentGate::Closed,
                    reason: "closed: enter conditions not met".to_string(),
                },
            },
            DescentGate::Offered | DescentGate::Accepted => {
                match self.recover_reason(emotional_code, sa, depth_stage) {
                    Some(why) => GateDecision {
                        gate: DescentGate::Closed,
                        reason: format!("recover: {}", why),
                    },
                    None => GateDecision {
                        gate: DescentGate::Accepted,
                        reason: format!(
                            "held from {}: self_acceptance {} below recover thresholds",
                            prev_gate,
                            fmt_sa(sa)
                        ),
                    },
                }
            }
        };

        tracing::debug!("Descent gate {} -> {} ({})", prev_gate, decision.gate, decision.reason);
        decision
    }

    fn enter_reason(
        &self,
        code: Option<EmotionalCode>,
        sa: Option<f32>,
        depth: Option<DepthStage>,
        target: Option<TargetKind>,
    ) -> Option<String> {
        let sa = sa.filter(|v| *v <= self.config.enter_max_self_acceptance)?;
        let code = code.filter(|c| c.is_negative())?;
        let context = match (depth, target) {
            (Some(d), _) if d.band().is_low() => format!("low depth {}", d),
            (_, Some(t)) if t.is_defensive() => format!("defensive target {:?}", t),
            _ => return None,
        };
        Some(format!(
            "self_acceptance {:.2} <= {:.2}, negative code {}, {}",
            sa, self.config.enter_max_self_acceptance, code, context
        ))
    }

    fn recover_reason(
        &self,
        code: Option<EmotionalCode>,
        sa: Option<f32>,
        depth: Option<DepthStage>,
    ) -> Option<String> {
        let sa = sa?;
        if sa >= self.config.recover_positive_min {
            if let Some(code) = code.filter(|c| c.is_positive()) {
                return Some(format!(
                    "self_acceptance {:.2} >= {:.2} with positive code {}",
                    sa, self.config.recover_positive_min, code
                ));
            }
        }
        if sa >= self.config.recover_high_depth_min {
            if let Some(d) = depth.filter(|d| d.band().is_high()) {
                return Some(format!(
                    "self_acceptance {:.2} >= {:.2} at high depth {}",
                    sa, self.config.recover_high_depth_min, d
                ));
            }
        }
        None
    }
}

fn fmt_sa(sa: Option<f32>) -> String {
    sa.map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DescentGateEngine {
        DescentGateEngine::default()
    }

    #[test]
    fn test_enter_offers_from_closed() {
        let d = engine().decide(
            Some(EmotionalCode::Q3),
            Some(0.40),
            Some(DepthStage::S2),
            None,
            DescentGate::Closed,
        );
        assert_eq!(d.gate, DescentGate::Offered);
        assert!(d.reason.starts_with("enter"), "reason: {}", d.reason);
    }

    #[test]
    fn test_enter_threshold_is_inclusive() {
        let d = engine().decide(
            Some(EmotionalCode::Q4),
            Some(0.45),
            Some(DepthStage::R1),
            None,
            DescentGate::Closed,
        );
        assert_eq!(d.gate, DescentGate::Offered);
    }

    #[test]
    fn test_enter_needs_low_band_or_defensive_target() {
        let deep = engine().decide(
            Some(EmotionalCode::Q3),
            Some(0.30),
            Some(DepthStage::I1),
            None,
            DescentGate::Closed,
        );
        assert_eq!(deep.gate, DescentGate::Closed);

        let defended = engine().decide(
            Some(EmotionalCode::Q3),
            Some(0.30),
            Some(DepthStage::I1),
            Some(TargetKind::Protect),
            DescentGate::Closed,
        );
        assert_eq!(defended.gate, DescentGate::Offered);

        let expanding = engine().decide(
            Some(EmotionalCode::Q3),
            Some(0.30),
            Some(DepthStage::I1),
            Some(TargetKind::Expand),
            DescentGate::Closed,
        );
        assert_eq!(expanding.gate, DescentGate::Closed);
    }

    #[test]
    fn test_enter_needs_negative_code() {
        let d = engine().decide(
            Some(EmotionalCode::Q1),
            Some(0.10),
            Some(DepthStage::S1),
            None,
            DescentGate::Closed,
        );
        assert_eq!(d.gate, DescentGate::Closed);
    }

    #[test]
    fn test_missing_inputs_never_enter() {
        let d = engine().decide(None, None, None, Some(TargetKind::Protect), DescentGate::Closed);
        assert_eq!(d.gate, DescentGate::Closed);
    }

    #[test]
    fn test_held_below_recover() {
        let d = engine().decide(
            Some(EmotionalCode::Q2),
            Some(0.50),
            Some(DepthStage::S2),
            None,
            DescentGate::Accepted,
        );
        assert_eq!(d.gate, DescentGate::Accepted);
        assert!(d.reason.starts_with("held"), "reason: {}", d.reason);
    }

    #[test]
    fn test_offered_escalates_to_accepted() {
        let d = engine().decide(
            Some(EmotionalCode::Q3),
            Some(0.40),
            Some(DepthStage::S2),
            None,
            DescentGate::Offered,
        );
        assert_eq!(d.gate, DescentGate::Accepted);
    }

    #[test]
    fn test_recover_with_positive_code() {
        let d = engine().decide(
            Some(EmotionalCode::Q5),
            Some(0.58),
            Some(DepthStage::S2),
            None,
            DescentGate::Accepted,
        );
        assert_eq!(d.gate, DescentGate::Closed);
    }

    #[test]
    fn test_recover_from_high_band() {
        let neutral_high = engine().decide(
            Some(EmotionalCode::Q1),
            Some(0.62),
            Some(DepthStage::T2),
            None,
            DescentGate::Offered,
        );
        assert_eq!(neutral_high.gate, DescentGate::Closed);

        // 0.60 clears neither: positive needs a positive code, high needs 0.62
        let between = engine().decide(
            Some(EmotionalCode::Q1),
            Some(0.60),
            Some(DepthStage::T2),
            None,
            DescentGate::Offered,
        );
        assert_eq!(between.gate, DescentGate::Accepted);
    }

    #[test]
    fn test_nan_self_acceptance_is_sanitized() {
        let d = engine().decide(
            Some(EmotionalCode::Q3),
            Some(f32::NAN),
            Some(DepthStage::S1),
            None,
            DescentGate::Closed,
        );
        // NaN falls back to 0.5, above the enter threshold
        assert_eq!(d.gate, DescentGate::Closed);
    }
}
