//! Slot plans: named placeholders a reply is built from.
//!
//! Each frame has a fixed table of observation / shift / next directives.
//! Two rules cut across every frame:
//! - an open descent gate always adds a `SAFE` directive (offered vs accepted)
//! - a closed gate inside the descending loop still adds a softer one
//!
//! Light frames (minimal, empty) never carry `SHIFT`: a short reply that also
//! tries to move the user tends to destabilize rather than help.

use crate::frame::FrameTag;
use resonance_core::{DescentGate, SpinLoop};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Slot keys, in plan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotKey {
    Obs,
    Shift,
    Next,
    Safe,
}

impl SlotKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKey::Obs => "OBS",
            SlotKey::Shift => "SHIFT",
            SlotKey::Next => "NEXT",
            SlotKey::Safe => "SAFE",
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which safety directive variant a plan carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    /// Gate closed, but the conversation is in the descending loop
    Soft,
    Offered,
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotContext {
    pub descent_gate: DescentGate,
    pub spin_loop: Option<SpinLoop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotPlan {
    pub frame: FrameTag,
    pub safety: Option<SafetyLevel>,
    slots: BTreeMap<SlotKey, Option<String>>,
}

impl SlotPlan {
    fn new(frame: FrameTag) -> Self {
        Self {
            frame,
            safety: None,
            slots: BTreeMap::new(),
        }
    }

    fn put(&mut self, key: SlotKey, directive: Option<&str>) {
        self.slots.insert(key, directive.map(str::to_string));
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// The directive for `key`, if the slot exists and is filled.
    pub fn directive(&self, key: SlotKey) -> Option<&str> {
        self.slots.get(&key).and_then(|d| d.as_deref())
    }

    /// Slots in plan order, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, Option<&str>)> {
        self.slots.iter().map(|(k, v)| (*k, v.as_deref()))
    }

    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots.keys().copied().collect()
    }

    pub fn filled_count(&self) -> usize {
        self.slots.values().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

const SAFE_OFFERED: &str = "Check gently whether they want to slow down; do not push deeper.";
const SAFE_ACCEPTED: &str = "Stay with them; short, steady and warm; no new topics.";
const SAFE_SOFT: &str = "Keep the footing light; watch for signs of overwhelm.";

/// Build the slot plan for a frame.
pub fn build_slots(frame: FrameTag, ctx: SlotContext) -> SlotPlan {
    use SlotKey::*;

    let mut plan = SlotPlan::new(frame);
    match frame {
        FrameTag::Minimal => {
            plan.put(Obs, Some("Reflect the one thing they said, in a few words."));
            plan.put(Next, None);
        }
        FrameTag::Empty => {
            plan.put(Obs, Some("Answer plainly, without imposed structure."));
        }
        FrameTag::SelfBand => {
            plan.put(Obs, Some("Name what they feel about themselves, without judging it."));
            plan.put(Shift, Some("Offer one gentler way to see themselves."));
            plan.put(Next, Some("Suggest one small act of self-care."));
        }
        FrameTag::Resonance => {
            plan.put(Obs, Some("Mirror the relationship dynamic they describe."));
            plan.put(Shift, Some("Point to what the other person might be carrying."));
            plan.put(Next, Some("Suggest one sentence they could actually say."));
        }
        FrameTag::Action => {
            plan.put(Obs, Some("Restate the request in one line."));
            plan.put(Shift, None);
            plan.put(Next, Some("Lead with the concrete next step, then the details."));
        }
        FrameTag::Intention => {
            plan.put(Obs, Some("Reflect the intention underneath the question."));
            plan.put(Shift, Some("Reframe around what they actually want."));
            plan.put(Next, Some("Ask one question that sharpens the intention."));
        }
        FrameTag::Transcend => {
            plan.put(Obs, Some("Acknowledge the larger pattern they are touching."));
            plan.put(Shift, Some("Widen the frame beyond the immediate situation."));
            plan.put(Next, None);
        }
        FrameTag::Form => {
            plan.put(Obs, Some("Summarize what has taken shape."));
            plan.put(Shift, Some("Name what can be let go now."));
            plan.put(Next, Some("Propose one way to make it concrete."));
        }
    }

    let safety = match ctx.descent_gate {
        DescentGate::Offered => Some((SafetyLevel::Offered, SAFE_OFFERED)),
        DescentGate::Accepted => Some((SafetyLevel::Accepted, SAFE_ACCEPTED)),
        DescentGate::Closed if ctx.spin_loop.is_some_and(SpinLoop::is_descending) => {
            Some((SafetyLevel::Soft, SAFE_SOFT))
        }
        DescentGate::Closed => None,
    };
    if let Some((level, directive)) = safety {
        plan.safety = Some(level);
        plan.put(Safe, Some(directive));
    }

    tracing::debug!(
        "Slot plan for frame {}: {:?}",
        frame,
        plan.iter().map(|(k, v)| (k.as_str(), v.is_some())).collect::<Vec<_>>()
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_FRAMES: [FrameTag; 8] = [
        FrameTag::Minimal,
        FrameTag::Empty,
        FrameTag::SelfBand,
        FrameTag::Resonance,
        FrameTag::Action,
        FrameTag::Intention,
        FrameTag::Transcend,
        FrameTag::Form,
    ];

    fn ctx(gate: DescentGate, spin_loop: Option<SpinLoop>) -> SlotContext {
        SlotContext {
            descent_gate: gate,
            spin_loop,
        }
    }

    #[test]
    fn test_open_gate_always_sets_safe() {
        for frame in ALL_FRAMES {
            let offered = build_slots(frame, ctx(DescentGate::Offered, Some(SpinLoop::Sri)));
            assert_eq!(offered.safety, Some(SafetyLevel::Offered));
            assert_eq!(offered.directive(SlotKey::Safe), Some(SAFE_OFFERED));

            let accepted = build_slots(frame, ctx(DescentGate::Accepted, None));
            assert_eq!(accepted.safety, Some(SafetyLevel::Accepted));
            assert_eq!(accepted.directive(SlotKey::Safe), Some(SAFE_ACCEPTED));
        }
    }

    #[test]
    fn test_descending_loop_sets_soft_safe() {
        let plan = build_slots(FrameTag::Form, ctx(DescentGate::Closed, Some(SpinLoop::Tcf)));
        assert_eq!(plan.safety, Some(SafetyLevel::Soft));
        assert_eq!(plan.directive(SlotKey::Safe), Some(SAFE_SOFT));

        let plan = build_slots(FrameTag::Form, ctx(DescentGate::Closed, Some(SpinLoop::Sri)));
        assert_eq!(plan.safety, None);
        assert!(!plan.contains(SlotKey::Safe));
    }

    #[test]
    fn test_light_frames_omit_shift() {
        for frame in [FrameTag::Minimal, FrameTag::Empty] {
            let plan = build_slots(frame, ctx(DescentGate::Accepted, Some(SpinLoop::Tcf)));
            assert!(!plan.contains(SlotKey::Shift), "{} must not carry SHIFT", frame);
        }
    }

    #[test]
    fn test_action_favors_next_transcend_favors_shift() {
        let action = build_slots(FrameTag::Action, ctx(DescentGate::Closed, None));
        assert!(action.directive(SlotKey::Next).is_some());
        assert!(action.directive(SlotKey::Shift).is_none());

        let transcend = build_slots(FrameTag::Transcend, ctx(DescentGate::Closed, None));
        assert!(transcend.directive(SlotKey::Shift).is_some());
        assert!(transcend.directive(SlotKey::Next).is_none());
    }

    #[test]
    fn test_plan_order_is_stable() {
        let plan = build_slots(FrameTag::SelfBand, ctx(DescentGate::Offered, None));
        assert_eq!(
            plan.keys(),
            vec![SlotKey::Obs, SlotKey::Shift, SlotKey::Next, SlotKey::Safe]
        );
        assert_eq!(plan.filled_count(), 4);
    }

    #[test]
    fn test_deterministic() {
        for frame in ALL_FRAMES {
            let c = ctx(DescentGate::Closed, Some(SpinLoop::Tcf));
            assert_eq!(build_slots(frame, c), build_slots(frame, c));
        }
    }
}
