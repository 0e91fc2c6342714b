//! Turn-end state patches with absent-vs-null semantics.
//!
//! A field that is absent from a patch keeps the stored value; a field that is
//! explicitly `null` clears it. Collapsing the two into `Option` would silently
//! reset state on every partial write, so the distinction is carried all the
//! way to the store.

use crate::state::{
    ContinuityCounters, ConversationState, DepthBand, DepthStage, DescentGate, EmotionalCode,
    Phase, SpinLoop, SpinStep,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tri-state field update.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    /// Not mentioned: keep the prior value
    #[default]
    Absent,
    /// Explicit null: clear the prior value
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    /// Lift a decided value: `Some` sets, `None` leaves the field untouched.
    pub fn set_if(value: Option<T>) -> Self {
        value.map_or(Patch::Absent, Patch::Set)
    }

    /// Apply to a nullable field.
    pub fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Absent => {}
            Patch::Clear => *slot = None,
            Patch::Set(v) => *slot = Some(v),
        }
    }

    /// Apply to a non-nullable field; `Clear` resets it to its default.
    pub fn apply_required(self, slot: &mut T)
    where
        T: Default,
    {
        match self {
            Patch::Absent => {}
            Patch::Clear => *slot = T::default(),
            Patch::Set(v) => *slot = v,
        }
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Absent => Patch::Absent,
            Patch::Clear => Patch::Clear,
            Patch::Set(v) => Patch::Set(v),
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Absent fields are skipped by `skip_serializing_if`; if one slips
            // through on its own it is indistinguishable from null.
            Patch::Absent | Patch::Clear => serializer.serialize_none(),
            Patch::Set(v) => serializer.serialize_some(v),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Only called when the key is present; missing keys use `Default`.
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        })
    }
}

/// The single write a turn makes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub depth_stage: Patch<DepthStage>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub emotional_code: Patch<EmotionalCode>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub self_acceptance: Patch<f32>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub phase: Patch<Phase>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub spin_loop: Patch<SpinLoop>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub spin_step: Patch<SpinStep>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub descent_gate: Patch<DescentGate>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub intent_layer: Patch<DepthBand>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub intent_anchor_key: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub continuity: Patch<ContinuityCounters>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub situation_summary: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub situation_topic: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub last_good_reply: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_absent")]
    pub updated_at: Patch<DateTime<Utc>>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }
}

impl ConversationState {
    /// Merge a patch into this state, field by field.
    pub fn apply_patch(&mut self, patch: StatePatch) {
        patch.depth_stage.apply(&mut self.depth_stage);
        patch.emotional_code.apply(&mut self.emotional_code);
        patch.self_acceptance.apply(&mut self.self_acceptance);
        patch.phase.apply(&mut self.phase);
        patch.spin_loop.apply(&mut self.spin_loop);
        patch.spin_step.apply(&mut self.spin_step);
        patch.descent_gate.apply_required(&mut self.descent_gate);
        patch.intent_layer.apply(&mut self.intent_layer);
        patch.intent_anchor_key.apply(&mut self.intent_anchor_key);
        patch.continuity.apply_required(&mut self.continuity);
        patch.situation_summary.apply(&mut self.situation_summary);
        patch.situation_topic.apply(&mut self.situation_topic);
        patch.last_good_reply.apply(&mut self.last_good_reply);
        patch.updated_at.apply(&mut self.updated_at);
        self.normalize();
    }
}
