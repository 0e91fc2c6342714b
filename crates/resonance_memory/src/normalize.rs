//! Stored-record normalization.
//!
//! Records written over the years use several spellings for the same field
//! (`depth_stage` / `depthStage` / `depth`, `q_code` / `emotionalCode`, a
//! boolean gate, …). This is the only place that knows about them: each
//! canonical field lists its accepted keys, the first non-null one wins, and
//! anything unparseable is treated as absent rather than failing the read.

use chrono::{DateTime, TimeZone, Utc};
use resonance_core::{
    ContinuityCounters, ConversationState, DepthBand, DepthStage, DescentGate, EmotionalCode,
    Phase, SpinLoop, SpinStep,
};
use serde_json::{Map, Value};
use std::str::FromStr;

const DEPTH_KEYS: &[&str] = &["depth_stage", "depthStage", "depth"];
const CODE_KEYS: &[&str] = &["emotional_code", "emotionalCode", "q_code", "qCode", "q"];
const SELF_ACCEPTANCE_KEYS: &[&str] = &["self_acceptance", "selfAcceptance", "sa"];
const PHASE_KEYS: &[&str] = &["phase"];
const SPIN_LOOP_KEYS: &[&str] = &["spin_loop", "spinLoop"];
const SPIN_STEP_KEYS: &[&str] = &["spin_step", "spinStep"];
const GATE_KEYS: &[&str] = &[
    "descent_gate",
    "descentGate",
    "descent_gate_open",
    "descentGateOpen",
];
const INTENT_LAYER_KEYS: &[&str] = &["intent_layer", "intentLayer"];
const ANCHOR_KEYS: &[&str] = &[
    "intent_anchor_key",
    "intentAnchorKey",
    "intent_anchor",
    "intentAnchor",
];
const SUMMARY_KEYS: &[&str] = &["situation_summary", "situationSummary", "summary"];
const TOPIC_KEYS: &[&str] = &["situation_topic", "situationTopic", "topic"];
const LAST_REPLY_KEYS: &[&str] = &["last_good_reply", "lastGoodReply", "last_reply"];
const UPDATED_AT_KEYS: &[&str] = &["updated_at", "updatedAt"];
const CONTINUITY_KEYS: &[&str] = &["continuity"];
const TURN_COUNT_KEYS: &[&str] = &["turn_count", "turnCount", "turns"];
const STREAK_KEYS: &[&str] = &["same_topic_streak", "sameTopicStreak"];
const GATE_HOLD_KEYS: &[&str] = &["gate_hold_turns", "gateHoldTurns"];

/// Map any historical record shape onto the canonical state.
///
/// Non-object records yield the first-turn default.
pub fn normalize_record(record: &Value) -> ConversationState {
    let Some(obj) = record.as_object() else {
        tracing::debug!("State record is not an object, using first-turn default");
        return ConversationState::first_turn();
    };

    let mut state = ConversationState {
        depth_stage: parse_label(obj, DEPTH_KEYS),
        emotional_code: parse_label(obj, CODE_KEYS),
        self_acceptance: pick(obj, SELF_ACCEPTANCE_KEYS).and_then(as_f32),
        phase: parse_label::<Phase>(obj, PHASE_KEYS),
        spin_loop: parse_label::<SpinLoop>(obj, SPIN_LOOP_KEYS),
        spin_step: pick(obj, SPIN_STEP_KEYS).and_then(as_spin_step),
        descent_gate: pick(obj, GATE_KEYS).map(as_gate).unwrap_or_default(),
        intent_layer: pick(obj, INTENT_LAYER_KEYS).and_then(as_band),
        intent_anchor_key: pick(obj, ANCHOR_KEYS).and_then(as_anchor),
        continuity: continuity(obj),
        situation_summary: pick(obj, SUMMARY_KEYS).and_then(as_text),
        situation_topic: pick(obj, TOPIC_KEYS).and_then(as_text),
        last_good_reply: pick(obj, LAST_REPLY_KEYS).and_then(as_text),
        updated_at: pick(obj, UPDATED_AT_KEYS).and_then(as_timestamp),
    };
    state.normalize();
    state
}

/// First present, non-null value among `keys`.
fn pick<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn parse_label<T: FromStr>(obj: &Map<String, Value>, keys: &[&str]) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = pick(obj, keys)?.as_str()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("Ignoring unreadable state field {:?}: {}", keys[0], e);
            None
        }
    }
}

fn as_f32(v: &Value) -> Option<f32> {
    match v {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_spin_step(v: &Value) -> Option<SpinStep> {
    as_u32(v)
        .and_then(|n| u8::try_from(n).ok())
        .and_then(SpinStep::new)
}

fn as_gate(v: &Value) -> DescentGate {
    match v {
        Value::Bool(open) => DescentGate::from_legacy_flag(*open),
        Value::String(s) => s.parse().unwrap_or_else(|e| {
            tracing::debug!("Unreadable descent gate, treating as closed: {}", e);
            DescentGate::Closed
        }),
        _ => DescentGate::Closed,
    }
}

fn as_band(v: &Value) -> Option<DepthBand> {
    let s = v.as_str()?.trim();
    // Either a bare band letter or a full stage label
    let mut chars = s.chars();
    let band = DepthBand::from_letter(chars.next()?)?;
    let rest = chars.as_str();
    (rest.is_empty() || DepthStage::from_str(s).is_ok()).then_some(band)
}

fn as_text(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Anchors were once stored as `{ "key": ... }` objects.
fn as_anchor(v: &Value) -> Option<String> {
    match v {
        Value::Object(inner) => pick(inner, &["key", "anchor_key", "anchorKey"]).and_then(as_text),
        other => as_text(other),
    }
}

fn as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Counters live in a nested object now; older records kept them flat.
fn continuity(obj: &Map<String, Value>) -> ContinuityCounters {
    let nested = pick(obj, CONTINUITY_KEYS).and_then(Value::as_object);
    let field = |keys: &[&str]| {
        nested
            .and_then(|n| pick(n, keys))
            .or_else(|| pick(obj, keys))
            .and_then(as_u32)
            .unwrap_or(0)
    };
    ContinuityCounters {
        turn_count: field(TURN_COUNT_KEYS),
        same_topic_streak: field(STREAK_KEYS),
        gate_hold_turns: field(GATE_HOLD_KEYS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_roundtrip() {
        let state = ConversationState {
            depth_stage: Some(DepthStage::I2),
            emotional_code: Some(EmotionalCode::Q3),
            self_acceptance: Some(0.41),
            phase: Some(Phase::Outer),
            spin_loop: Some(SpinLoop::Tcf),
            spin_step: SpinStep::new(1),
            descent_gate: DescentGate::Offered,
            intent_layer: Some(DepthBand::I),
            intent_anchor_key: Some("move-abroad".into()),
            continuity: ContinuityCounters {
                turn_count: 7,
                same_topic_streak: 2,
                gate_hold_turns: 1,
            },
            situation_summary: Some("weighing a move".into()),
            situation_topic: Some("relocation".into()),
            last_good_reply: Some("That sounds like a lot to hold.".into()),
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).single(),
        };
        let record = serde_json::to_value(&state).unwrap();
        assert_eq!(normalize_record(&record), state);
    }

    #[test]
    fn test_camel_case_legacy_record() {
        let record = json!({
            "depthStage": "r3",
            "qCode": "Q4",
            "selfAcceptance": "0.35",
            "spinLoop": "SRI",
            "spinStep": 1,
            "descentGate": true,
            "intentAnchor": { "key": "sister" },
            "situationTopic": "family",
            "turnCount": 12,
            "updatedAt": 1_700_000_000
        });
        let state = normalize_record(&record);
        assert_eq!(state.depth_stage, Some(DepthStage::R3));
        assert_eq!(state.emotional_code, Some(EmotionalCode::Q4));
        assert_eq!(state.self_acceptance, Some(0.35));
        assert_eq!(state.spin_loop, Some(SpinLoop::Sri));
        assert_eq!(state.spin_step, SpinStep::new(1));
        assert_eq!(state.descent_gate, DescentGate::Accepted);
        assert_eq!(state.intent_anchor_key.as_deref(), Some("sister"));
        assert_eq!(state.situation_topic.as_deref(), Some("family"));
        assert_eq!(state.continuity.turn_count, 12);
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn test_first_key_wins_and_nulls_are_skipped() {
        let record = json!({
            "depth_stage": null,
            "depthStage": "C1",
            "depth": "S1"
        });
        assert_eq!(normalize_record(&record).depth_stage, Some(DepthStage::C1));
    }

    #[test]
    fn test_garbage_fields_are_absent() {
        let record = json!({
            "depth_stage": "Z9",
            "emotional_code": 42,
            "spin_step": 7,
            "self_acceptance": "high",
            "descent_gate": "maybe",
            "updated_at": "yesterday"
        });
        let state = normalize_record(&record);
        assert_eq!(state, ConversationState::default());
    }

    #[test]
    fn test_out_of_range_self_acceptance_is_clamped() {
        let state = normalize_record(&json!({ "sa": 1.7 }));
        assert_eq!(state.self_acceptance, Some(1.0));
    }

    #[test]
    fn test_step_without_loop_is_dropped() {
        let state = normalize_record(&json!({ "spin_step": 2 }));
        assert_eq!(state.spin_step, None);
    }

    #[test]
    fn test_intent_layer_from_stage_label() {
        assert_eq!(
            normalize_record(&json!({ "intentLayer": "T2" })).intent_layer,
            Some(DepthBand::T)
        );
        assert_eq!(
            normalize_record(&json!({ "intent_layer": "I" })).intent_layer,
            Some(DepthBand::I)
        );
        assert_eq!(normalize_record(&json!({ "intent_layer": "Sx" })).intent_layer, None);
    }

    #[test]
    fn test_non_object_record() {
        assert_eq!(normalize_record(&json!([1, 2])), ConversationState::first_turn());
    }
}
