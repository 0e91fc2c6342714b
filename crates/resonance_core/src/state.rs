//! Per-user conversation state
//!
//! The state `s` carried between turns is split into:
//! - depth & register: where the conversation sits (`DepthStage`, `EmotionalCode`,
//!   self-acceptance, `Phase`)
//! - rotation: which loop the conversation cycles through (`SpinLoop`, `SpinStep`)
//! - safety: the tri-state `DescentGate`
//! - continuity: counters, intent anchor, situation summary, last good reply
//!
//! Only the canonical shape lives here. Historical spellings of stored records
//! are mapped onto it once, at the store boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guard against NaN and Infinity in state values.
/// If the value is NaN or Inf, replace with the provided fallback.
#[inline]
pub fn sanitize_f32(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        tracing::warn!("NaN/Inf detected in state, resetting to fallback {}", fallback);
        fallback
    }
}

/// Error returned when a textual state label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} label: '{value}'")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseLabelError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Depth
// =============================================================================

/// The six depth bands, in ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DepthBand {
    /// Self
    S,
    /// Resonance
    R,
    /// Create
    C,
    /// Intention
    I,
    /// Transcend
    T,
    /// Form
    F,
}

impl DepthBand {
    pub const ALL: [DepthBand; 6] = [
        DepthBand::S,
        DepthBand::R,
        DepthBand::C,
        DepthBand::I,
        DepthBand::T,
        DepthBand::F,
    ];

    pub fn letter(self) -> char {
        match self {
            DepthBand::S => 'S',
            DepthBand::R => 'R',
            DepthBand::C => 'C',
            DepthBand::I => 'I',
            DepthBand::T => 'T',
            DepthBand::F => 'F',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'S' => Some(DepthBand::S),
            'R' => Some(DepthBand::R),
            'C' => Some(DepthBand::C),
            'I' => Some(DepthBand::I),
            'T' => Some(DepthBand::T),
            'F' => Some(DepthBand::F),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Bands where the conversation is still close to the surface.
    pub fn is_low(self) -> bool {
        matches!(self, DepthBand::S | DepthBand::R)
    }

    pub fn is_high(self) -> bool {
        matches!(self, DepthBand::I | DepthBand::T | DepthBand::F)
    }

    /// The rotation loop this band belongs to.
    pub fn loop_group(self) -> SpinLoop {
        match self {
            DepthBand::S | DepthBand::R | DepthBand::I => SpinLoop::Sri,
            DepthBand::T | DepthBand::C | DepthBand::F => SpinLoop::Tcf,
        }
    }
}

impl fmt::Display for DepthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Depth stage: band × sub-level (1..=3), written `S1` … `F3`.
///
/// Ordering follows (band, level), giving the 18-value ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DepthStage {
    band: DepthBand,
    level: u8,
}

macro_rules! depth_consts {
    ($($name:ident => $band:ident, $level:literal;)*) => {
        $(pub const $name: DepthStage = DepthStage { band: DepthBand::$band, level: $level };)*
    };
}

impl DepthStage {
    depth_consts! {
        S1 => S, 1; S2 => S, 2; S3 => S, 3;
        R1 => R, 1; R2 => R, 2; R3 => R, 3;
        C1 => C, 1; C2 => C, 2; C3 => C, 3;
        I1 => I, 1; I2 => I, 2; I3 => I, 3;
        T1 => T, 1; T2 => T, 2; T3 => T, 3;
        F1 => F, 1; F2 => F, 2; F3 => F, 3;
    }

    pub fn new(band: DepthBand, level: u8) -> Option<Self> {
        (1..=3).contains(&level).then_some(Self { band, level })
    }

    pub fn band(self) -> DepthBand {
        self.band
    }

    pub fn level(self) -> u8 {
        self.level
    }

    /// Position in the 18-value ordering (0..18).
    pub fn ordinal(self) -> u8 {
        self.band.ordinal() * 3 + (self.level - 1)
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        let band = *DepthBand::ALL.get(usize::from(ordinal / 3))?;
        Self::new(band, ordinal % 3 + 1)
    }

    /// All 18 stages in order.
    pub fn all() -> impl Iterator<Item = DepthStage> {
        (0..18).filter_map(Self::from_ordinal)
    }
}

impl fmt::Display for DepthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.band.letter(), self.level)
    }
}

impl FromStr for DepthStage {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let band = chars.next().and_then(DepthBand::from_letter);
        let level = chars.as_str().parse::<u8>().ok();
        match (band, level) {
            (Some(band), Some(level)) => {
                Self::new(band, level).ok_or_else(|| ParseLabelError::new("depth stage", s))
            }
            _ => Err(ParseLabelError::new("depth stage", s)),
        }
    }
}

impl TryFrom<String> for DepthStage {
    type Error = ParseLabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DepthStage> for String {
    fn from(stage: DepthStage) -> Self {
        stage.to_string()
    }
}

// =============================================================================
// Emotional register
// =============================================================================

/// Dominant emotional register of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionalCode {
    /// Composure / self-restraint
    Q1,
    /// Drive / growth
    Q2,
    /// Unease / anxiety
    Q3,
    /// Fear
    Q4,
    /// Warmth / passion
    Q5,
}

impl EmotionalCode {
    pub const ALL: [EmotionalCode; 5] = [
        EmotionalCode::Q1,
        EmotionalCode::Q2,
        EmotionalCode::Q3,
        EmotionalCode::Q4,
        EmotionalCode::Q5,
    ];

    pub fn is_negative(self) -> bool {
        matches!(self, EmotionalCode::Q3 | EmotionalCode::Q4)
    }

    pub fn is_positive(self) -> bool {
        matches!(self, EmotionalCode::Q2 | EmotionalCode::Q5)
    }

    /// Codes strong enough to pull the rotation back into the inner loop.
    pub fn is_pivot(self) -> bool {
        matches!(self, EmotionalCode::Q3 | EmotionalCode::Q4)
    }
}

impl fmt::Display for EmotionalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for EmotionalCode {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "Q1" => Ok(EmotionalCode::Q1),
            "Q2" => Ok(EmotionalCode::Q2),
            "Q3" => Ok(EmotionalCode::Q3),
            "Q4" => Ok(EmotionalCode::Q4),
            "Q5" => Ok(EmotionalCode::Q5),
            _ => Err(ParseLabelError::new("emotional code", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inner,
    Outer,
}

impl FromStr for Phase {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" | "in" => Ok(Phase::Inner),
            "outer" | "out" => Ok(Phase::Outer),
            _ => Err(ParseLabelError::new("phase", s)),
        }
    }
}

// =============================================================================
// Rotation
// =============================================================================

/// The two rotation regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpinLoop {
    /// Loop A: self → resonance → intention (ascending)
    #[serde(rename = "SRI")]
    Sri,
    /// Loop B: transcend → create → form (descending)
    #[serde(rename = "TCF")]
    Tcf,
}

impl SpinLoop {
    pub fn bands(self) -> [DepthBand; 3] {
        match self {
            SpinLoop::Sri => [DepthBand::S, DepthBand::R, DepthBand::I],
            SpinLoop::Tcf => [DepthBand::T, DepthBand::C, DepthBand::F],
        }
    }

    /// Position of `band` within this loop, if the band belongs to it.
    pub fn step_of(self, band: DepthBand) -> Option<SpinStep> {
        self.bands()
            .iter()
            .position(|b| *b == band)
            .and_then(|i| SpinStep::new(i as u8))
    }

    pub fn is_descending(self) -> bool {
        self == SpinLoop::Tcf
    }
}

impl fmt::Display for SpinLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpinLoop::Sri => write!(f, "SRI"),
            SpinLoop::Tcf => write!(f, "TCF"),
        }
    }
}

impl FromStr for SpinLoop {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SRI" | "A" => Ok(SpinLoop::Sri),
            "TCF" | "B" => Ok(SpinLoop::Tcf),
            _ => Err(ParseLabelError::new("spin loop", s)),
        }
    }
}

/// Step within the active loop, confined to {0, 1, 2}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SpinStep(u8);

impl SpinStep {
    pub const FIRST: SpinStep = SpinStep(0);

    pub fn new(value: u8) -> Option<Self> {
        (value <= 2).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SpinStep {
    type Error = ParseLabelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| ParseLabelError::new("spin step", &value.to_string()))
    }
}

impl From<SpinStep> for u8 {
    fn from(step: SpinStep) -> Self {
        step.0
    }
}

// =============================================================================
// Descent gate
// =============================================================================

/// Tri-state safety gate.
///
/// Older records stored a boolean; that form is accepted on ingestion and
/// never produced again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DescentGate {
    #[default]
    Closed,
    Offered,
    Accepted,
}

impl DescentGate {
    pub fn is_open(self) -> bool {
        self != DescentGate::Closed
    }

    /// Legacy boolean gate: an open flag meant the conversation was already inside.
    pub fn from_legacy_flag(open: bool) -> Self {
        if open {
            DescentGate::Accepted
        } else {
            DescentGate::Closed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DescentGate::Closed => "closed",
            DescentGate::Offered => "offered",
            DescentGate::Accepted => "accepted",
        }
    }
}

impl fmt::Display for DescentGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DescentGate {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" => Ok(DescentGate::Closed),
            "offered" => Ok(DescentGate::Offered),
            "accepted" => Ok(DescentGate::Accepted),
            "true" => Ok(DescentGate::from_legacy_flag(true)),
            "false" => Ok(DescentGate::from_legacy_flag(false)),
            _ => Err(ParseLabelError::new("descent gate", s)),
        }
    }
}

impl<'de> Deserialize<'de> for DescentGate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(open) => Ok(DescentGate::from_legacy_flag(open)),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Target signal from upstream classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Protect,
    Stabilize,
    Expand,
    Pierce,
}

impl TargetKind {
    pub fn is_defensive(self) -> bool {
        matches!(self, TargetKind::Protect | TargetKind::Stabilize)
    }
}

// =============================================================================
// Conversation state
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityCounters {
    /// Completed turns for this user
    pub turn_count: u32,
    /// Consecutive turns on the same situation topic
    pub same_topic_streak: u32,
    /// Consecutive turns the descent gate has been open
    pub gate_hold_turns: u32,
}

/// Complete per-user state, as read at turn start and written at turn end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    pub depth_stage: Option<DepthStage>,
    pub emotional_code: Option<EmotionalCode>,
    /// Self-acceptance (0.0 - 1.0)
    pub self_acceptance: Option<f32>,
    pub phase: Option<Phase>,
    pub spin_loop: Option<SpinLoop>,
    pub spin_step: Option<SpinStep>,
    pub descent_gate: DescentGate,
    pub intent_layer: Option<DepthBand>,
    /// Stable reference point the conversation keeps returning to
    pub intent_anchor_key: Option<String>,
    pub continuity: ContinuityCounters,
    pub situation_summary: Option<String>,
    pub situation_topic: Option<String>,
    /// Most recent non-empty reply delivered to the user
    pub last_good_reply: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// A snapshot with nothing recorded yet.
    pub fn first_turn() -> Self {
        Self::default()
    }

    pub fn is_first_turn(&self) -> bool {
        self.continuity.turn_count == 0 && self.spin_loop.is_none()
    }

    /// Clamp values into range and drop fields that contradict each other.
    pub fn normalize(&mut self) {
        self.self_acceptance = self
            .self_acceptance
            .map(|sa| sanitize_f32(sa, 0.5).clamp(0.0, 1.0));

        // A step only means something relative to a loop.
        if self.spin_loop.is_none() {
            self.spin_step = None;
        }

        for text in [
            &mut self.intent_anchor_key,
            &mut self.situation_summary,
            &mut self.situation_topic,
            &mut self.last_good_reply,
        ] {
            if text.as_deref().is_some_and(|t| t.trim().is_empty()) {
                *text = None;
            }
        }
    }
}
