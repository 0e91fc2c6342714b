//! Frame selection: the structural shape of a reply.

use crate::classify::InputKind;
use resonance_core::{DepthBand, DepthStage, DescentGate};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameTag {
    /// Short, steadying reply
    #[serde(rename = "MICRO")]
    Minimal,
    /// No imposed structure
    #[serde(rename = "NONE")]
    Empty,
    #[serde(rename = "S")]
    SelfBand,
    #[serde(rename = "R")]
    Resonance,
    /// Action-oriented (band C)
    #[serde(rename = "C")]
    Action,
    #[serde(rename = "I")]
    Intention,
    #[serde(rename = "T")]
    Transcend,
    #[serde(rename = "F")]
    Form,
}

impl FrameTag {
    pub fn from_band(band: DepthBand) -> Self {
        match band {
            DepthBand::S => FrameTag::SelfBand,
            DepthBand::R => FrameTag::Resonance,
            DepthBand::C => FrameTag::Action,
            DepthBand::I => FrameTag::Intention,
            DepthBand::T => FrameTag::Transcend,
            DepthBand::F => FrameTag::Form,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameTag::Minimal => "MICRO",
            FrameTag::Empty => "NONE",
            FrameTag::SelfBand => "S",
            FrameTag::Resonance => "R",
            FrameTag::Action => "C",
            FrameTag::Intention => "I",
            FrameTag::Transcend => "T",
            FrameTag::Form => "F",
        }
    }

    /// Frames that keep replies short and never push a shift.
    pub fn is_light(self) -> bool {
        matches!(self, FrameTag::Minimal | FrameTag::Empty)
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the frame for this turn. First matching rule wins.
pub fn select_frame(depth: Option<DepthStage>, gate: DescentGate, input: InputKind) -> FrameTag {
    let band = depth.map(|d| d.band());

    if gate.is_open() {
        return if band == Some(DepthBand::S) {
            FrameTag::SelfBand
        } else {
            FrameTag::Minimal
        };
    }

    match input {
        InputKind::Micro => return FrameTag::Minimal,
        InputKind::Greeting => return FrameTag::Empty,
        InputKind::Request | InputKind::Debug => return FrameTag::Action,
        InputKind::Normal => {}
    }

    band.map(FrameTag::from_band).unwrap_or(FrameTag::Empty)
}
