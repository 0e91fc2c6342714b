//! Candidate texts competing to become the reply.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance of a candidate text.
///
/// The first four take part in the precedence cascade, the rest only in the
/// fallback cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Main content from the generation service
    PrimaryContent,
    /// Template slot-filler output
    SecondaryText,
    /// Cached reply
    TertiaryText,
    /// Built locally from the slot plan
    SlotPlanFallback,
    /// Speech that an earlier stage decided to skip
    SkippedSpeech,
    /// Generator output before extraction
    RawModel,
    /// Generator output after extraction
    ExtractedModel,
    /// Rephrased variant of an earlier reply
    Rephrase,
}

impl CandidateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateSource::PrimaryContent => "primary_content",
            CandidateSource::SecondaryText => "secondary_text",
            CandidateSource::TertiaryText => "tertiary_text",
            CandidateSource::SlotPlanFallback => "slot_plan_fallback",
            CandidateSource::SkippedSpeech => "skipped_speech",
            CandidateSource::RawModel => "raw_model",
            CandidateSource::ExtractedModel => "extracted_model",
            CandidateSource::Rephrase => "rephrase",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateText {
    pub source: CandidateSource,
    pub text: String,
}

impl CandidateText {
    pub fn new(source: CandidateSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }

    /// Empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}
