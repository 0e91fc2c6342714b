//! Candidate resolution.
//!
//! Several upstream sources may offer text for the same turn. Resolution is
//! two separate cascades:
//! - precedence picks the active text: primary > secondary > tertiary > slot
//!   fallback, first non-blank wins
//! - the fallback chain is consulted only if render finds the active text
//!   unusable: picked > skipped speech > raw model > extracted model > rephrase
//!
//! Independently, an external block list can replace single-string
//! precedence altogether (the forced rebuild).

use resonance_core::{CandidateSource, CandidateText};

const PRECEDENCE: [CandidateSource; 4] = [
    CandidateSource::PrimaryContent,
    CandidateSource::SecondaryText,
    CandidateSource::TertiaryText,
    CandidateSource::SlotPlanFallback,
];

/// Fallback order after the picked text itself.
const FALLBACK_ORDER: [CandidateSource; 4] = [
    CandidateSource::SkippedSpeech,
    CandidateSource::RawModel,
    CandidateSource::ExtractedModel,
    CandidateSource::Rephrase,
];

/// Turn facts the resolver needs beyond the candidates themselves.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub external_blocks: Option<Vec<String>>,
    /// Fixed-format diagnostic turn
    pub is_diagnostic: bool,
    pub is_silence: bool,
    /// Blocks already derived earlier in the turn
    pub existing_blocks: usize,
}

impl ResolveContext {
    /// All four conditions must hold; any single one failing keeps precedence.
    pub fn should_rebuild(&self) -> bool {
        let has_external = self
            .external_blocks
            .as_ref()
            .is_some_and(|blocks| blocks.iter().any(|b| !b.trim().is_empty()));
        has_external && !self.is_diagnostic && !self.is_silence && self.existing_blocks == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub picked: Option<CandidateText>,
    pub fallback: Option<CandidateText>,
    /// Set when the external block list replaced precedence
    pub rebuilt_blocks: Option<Vec<String>>,
    chain: Vec<CandidateText>,
}

impl Resolution {
    /// A resolution with a single primary text and nothing to fall back on.
    pub fn single(text: &str) -> Self {
        let picked = CandidateText::new(CandidateSource::PrimaryContent, text);
        let chain = if picked.is_blank() {
            vec![]
        } else {
            vec![picked.clone()]
        };
        Self {
            fallback: chain.first().cloned(),
            picked: (!picked.is_blank()).then_some(picked),
            rebuilt_blocks: None,
            chain,
        }
    }

    pub fn picked_text(&self) -> Option<&str> {
        self.picked.as_ref().map(|c| c.text.as_str())
    }

    pub fn picked_from(&self) -> Option<CandidateSource> {
        self.picked.as_ref().map(|c| c.source)
    }

    pub fn fallback_text(&self) -> Option<&str> {
        self.fallback.as_ref().map(|c| c.text.as_str())
    }

    pub fn fallback_from(&self) -> Option<CandidateSource> {
        self.fallback.as_ref().map(|c| c.source)
    }

    /// Every non-blank fallback candidate, in cascade order.
    pub fn fallback_chain(&self) -> &[CandidateText] {
        &self.chain
    }

    /// The text render starts from: rebuilt blocks, else the picked text.
    pub fn primary_text(&self) -> String {
        match &self.rebuilt_blocks {
            Some(blocks) => blocks.join("\n\n"),
            None => self.picked_text().unwrap_or_default().to_string(),
        }
    }
}

/// First occurrence of `source`, blank or not. Later duplicates never count.
fn first_of(candidates: &[CandidateText], source: CandidateSource) -> Option<&CandidateText> {
    candidates.iter().find(|c| c.source == source)
}

pub fn resolve(candidates: &[CandidateText], ctx: &ResolveContext) -> Resolution {
    let picked = PRECEDENCE
        .iter()
        .filter_map(|s| first_of(candidates, *s))
        .find(|c| !c.is_blank())
        .cloned();

    let chain: Vec<CandidateText> = picked
        .iter()
        .cloned()
        .chain(
            FALLBACK_ORDER
                .iter()
                .filter_map(|s| first_of(candidates, *s))
                .filter(|c| !c.is_blank())
                .cloned(),
        )
        .collect();

    let rebuilt_blocks = ctx.should_rebuild().then(|| {
        ctx.external_blocks
            .iter()
            .flatten()
            .filter(|b| !b.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
    });

    let resolution = Resolution {
        fallback: chain.first().cloned(),
        picked,
        rebuilt_blocks,
        chain,
    };
    tracing::debug!(
        "Resolved candidates: picked={:?} fallback={:?} rebuilt={}",
        resolution.picked_from(),
        resolution.fallback_from(),
        resolution.rebuilt_blocks.is_some()
    );
    resolution
}
