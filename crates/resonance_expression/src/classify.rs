//! Best-effort input classification.
//!
//! Callers with their own classifier pass its result straight to the frame
//! selector; this one exists so a turn always has *some* classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Normal,
    /// A very short utterance ("ok", "yeah", "うん")
    Micro,
    Greeting,
    /// An explicit ask for something to be done
    Request,
    /// Operator-facing diagnostic request
    Debug,
}

impl InputKind {
    pub fn wants_action(self) -> bool {
        matches!(self, InputKind::Request | InputKind::Debug)
    }
}

static RE_DEBUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*[/#!](debug|diag|status)\b").unwrap());
static RE_GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|good\s+(morning|afternoon|evening)|おはよう|こんにちは|こんばんは|你好|早上好)[\s!！。.~〜]*$").unwrap()
});
static RE_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(please|can\s+you|could\s+you|would\s+you|help\s+me|tell\s+me|show\s+me|explain|write|make|list|summari[sz]e)\b|(してください|して下さい|教えて|お願い|帮我|请)").unwrap()
});

/// Inputs at or under this many characters (after trimming) count as micro.
const MICRO_MAX_CHARS: usize = 6;

pub fn classify_input(text: &str) -> InputKind {
    let trimmed = text.trim();
    if RE_DEBUG.is_match(trimmed) {
        return InputKind::Debug;
    }
    if RE_GREETING.is_match(trimmed) {
        return InputKind::Greeting;
    }
    if RE_REQUEST.is_match(trimmed) {
        return InputKind::Request;
    }
    if trimmed.chars().count() <= MICRO_MAX_CHARS {
        return InputKind::Micro;
    }
    InputKind::Normal
}
