//! Render pipeline.
//!
//! RAW → STRIP_DIRECTIVES → STRIP_LABELS → NORMALIZE_BLOCKS → BUDGET_TRUNCATE → FINAL
//!
//! Guarantees on the final text:
//! - it is never empty (last good reply, then the neutral acknowledgement)
//! - no line is a directive, a silence marker, or carries an internal label
//!   or an `<emotion>` protocol tag
//! - at most `applied_line_budget` non-blank lines
//! - rendering it again yields the same text
//!
//! Every stage iterates to a fixed point, and normalization is re-applied
//! after truncation until both agree, which is what makes render idempotent.

use crate::candidates::Resolution;
use regex::Regex;
use resonance_core::{RenderConfig, TurnDiagnostics};
use serde::Serialize;
use std::sync::LazyLock;

static RE_DIRECTIVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*@(?:OBS|SHIFT|NEXT|SAFE|ACK|RESTORE|Q|TASK|DRAFT|SEED|END|FRAME|SLOT)\b")
        .unwrap()
});
/// Anything shaped like a directive, known tag or not.
static RE_DIRECTIVE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*@[A-Z][A-Z_]+").unwrap());
static RE_DIRECTIVE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:text|message|summary|content|reply)\b["']?\s*[:=]\s*(?:"([^"]*)"|'([^']*)'|([^,}\n]+))"#,
    )
    .unwrap()
});
static RE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[\[[^\]\n]*\]\]|【[^】\n]*】|\[[A-Z][A-Z0-9_]{2,}(?::[^\]\n]*)?\]|(?i:<emotion>[^\n]*?</emotion>)",
    )
    .unwrap()
});
/// Model protocol tag opening the reply; may span lines.
static RE_LEADING_EMOTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*<emotion>.*?</emotion>").unwrap());
static RE_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s+").unwrap());
static RE_SILENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\[\s*silence\s*\]\s*[.。…]*\s*$").unwrap());

const ZERO_WIDTH: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];
const SENTENCE_END: [char; 7] = ['.', '!', '?', '。', '！', '？', '…'];
/// First lines at or under this length may act as a section heading.
const HEADING_MAX_CHARS: usize = 24;
/// Used only if the configured acknowledgement itself sanitizes to nothing.
const DEFAULT_NEUTRAL_ACK: &str = "I'm here.";

/// Detect if a candidate is a silence indicator.
///
/// Handles `[SILENCE]`, `[silence]`, `[ SILENCE ]`, `[SILENCE] ...` and
/// similar. Only matches when the entire trimmed text is the tag.
pub fn is_silence_response(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && RE_SILENCE.is_match(trimmed)
}

/// Turn classification as far as the line budget is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnShape {
    #[default]
    Normal,
    /// Fixed-format, multi-field output
    Diagnostic,
    /// Silence or single-token turn
    Silence,
}

#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub shape: TurnShape,
    pub planned_blocks: usize,
    pub last_good_reply: Option<String>,
}

/// Where the delivered text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOrigin {
    Picked,
    Rebuilt,
    Fallback,
    LastGoodReply,
    NeutralAck,
}

impl ReplyOrigin {
    /// Whether this text is worth remembering as the last good reply.
    pub fn is_fresh(self) -> bool {
        matches!(self, ReplyOrigin::Picked | ReplyOrigin::Rebuilt | ReplyOrigin::Fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    pub text: String,
    pub lines: Vec<String>,
    pub origin: ReplyOrigin,
    /// Directive-shaped lines that got past the known-tag strip
    pub leaks: Vec<String>,
    pub diagnostics: TurnDiagnostics,
}

#[derive(Debug, Clone, Default)]
pub struct RenderPipeline {
    config: RenderConfig,
}

impl RenderPipeline {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Visible-line budget for a turn.
    pub fn line_budget(&self, shape: TurnShape, planned_blocks: usize) -> usize {
        let cfg = &self.config;
        let budget = match shape {
            TurnShape::Diagnostic => cfg.max_visible_lines.max(cfg.diagnostic_min_lines),
            TurnShape::Silence => cfg.max_visible_lines.min(cfg.silence_max_lines),
            TurnShape::Normal if planned_blocks >= cfg.multi_section_min_blocks => {
                cfg.max_visible_lines.max(cfg.multi_section_min_lines)
            }
            TurnShape::Normal => cfg.max_visible_lines,
        };
        budget.max(1)
    }

    /// Render a bare text with no candidate fallbacks.
    pub fn render_text(&self, text: &str, ctx: &RenderContext) -> RenderOutput {
        self.render(&Resolution::single(text), ctx)
    }

    pub fn render(&self, resolution: &Resolution, ctx: &RenderContext) -> RenderOutput {
        let budget = self.line_budget(ctx.shape, ctx.planned_blocks);
        let mut leaks = Vec::new();
        let mut fallback_from = None;

        let rebuilt = resolution.rebuilt_blocks.is_some();
        let mut origin = if rebuilt {
            ReplyOrigin::Rebuilt
        } else {
            ReplyOrigin::Picked
        };
        let mut lines = finish(&resolution.primary_text(), budget, &mut leaks);

        if lines.is_empty() {
            for candidate in resolution.fallback_chain() {
                // The picked text was just rendered, unless blocks replaced it
                if !rebuilt && Some(candidate.source) == resolution.picked_from() {
                    continue;
                }
                let attempt = finish(&candidate.text, budget, &mut leaks);
                if !attempt.is_empty() {
                    tracing::debug!("Primary text unusable, fell back to {}", candidate.source);
                    lines = attempt;
                    origin = ReplyOrigin::Fallback;
                    fallback_from = Some(candidate.source);
                    break;
                }
            }
        }

        if lines.is_empty() {
            (lines, origin) = self.exhausted(ctx, budget, &mut leaks);
        }

        for leak in &leaks {
            tracing::warn!("Rewrote or dropped directive-shaped line: {:?}", leak);
        }

        let text = lines.join("\n");
        let diagnostics = TurnDiagnostics {
            blocks_count: split_blocks(&lines).len(),
            picked_from: resolution.picked_from(),
            fallback_from,
            applied_line_budget: budget,
            out_len: text.chars().count(),
        };
        RenderOutput {
            text,
            lines,
            origin,
            leaks,
            diagnostics,
        }
    }

    /// Every candidate was unusable: last good reply, then the neutral ack.
    fn exhausted(
        &self,
        ctx: &RenderContext,
        budget: usize,
        leaks: &mut Vec<String>,
    ) -> (Vec<String>, ReplyOrigin) {
        if let Some(previous) = ctx.last_good_reply.as_deref() {
            let lines = finish(previous, budget, leaks);
            if !lines.is_empty() {
                return (lines, ReplyOrigin::LastGoodReply);
            }
        }
        let lines = finish(&self.config.neutral_ack, budget, leaks);
        if lines.is_empty() {
            return (vec![DEFAULT_NEUTRAL_ACK.to_string()], ReplyOrigin::NeutralAck);
        }
        (lines, ReplyOrigin::NeutralAck)
    }
}

/// Full pipeline for one text; empty result means unusable.
fn finish(text: &str, budget: usize, leaks: &mut Vec<String>) -> Vec<String> {
    let scrubbed = scrub(text, leaks);
    let mut lines = normalize_blocks(&scrubbed);
    loop {
        let next = normalize_blocks(&truncate_visible(&lines, budget));
        if next == lines {
            return lines;
        }
        lines = next;
    }
}

// ============================================================================
// STRIP_DIRECTIVES + STRIP_LABELS
// ============================================================================

fn scrub(text: &str, leaks: &mut Vec<String>) -> Vec<String> {
    let mut current = text.replace("\r\n", "\n").replace('\r', "\n");
    loop {
        let untagged = replace_until_stable(&RE_LEADING_EMOTION, current.clone());
        let lines: Vec<String> = untagged
            .split('\n')
            .filter_map(|line| scrub_line(line, leaks))
            .collect();
        let next = lines.join("\n");
        if next == current {
            return lines;
        }
        current = next;
    }
}

/// One pass over one line. `None` drops the line.
fn scrub_line(line: &str, leaks: &mut Vec<String>) -> Option<String> {
    // Whole lines only, never partial
    if RE_DIRECTIVE_LINE.is_match(line) || is_silence_response(line) {
        return None;
    }
    if RE_DIRECTIVE_SHAPE.is_match(line) {
        leaks.push(line.to_string());
        return rewrite_directive(line);
    }

    let mut out: String = line.chars().filter(|c| !ZERO_WIDTH.contains(c)).collect();
    out = replace_until_stable(&RE_LABEL, out);
    out = replace_until_stable(&RE_HEADING, out);
    let out = out.trim_end();
    if is_punctuation_only(out) {
        return Some(String::new());
    }
    Some(out.to_string())
}

/// Last-chance rewrite: keep the user-relevant field of an unknown
/// directive as plain text, or drop the line.
fn rewrite_directive(line: &str) -> Option<String> {
    let caps = RE_DIRECTIVE_FIELD.captures(line)?;
    let value = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str()
        .trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn replace_until_stable(re: &Regex, mut text: String) -> String {
    loop {
        let next = re.replace_all(&text, "").into_owned();
        if next == text {
            return text;
        }
        text = next;
    }
}

fn is_punct(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '。' | '、'
                | '，'
                | '！'
                | '？'
                | '…'
                | '・'
                | '：'
                | '；'
                | '「'
                | '」'
                | '『'
                | '』'
                | '（'
                | '）'
                | '【'
                | '】'
                | '〜'
                | '～'
                | '—'
                | '–'
                | '“'
                | '”'
                | '‘'
                | '’'
        )
}

fn is_punctuation_only(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && t.chars().all(|c| c.is_whitespace() || is_punct(c))
}

// ============================================================================
// NORMALIZE_BLOCKS
// ============================================================================

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn split_blocks(lines: &[String]) -> Vec<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in lines {
        if is_blank(line) {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line.clone());
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn join_blocks(blocks: &[Vec<String>]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.extend(block.iter().cloned());
    }
    lines
}

fn is_heading_like(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty()
        && t.chars().count() <= HEADING_MAX_CHARS
        && !t.ends_with(|c: char| SENTENCE_END.contains(&c))
}

/// Adjacent blocks opening with the same short heading become one block.
fn merge_shared_headings(blocks: &mut Vec<Vec<String>>) {
    let mut i = 0;
    while i + 1 < blocks.len() {
        if blocks[i][0] == blocks[i + 1][0] && is_heading_like(&blocks[i][0]) {
            let next = blocks.remove(i + 1);
            blocks[i].extend(next.into_iter().skip(1));
        } else {
            i += 1;
        }
    }
}

/// Blank runs collapse to one separator; identical neighbours collapse to one.
fn normalize_blocks(lines: &[String]) -> Vec<String> {
    let mut blocks = split_blocks(lines);
    loop {
        let before = blocks.len();
        blocks.dedup();
        merge_shared_headings(&mut blocks);
        if blocks.len() == before {
            break;
        }
    }
    join_blocks(&blocks)
}

// ============================================================================
// BUDGET_TRUNCATE
// ============================================================================

fn truncate_visible(lines: &[String], budget: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut visible = 0;
    for line in lines {
        if !is_blank(line) {
            if visible == budget {
                break;
            }
            visible += 1;
        }
        out.push(line.clone());
    }
    while out.last().is_some_and(|l| is_blank(l)) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonance_core::{CandidateSource, CandidateText};

    fn pipeline() -> RenderPipeline {
        RenderPipeline::default()
    }

    fn render(text: &str) -> String {
        pipeline().render_text(text, &RenderContext::default()).text
    }

    #[test]
    fn test_silence_detection() {
        assert!(is_silence_response("[SILENCE]"));
        assert!(is_silence_response("  [ silence ] ..."));
        assert!(is_silence_response("[Silence]。"));
        assert!(!is_silence_response("[SILENCE] but actually hello"));
        assert!(!is_silence_response(""));
    }

    #[test]
    fn test_every_silence_spelling_is_unusable() {
        let ctx = RenderContext {
            last_good_reply: Some("Take your time.".into()),
            ..Default::default()
        };
        let spellings = [
            "[SILENCE]",
            "[silence]",
            "[ SILENCE ]",
            "[Silence]。",
            "  [ silence ] ...",
        ];
        for silence in spellings {
            let out = pipeline().render_text(silence, &ctx);
            assert_eq!(out.text, "Take your time.", "input: {:?}", silence);
            assert_eq!(out.origin, ReplyOrigin::LastGoodReply);
        }
        // A silence line inside a longer reply is dropped on its own
        assert_eq!(render("[silence]\nStill here."), "Still here.");
    }

    #[test]
    fn test_strips_emotion_tag() {
        assert_eq!(render("<emotion>calm</emotion>That makes sense."), "That makes sense.");
        assert_eq!(render("<EMOTION>sad\n</EMOTION>\nOkay."), "Okay.");
        assert_eq!(render("Fine. <emotion>warm</emotion>"), "Fine.");
    }

    #[test]
    fn test_directive_behind_emotion_tag_is_stripped() {
        let out = render("<emotion>calm</emotion>@OBS notice the tension\nThat sounds hard.");
        assert_eq!(out, "That sounds hard.");

        let out = pipeline().render_text(
            "<emotion>calm</emotion>@OBS notice the tension",
            &RenderContext::default(),
        );
        assert_eq!(out.text, "I'm here.");
        assert_eq!(out.origin, ReplyOrigin::NeutralAck);
    }

    #[test]
    fn test_tagged_raw_model_fallback_is_clean() {
        let cands = vec![
            CandidateText::new(CandidateSource::PrimaryContent, "[silence]"),
            CandidateText::new(CandidateSource::RawModel, "<emotion>calm</emotion>[silence]"),
            CandidateText::new(
                CandidateSource::ExtractedModel,
                "<emotion>calm</emotion>\nLet's take a breath.",
            ),
        ];
        let resolution = crate::candidates::resolve(&cands, &Default::default());
        let out = pipeline().render(&resolution, &RenderContext::default());
        assert_eq!(out.text, "Let's take a breath.");
        assert_eq!(out.diagnostics.fallback_from, Some(CandidateSource::ExtractedModel));
    }

    #[test]
    fn test_strips_known_directive_lines() {
        let out =
            render("@OBS notice the tension\nThat sounds hard.\n  @SAFE go slow\n@Q what now?");
        assert_eq!(out, "That sounds hard.");
    }

    #[test]
    fn test_directive_tag_needs_word_boundary() {
        // A capitalized name is not a directive
        assert_eq!(render("@Quinn said hi"), "@Quinn said hi");
    }

    #[test]
    fn test_never_strips_partial_lines() {
        assert_eq!(render("Use @OBS carefully."), "Use @OBS carefully.");
    }

    #[test]
    fn test_strips_labels_and_headings() {
        let out = render(
            "## Thoughts\n[[internal]]Okay, [NOTE: tone soft]let's go.【メモ】\n\u{200B}Fine.",
        );
        assert_eq!(out, "Thoughts\nOkay, let's go.\nFine.");
    }

    #[test]
    fn test_short_bracket_words_survive() {
        assert_eq!(render("[OK] sounds good"), "[OK] sounds good");
    }

    #[test]
    fn test_punctuation_only_lines_vanish() {
        assert_eq!(render("Hello\n...\n---\nBye"), "Hello\n\nBye");
    }

    #[test]
    fn test_dedupes_identical_blocks() {
        assert_eq!(render("Hello world\n\nHello world"), "Hello world");
        assert_eq!(render("A\nB\n\n\n\nA\nB\n\nC"), "A\nB\n\nC");
    }

    #[test]
    fn test_merges_shared_headings() {
        let out = render("Plan\nfirst thing\n\nPlan\nsecond thing");
        assert_eq!(out, "Plan\nfirst thing\nsecond thing");
        // Sentences are not headings
        let out = render("I see.\nfirst\n\nI see.\nsecond");
        assert_eq!(out, "I see.\nfirst\n\nI see.\nsecond");
    }

    #[test]
    fn test_last_chance_rewrite() {
        let out = pipeline().render_text(
            "@REMINDER {\"text\": \"Drink some water.\"}\n@NOTE_TO_SELF be gentle",
            &RenderContext::default(),
        );
        assert_eq!(out.text, "Drink some water.");
        assert_eq!(out.leaks.len(), 2);
    }

    #[test]
    fn test_line_budgets() {
        let p = pipeline();
        assert_eq!(p.line_budget(TurnShape::Normal, 1), 8);
        assert_eq!(p.line_budget(TurnShape::Normal, 3), 28);
        assert_eq!(p.line_budget(TurnShape::Diagnostic, 0), 16);
        assert_eq!(p.line_budget(TurnShape::Silence, 5), 3);

        let wide = RenderPipeline::new(RenderConfig {
            max_visible_lines: 40,
            ..RenderConfig::default()
        });
        assert_eq!(wide.line_budget(TurnShape::Diagnostic, 0), 40);
        assert_eq!(wide.line_budget(TurnShape::Normal, 3), 40);
        assert_eq!(wide.line_budget(TurnShape::Silence, 0), 3);
    }

    #[test]
    fn test_truncates_to_visible_budget() {
        let text: Vec<String> = (1..=12).map(|i| format!("line {}", i)).collect();
        let out = pipeline().render_text(&text.join("\n\n"), &RenderContext::default());
        assert_eq!(out.lines.iter().filter(|l| !l.is_empty()).count(), 8);
        assert_eq!(out.lines.last().map(String::as_str), Some("line 8"));
        assert_eq!(out.diagnostics.applied_line_budget, 8);
        assert_eq!(out.diagnostics.blocks_count, 8);
    }

    #[test]
    fn test_empty_falls_back_to_last_good_then_ack() {
        let ctx = RenderContext {
            last_good_reply: Some("Take your time.".into()),
            ..Default::default()
        };
        let out = pipeline().render_text("[SILENCE]", &ctx);
        assert_eq!(out.text, "Take your time.");
        assert_eq!(out.origin, ReplyOrigin::LastGoodReply);

        let out = pipeline().render_text("", &RenderContext::default());
        assert_eq!(out.text, "I'm here.");
        assert_eq!(out.origin, ReplyOrigin::NeutralAck);
    }

    #[test]
    fn test_unusable_ack_uses_builtin() {
        let p = RenderPipeline::new(RenderConfig {
            neutral_ack: "...".into(),
            ..RenderConfig::default()
        });
        assert_eq!(p.render_text("", &RenderContext::default()).text, DEFAULT_NEUTRAL_ACK);
    }

    #[test]
    fn test_fallback_chain_skips_unusable() {
        let cands = vec![
            CandidateText::new(CandidateSource::PrimaryContent, "[SILENCE]"),
            CandidateText::new(CandidateSource::RawModel, "@OBS only a directive"),
            CandidateText::new(CandidateSource::Rephrase, "Let's pause here."),
        ];
        let resolution = crate::candidates::resolve(&cands, &Default::default());
        let out = pipeline().render(&resolution, &RenderContext::default());
        assert_eq!(out.text, "Let's pause here.");
        assert_eq!(out.origin, ReplyOrigin::Fallback);
        assert_eq!(out.diagnostics.picked_from, Some(CandidateSource::PrimaryContent));
        assert_eq!(out.diagnostics.fallback_from, Some(CandidateSource::Rephrase));
    }

    #[test]
    fn test_render_is_idempotent_on_samples() {
        for sample in [
            "Hello world\n\nHello world",
            "# Plan\n- a\n\n# Plan\n- b",
            "@OBS x\n[[y]]\n\n\n\nz",
            "\u{FEFF}@OBS hidden\nvisible",
            "[[a]b]]\n【x】【y】text",
            "@OBS x\n<emotion>a\n</emotion>hi",
            "<emotion>calm</emotion>[[x]][ silence ]\nok",
        ] {
            let once = render(sample);
            assert_eq!(render(&once), once, "input: {:?}", sample);
        }
    }
}
