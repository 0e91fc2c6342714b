//! Text generator port.
//!
//! The remote generation service is a black box that returns a string or
//! fails. A turn makes at most one call, bounded by `generate_bounded`.

use async_trait::async_trait;
use regex::Regex;
use resonance_core::{GenerationError, HistoryEntry};
use resonance_expression::{FrameTag, SlotPlan};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;

static RE_EMOTION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*<emotion>.*?</emotion>\s*").unwrap());
static RE_CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?```$").unwrap());

/// Everything the generator gets to see for one turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_text: String,
    /// Already bounded to the configured window
    pub history: Vec<HistoryEntry>,
    pub frame: FrameTag,
    pub slots: SlotPlan,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Run the single generation call of a turn under a timeout.
///
/// Blank output counts as a failure so callers only ever see usable text or
/// an error.
pub async fn generate_bounded(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<String, GenerationError> {
    match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(Ok(raw)) if raw.trim().is_empty() => Err(GenerationError::Empty),
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(timeout)),
    }
}

/// Pull the reply body out of raw model output.
///
/// Drops a leading `<emotion>…</emotion>` tag and unwraps a response that is
/// entirely one fenced code block. Returns `None` if nothing is left.
pub fn extract_reply(raw: &str) -> Option<String> {
    let without_tag = RE_EMOTION_TAG.replace(raw, "");
    let trimmed = without_tag.trim();
    let body = RE_CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str())
        .trim();
    (!body.is_empty()).then(|| body.to_string())
}

// ============================================================================
// Mock generator
// ============================================================================

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    /// Reflect the user's text back, wrapped the way real models answer
    Echo,
    Fail(String),
}

/// Deterministic generator for tests and offline use: no network, no keys.
#[derive(Debug)]
pub struct MockGenerator {
    script: Mutex<VecDeque<MockReply>>,
    default_reply: MockReply,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockGenerator {
    fn with_default(default_reply: MockReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::with_default(MockReply::Echo)
    }

    pub fn with_text(text: &str) -> Self {
        Self::with_default(MockReply::Text(text.to_string()))
    }

    pub fn failing(reason: &str) -> Self {
        Self::with_default(MockReply::Fail(reason.to_string()))
    }

    /// Play `replies` in order, then keep echoing.
    pub fn with_script(replies: Vec<MockReply>) -> Self {
        let mock = Self::echo();
        Self {
            script: Mutex::new(replies.into()),
            ..mock
        }
    }

    /// Sleep before every reply; pairs with a short generation timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Echo => Ok(format!(
                "<emotion>calm</emotion>You said: {}",
                request.user_text.trim()
            )),
            MockReply::Fail(reason) => Err(GenerationError::Upstream(reason)),
        }
    }
}
