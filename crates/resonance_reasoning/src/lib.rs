//! # Resonance reasoning
//!
//! Everything between "we know the state" and "here is the reply":
//! the text generator port, candidate resolution, the render pipeline and the
//! `TurnEngine` that runs one turn end to end.

pub mod candidates;
pub mod engine;
pub mod fallback;
pub mod generator;
pub mod render;

pub use candidates::{resolve, ResolveContext, Resolution};
pub use engine::{TurnEngine, TurnOutcome, TurnRequest, TurnSignals};
pub use generator::{
    extract_reply, generate_bounded, GenerationRequest, MockGenerator, MockReply, TextGenerator,
};
pub use render::{
    is_silence_response, RenderContext, RenderOutput, RenderPipeline, ReplyOrigin, TurnShape,
};
