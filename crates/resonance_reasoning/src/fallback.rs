//! Plain-language reply built from a slot plan alone.
//!
//! Used as the slot-plan-derived candidate: when no generated or supplied
//! text is available, each filled slot contributes one short line.

use resonance_expression::{FrameTag, SafetyLevel, SlotKey, SlotPlan};

fn observation(frame: FrameTag) -> &'static str {
    match frame {
        FrameTag::Minimal => "I'm listening.",
        FrameTag::Empty => "I'm here with you.",
        FrameTag::SelfBand => "It sounds like you're being hard on yourself.",
        FrameTag::Resonance => "It sounds like things with them feel complicated.",
        FrameTag::Action => "Let's look at what you need.",
        FrameTag::Intention => "It sounds like something here really matters to you.",
        FrameTag::Transcend => "This feels like part of something bigger.",
        FrameTag::Form => "Something seems to be taking shape.",
    }
}

fn shift(frame: FrameTag) -> &'static str {
    match frame {
        FrameTag::SelfBand => "You don't have to have it all figured out.",
        FrameTag::Resonance => "They may be carrying something too.",
        FrameTag::Intention => "What you want underneath this counts.",
        FrameTag::Transcend => "There may be a wider way to see this.",
        FrameTag::Form => "Some of this can be set down now.",
        _ => "There might be another way to see it.",
    }
}

fn next_step(frame: FrameTag) -> &'static str {
    match frame {
        FrameTag::Action => "What's the first concrete step you could take?",
        FrameTag::SelfBand => "Could you do one kind thing for yourself today?",
        FrameTag::Resonance => "Is there one sentence you'd want to say to them?",
        FrameTag::Intention => "What do you most want from this?",
        FrameTag::Form => "How could you make it concrete?",
        _ => "What would be one small next step?",
    }
}

fn safety(level: Option<SafetyLevel>) -> &'static str {
    match level {
        Some(SafetyLevel::Accepted) => "I'm staying right here with you.",
        Some(SafetyLevel::Offered) => "We can slow down whenever you like.",
        Some(SafetyLevel::Soft) | None => "We can keep this light.",
    }
}

/// One line per filled slot, in plan order.
pub fn build_from_slots(plan: &SlotPlan) -> String {
    plan.iter()
        .filter(|(_, directive)| directive.is_some())
        .map(|(key, _)| match key {
            SlotKey::Obs => observation(plan.frame),
            SlotKey::Shift => shift(plan.frame),
            SlotKey::Next => next_step(plan.frame),
            SlotKey::Safe => safety(plan.safety),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
