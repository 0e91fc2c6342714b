//! Reply shape: classify the input, choose a frame, lay out its slots.

mod classify;
mod frame;
mod slots;

pub use classify::{classify_input, InputKind};
pub use frame::{select_frame, FrameTag};
pub use slots::{build_slots, SafetyLevel, SlotContext, SlotKey, SlotPlan};
