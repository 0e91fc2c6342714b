//! # Resonance limbic layer
//!
//! Fast, deterministic state regulation run once per turn, before any text
//! is chosen:
//!
//! - **Rotation**: which loop (`SRI` / `TCF`) the conversation cycles through
//!   and where it sits inside it. Loops have inertia and only flip on strong
//!   evidence.
//! - **Descent gate**: whether the conversation is holding, being offered, or
//!   already inside a destabilized stretch. Enter and exit use distinct
//!   thresholds so the gate does not flap from turn to turn.
//!
//! Both are pure functions of their inputs and the previous state.

mod descent;
mod rotation;

pub use descent::{DescentGateEngine, GateDecision};
pub use rotation::{compute_spin_state, RotationEngine, SpinState};
