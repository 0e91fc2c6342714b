//! Typed errors at the library seams.
//!
//! None of these ever reach the end user: the turn engine recovers from each
//! one locally and only logs it.

use std::time::Duration;
use thiserror::Error;

/// Failure reading or writing per-user state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    #[error("stored state for '{user_id}' is unreadable: {reason}")]
    Corrupt { user_id: String, reason: String },
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap any backend error as an availability failure, keeping its context chain.
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(format!("{:#}", err))
    }
}

/// Failure of the single remote text-generation call in a turn.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("text generation failed: {0}")]
    Upstream(String),
    #[error("text generation returned no content")]
    Empty,
}

/// Invalid configuration, reported once at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f32 },
    #[error("gate enter threshold {enter} must be below the recover threshold {recover}")]
    InvertedThresholds { enter: f32, recover: f32 },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("render.neutral_ack must not be empty")]
    EmptyNeutralAck,
}
