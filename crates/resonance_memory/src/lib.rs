//! Per-user state persistence.
//!
//! The store only reads and writes; it makes no decisions. Every record read
//! goes through [`normalize::normalize_record`], so downstream code sees one
//! canonical `ConversationState` regardless of how older writers spelled it.

pub mod normalize;
pub mod sqlite;
pub mod store;

pub use normalize::normalize_record;
pub use sqlite::SqliteStateStore;
pub use store::{InMemoryStateStore, StateStore};
