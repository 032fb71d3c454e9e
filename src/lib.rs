//! Hearth Library
//!
//! Core runtime for a local conversational assistant: model discovery and
//! metadata caching, session lifecycle around a swappable inference engine,
//! and token-budgeted prompt assembly.

pub mod catalog;
pub mod inference;
pub mod prompt;
pub mod storage;
pub mod system;
pub mod types;
