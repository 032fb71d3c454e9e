//! LLM inference
//!
//! This module wraps the opaque inference engine behind a loading seam and
//! manages the session lifecycle, response caching and streaming.

pub mod cache;
pub mod engine;
pub mod session;
pub mod streaming;
