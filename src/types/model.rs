//! Model types
//!
//! Defines model metadata structures produced by the catalog scan.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Information about a model artifact found on disk.
///
/// Descriptors are created fresh on every catalog scan and never mutated;
/// the next scan supersedes them wholesale. The path is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// 1-based position in the sorted scan result
    pub index: usize,
    /// Filename stem, without path or extension
    pub name: String,
    /// Path to the GGUF file
    pub path: PathBuf,
    /// Maximum context window in tokens, if known
    pub context_length: Option<u32>,
    /// Quantization code (e.g. Q4_K_M), if known
    pub quantization: Option<String>,
    /// Model architecture (e.g. llama, mistral), if known
    pub architecture: Option<String>,
}
