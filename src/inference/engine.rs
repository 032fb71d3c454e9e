//! Inference engine seam
//!
//! The native engine is an external dependency; the session only needs the
//! narrow surface below. A llama.cpp-backed engine implements `ChatEngine`
//! and is produced by an `EngineLoader` from validated load parameters.

use crate::types::config::ChatFormat;
use crate::types::message::Message;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from engine construction and generation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("insufficient memory to load model")]
    OutOfMemory,
    #[error("engine construction failed: {0}")]
    Construction(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Validated parameters an engine is constructed with
#[derive(Debug, Clone)]
pub struct EngineParams {
    pub path: PathBuf,
    pub gpu_layers: u32,
    pub context_size: u32,
    pub chat_format: ChatFormat,
}

/// One completion call: the assembled prompt plus sampling parameters
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
}

/// Lazy sequence of incremental text fragments from a streaming call.
/// Finite and single-consumption; it borrows the engine that produced it.
pub type FragmentStream<'a> = Box<dyn Iterator<Item = Result<String, EngineError>> + 'a>;

/// A loaded inference engine
pub trait ChatEngine {
    /// Run a blocking completion and return the full generated text
    fn complete(&mut self, request: &CompletionRequest<'_>) -> Result<String, EngineError>;

    /// Run a streaming completion, producing fragments as they arrive
    fn complete_stream<'a>(
        &'a mut self,
        request: &CompletionRequest<'_>,
    ) -> Result<FragmentStream<'a>, EngineError>;

    /// Layers actually offloaded to the GPU, when the engine exposes
    /// introspection. `None` means unknown.
    fn active_gpu_layers(&self) -> Option<u32> {
        None
    }
}

/// Constructs engines from load parameters
pub trait EngineLoader {
    fn load(&self, params: &EngineParams) -> Result<Box<dyn ChatEngine>, EngineError>;
}
