//! Configuration types
//!
//! Chat template formats and sampling parameters consumed by the session.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Chat template convention for structuring role-tagged messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatFormat {
    ChatMl,
    Llama2,
    Mistral,
    OpenChat,
    Simple,
}

impl Default for ChatFormat {
    fn default() -> Self {
        ChatFormat::ChatMl
    }
}

impl std::fmt::Display for ChatFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatFormat::ChatMl => "chatml",
            ChatFormat::Llama2 => "llama2",
            ChatFormat::Mistral => "mistral",
            ChatFormat::OpenChat => "openchat",
            ChatFormat::Simple => "simple",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ChatFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chatml" => Ok(ChatFormat::ChatMl),
            "llama2" => Ok(ChatFormat::Llama2),
            "mistral" => Ok(ChatFormat::Mistral),
            "openchat" => Ok(ChatFormat::OpenChat),
            "simple" => Ok(ChatFormat::Simple),
            _ => Err(()),
        }
    }
}

/// Sampling parameters passed through to the engine on every call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for text generation (0.0 - 1.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Repetition penalty (>= 1.0)
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
        }
    }
}
