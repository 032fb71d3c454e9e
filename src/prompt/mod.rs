//! Prompt assembly
//!
//! Combines a persona system prompt, a current-time note, and as much
//! recent conversation history as fits a token budget into an ordered
//! message sequence for the engine.

use crate::types::message::{Message, Role};

/// Default context budget, leaving room for the generated answer
const DEFAULT_MAX_TOKENS: usize = 4000;

/// Tokens held back from the budget as a safety margin
const DEFAULT_RESERVED_BUFFER: usize = 500;

/// Inputs shorter than this that contain a question mark are treated as
/// simple queries needing little history
const SIMPLE_QUERY_MAX_CHARS: usize = 50;

/// History turns kept for a simple query
const SIMPLE_QUERY_TURNS: usize = 2;

const DEFAULT_PERSONA: &str = "You are a helpful assistant.";

/// Coarse token estimate: roughly 4 characters per token. Deliberately not
/// a real tokenizer; the reserved buffer absorbs the error.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Builds bounded prompts from persona text and conversation history
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    system_prompt: String,
    max_tokens: usize,
    reserved_buffer: usize,
}

impl PromptAssembler {
    /// Create an assembler around a persona text. Blank persona text falls
    /// back to a neutral default.
    pub fn new(persona_text: &str) -> Self {
        Self::with_budget(persona_text, DEFAULT_MAX_TOKENS, DEFAULT_RESERVED_BUFFER)
    }

    pub fn with_budget(persona_text: &str, max_tokens: usize, reserved_buffer: usize) -> Self {
        let persona = persona_text.trim();
        let system_prompt = if persona.is_empty() {
            tracing::warn!("Empty persona text, using neutral default");
            DEFAULT_PERSONA.to_string()
        } else {
            persona.to_string()
        };
        Self {
            system_prompt,
            max_tokens,
            reserved_buffer,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Assemble the full message sequence for one generation call.
    ///
    /// Never fails: any internal assembly error falls back to a minimal
    /// two-message prompt of a generic system message plus the raw input.
    /// The result always starts with one system message and ends with one
    /// user message carrying `user_input`.
    pub fn build(&self, history: &[(String, String)], user_input: &str) -> Vec<Message> {
        match self.assemble(history, user_input) {
            Some(messages) => messages,
            None => {
                tracing::error!("Prompt assembly failed, using minimal fallback");
                vec![
                    Message::new(Role::System, DEFAULT_PERSONA),
                    Message::new(Role::User, user_input),
                ]
            }
        }
    }

    /// Budgeted assembly; `None` signals arithmetic overflow on degenerate
    /// inputs, which `build` turns into the fallback prompt.
    fn assemble(&self, history: &[(String, String)], user_input: &str) -> Option<Vec<Message>> {
        let system_content = format!("{}\n{}", self.system_prompt, time_note());

        // Short questions rarely need deep context.
        let simple_query =
            user_input.chars().count() < SIMPLE_QUERY_MAX_CHARS && user_input.contains('?');
        let history = if simple_query && history.len() > SIMPLE_QUERY_TURNS {
            tracing::info!("Simple query detected, reducing history");
            &history[history.len() - SIMPLE_QUERY_TURNS..]
        } else {
            history
        };

        let system_tokens = estimate_tokens(&system_content);
        let input_tokens = estimate_tokens(user_input);
        let available = self
            .max_tokens
            .saturating_sub(system_tokens)
            .saturating_sub(input_tokens)
            .saturating_sub(self.reserved_buffer);

        // Walk newest to oldest, keeping whole pairs while they fit.
        let mut included: Vec<&(String, String)> = Vec::new();
        let mut used_tokens: usize = 0;
        for pair in history.iter().rev() {
            let pair_tokens =
                estimate_tokens(&pair.0).checked_add(estimate_tokens(&pair.1))?;
            let next_total = used_tokens.checked_add(pair_tokens)?;
            if next_total > available {
                tracing::info!(
                    "History truncated to {} of {} turn(s) by token budget",
                    included.len(),
                    history.len()
                );
                break;
            }
            used_tokens = next_total;
            included.push(pair);
        }

        let mut messages = Vec::with_capacity(included.len() * 2 + 2);
        messages.push(Message::new(Role::System, system_content));
        for (user_msg, assistant_msg) in included.iter().rev() {
            messages.push(Message::new(Role::User, user_msg.clone()));
            messages.push(Message::new(Role::Assistant, assistant_msg.clone()));
        }
        messages.push(Message::new(Role::User, user_input));

        let total: usize = messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        tracing::debug!("Assembled prompt with ~{} estimated token(s)", total);
        Some(messages)
    }
}

/// Human-readable note about the current wall-clock time
fn time_note() -> String {
    let now = chrono::Local::now();
    format!("The current time is {}.", now.format("%H:%M"))
}
