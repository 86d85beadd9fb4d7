//! UI-agnostic conversation state
//!
//! Everything a front-end needs to redraw the chat lives here, so the UI can rebuild its
//! view from scratch after every event.

use crate::persona::Persona;

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// Where the current turn is. The pending input only exists while a reply is owed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingResponse { pending_input: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub turns: Vec<ChatMessage>,
    pub persona: Persona,
    pub temperature: f32,
    pub phase: Phase,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(Persona::default(), DEFAULT_TEMPERATURE)
    }
}

impl ConversationState {
    pub fn new(persona: Persona, temperature: f32) -> Self {
        Self {
            turns: Vec::new(),
            persona,
            temperature: clamp_temperature(temperature),
            phase: Phase::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn pending_input(&self) -> Option<&str> {
        match &self.phase {
            Phase::Idle => None,
            Phase::AwaitingResponse { pending_input } => Some(pending_input),
        }
    }
}

/// Clamp to the supported sampling range. NaN maps to the default.
pub fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        return DEFAULT_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}
