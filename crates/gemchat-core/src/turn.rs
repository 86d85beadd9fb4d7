//! Turn controller
//!
//! Owns the conversation and drives a turn from `Idle` through `AwaitingResponse` and
//! back. Every change to the history, persona or temperature is saved before the
//! method that made it returns; calls that change nothing never touch the store.
//!
//! A reply is produced in two steps so a UI can render fragments as they arrive:
//! [`TurnController::begin_generation`] hands out the fragment stream (once per turn)
//! and [`TurnController::finish_generation`] records the drained result.
//! [`TurnController::generate`] does both in place.

use crate::error::{Rejection, UpstreamError};
use crate::persona::Persona;
use crate::source::{drain, FragmentStream, GenerationRequest, ResponseSource};
use crate::state::{clamp_temperature, ChatMessage, ConversationState, Phase};
use crate::store::ConversationStore;

/// How a turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    /// The assistant reply was appended to the history
    Completed,
    /// The source failed; partial text was discarded and no reply was appended
    Failed(UpstreamError),
}

pub struct TurnController<S: ConversationStore> {
    state: ConversationState,
    store: S,
    mock: Box<dyn ResponseSource>,
    live: Option<Box<dyn ResponseSource>>,
    use_mock: bool,
    in_flight: bool,
    persistence_warning: Option<String>,
}

impl<S: ConversationStore> TurnController<S> {
    /// Restore the last saved conversation from `store`. Without a live source the
    /// controller starts (and stays) in mock mode.
    pub fn new(
        store: S,
        mock: Box<dyn ResponseSource>,
        live: Option<Box<dyn ResponseSource>>,
    ) -> Self {
        let state = store.load();
        let use_mock = live.is_none();
        Self {
            state,
            store,
            mock,
            live,
            use_mock,
            in_flight: false,
            persistence_warning: None,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.state.turns
    }

    pub fn persona(&self) -> Persona {
        self.state.persona
    }

    pub fn temperature(&self) -> f32 {
        self.state.temperature
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn use_mock(&self) -> bool {
        self.use_mock
    }

    pub fn has_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Message from the most recent failed save, cleared by the next good one
    pub fn persistence_warning(&self) -> Option<&str> {
        self.persistence_warning.as_deref()
    }

    pub fn source_label(&self) -> &'static str {
        self.active_source().label()
    }

    fn active_source(&self) -> &dyn ResponseSource {
        match (&self.live, self.use_mock) {
            (Some(live), false) => live.as_ref(),
            _ => self.mock.as_ref(),
        }
    }

    /// `Idle -> AwaitingResponse`. The text is stored exactly as typed.
    pub fn submit(&mut self, text: &str) -> Result<(), Rejection> {
        if !self.state.is_idle() {
            return Err(Rejection::Busy);
        }
        if text.trim().is_empty() {
            return Err(Rejection::EmptyInput);
        }

        self.state.turns.push(ChatMessage::user(text));
        self.state.phase = Phase::AwaitingResponse {
            pending_input: text.to_string(),
        };
        self.persist();
        tracing::debug!(turns = self.state.turns.len(), "turn submitted");
        Ok(())
    }

    /// Fragment stream for the pending turn. Returns `None` when idle or when the
    /// stream for this turn was already handed out.
    pub fn begin_generation(&mut self) -> Option<FragmentStream> {
        if self.in_flight {
            return None;
        }
        let Phase::AwaitingResponse { pending_input } = &self.state.phase else {
            return None;
        };

        let request = GenerationRequest {
            prompt: pending_input.clone(),
            history: self.state.turns.clone(),
            persona: self.state.persona,
            temperature: self.state.temperature,
        };
        let source = self.active_source();
        tracing::info!(
            source = source.label(),
            persona = request.persona.as_str(),
            temperature = request.temperature,
            "generating reply"
        );
        let stream = source.produce(&request);
        self.in_flight = true;
        Some(stream)
    }

    /// `AwaitingResponse -> Idle`. Returns `None` if no turn was pending.
    pub fn finish_generation(
        &mut self,
        result: Result<String, UpstreamError>,
    ) -> Option<TurnOutcome> {
        if self.state.is_idle() {
            tracing::warn!("reply finished with no pending turn, ignoring");
            return None;
        }

        let outcome = match result.and_then(non_empty) {
            Ok(text) => {
                self.state.turns.push(ChatMessage::assistant(text));
                TurnOutcome::Completed
            }
            Err(e) => {
                tracing::error!(source = self.source_label(), "reply failed: {}", e);
                TurnOutcome::Failed(e)
            }
        };

        self.state.phase = Phase::Idle;
        self.in_flight = false;
        self.persist();
        Some(outcome)
    }

    /// Run the pending turn to completion, calling `on_fragment` for every fragment.
    /// No-op returning `None` when there is nothing to generate.
    pub async fn generate<F>(&mut self, on_fragment: F) -> Option<TurnOutcome>
    where
        F: FnMut(&str),
    {
        let stream = self.begin_generation()?;
        let result = drain(stream, on_fragment).await;
        self.finish_generation(result)
    }

    /// Switch persona, starting a new conversation. `Ok(false)` if it was already
    /// selected.
    pub fn select_persona(&mut self, persona: Persona) -> Result<bool, Rejection> {
        if !self.state.is_idle() {
            return Err(Rejection::Busy);
        }
        if persona == self.state.persona {
            return Ok(false);
        }

        tracing::info!(
            from = self.state.persona.as_str(),
            to = persona.as_str(),
            "persona changed, clearing history"
        );
        self.state.turns.clear();
        self.state.persona = persona;
        self.persist();
        Ok(true)
    }

    /// Clear the history, keeping persona and temperature
    pub fn reset(&mut self) -> Result<(), Rejection> {
        if !self.state.is_idle() {
            return Err(Rejection::Busy);
        }
        self.state.turns.clear();
        self.persist();
        Ok(())
    }

    /// Clamped to the supported range. `Ok(false)` if the value did not change.
    pub fn set_temperature(&mut self, temperature: f32) -> Result<bool, Rejection> {
        if !self.state.is_idle() {
            return Err(Rejection::Busy);
        }
        let temperature = clamp_temperature(temperature);
        if temperature == self.state.temperature {
            return Ok(false);
        }
        self.state.temperature = temperature;
        self.persist();
        Ok(true)
    }

    pub fn set_mock(&mut self, use_mock: bool) -> Result<bool, Rejection> {
        if !self.state.is_idle() {
            return Err(Rejection::Busy);
        }
        if !use_mock && self.live.is_none() {
            return Err(Rejection::LiveUnavailable);
        }
        if use_mock == self.use_mock {
            return Ok(false);
        }
        self.use_mock = use_mock;
        tracing::info!(source = self.source_label(), "response source changed");
        Ok(true)
    }

    fn persist(&mut self) {
        match self.store.save(&self.state) {
            Ok(()) => self.persistence_warning = None,
            Err(e) => {
                tracing::warn!("could not save chat history: {}", e);
                self.persistence_warning = Some(e.to_string());
            }
        }
    }
}

/// An assistant message must carry text
fn non_empty(text: String) -> Result<String, UpstreamError> {
    if text.is_empty() {
        Err(UpstreamError::EmptyReply)
    } else {
        Ok(text)
    }
}
