//! History persistence
//!
//! The store mirrors the conversation into one JSON record:
//!
//! ```json
//! {
//!   "settings": { "mode": "Casual Assistant", "temp": 1.0 },
//!   "chat_history": [ { "role": "user", "parts": [ { "text": "Hi" } ] } ]
//! }
//! ```
//!
//! Loading never fails: a missing or unreadable record yields the fallback state.

use crate::ai::gemini::Content;
use crate::error::{ConfigError, PersistenceError};
use crate::persona::Persona;
use crate::state::{clamp_temperature, ConversationState, Phase};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub mode: String,
    pub temp: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub settings: Settings,
    #[serde(default)]
    pub chat_history: Vec<Content>,
}

impl HistoryRecord {
    pub fn from_state(state: &ConversationState) -> Self {
        Self {
            settings: Settings {
                mode: state.persona.as_str().to_string(),
                temp: state.temperature,
            },
            chat_history: state.turns.iter().map(Content::from).collect(),
        }
    }

    /// Rebuild an idle conversation. Unknown modes map to the default persona.
    pub fn into_state(self) -> ConversationState {
        ConversationState {
            turns: self.chat_history.into_iter().map(Into::into).collect(),
            persona: Persona::lookup(&self.settings.mode),
            temperature: clamp_temperature(self.settings.temp),
            phase: Phase::Idle,
        }
    }
}

pub trait ConversationStore {
    fn load(&self) -> ConversationState;

    /// Overwrite the whole record
    fn save(&self, state: &ConversationState) -> Result<(), PersistenceError>;

    /// Backing file, if there is one
    fn location(&self) -> Option<&Path> {
        None
    }
}

impl<T: ConversationStore + ?Sized> ConversationStore for Box<T> {
    fn load(&self) -> ConversationState {
        (**self).load()
    }

    fn save(&self, state: &ConversationState) -> Result<(), PersistenceError> {
        (**self).save(state)
    }

    fn location(&self) -> Option<&Path> {
        (**self).location()
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    fallback: ConversationState,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: ConversationState::default(),
        }
    }

    /// State returned when there is no usable record on disk
    pub fn with_fallback(mut self, fallback: ConversationState) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(data_dir.join("gemchat").join("chat_history.json"))
    }

    /// `Ok(None)` when the file does not exist
    pub fn try_load(&self) -> Result<Option<ConversationState>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: HistoryRecord = serde_json::from_str(&content)?;
        Ok(Some(record.into_state()))
    }
}

impl ConversationStore for JsonFileStore {
    fn load(&self) -> ConversationState {
        match self.try_load() {
            Ok(Some(state)) => {
                tracing::info!(
                    path = %self.path.display(),
                    turns = state.turns.len(),
                    persona = state.persona.as_str(),
                    "restored chat history"
                );
                state
            }
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "no saved history");
                self.fallback.clone()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable history: {}", e);
                self.fallback.clone()
            }
        }
    }

    fn save(&self, state: &ConversationState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&HistoryRecord::from_state(state))?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[derive(Default)]
struct MemoryInner {
    record: Option<String>,
    writes: usize,
    failing: bool,
}

/// In-process store. Clones share the same record, so a caller can keep a handle
/// after moving one into a controller.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of successful saves
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn record(&self) -> Option<HistoryRecord> {
        let inner = self.lock();
        inner
            .record
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Make subsequent saves fail
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

impl ConversationStore for MemoryStore {
    fn load(&self) -> ConversationState {
        self.record()
            .map(HistoryRecord::into_state)
            .unwrap_or_default()
    }

    fn save(&self, state: &ConversationState) -> Result<(), PersistenceError> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(io::Error::new(io::ErrorKind::Other, "store unavailable").into());
        }
        inner.record = Some(serde_json::to_string(&HistoryRecord::from_state(state))?);
        inner.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatMessage;
    use tempfile::TempDir;

    fn sample_state() -> ConversationState {
        let mut state = ConversationState::new(Persona::CodeReviewer, 0.7);
        state.turns.push(ChatMessage::user("Review this: fn main() {}"));
        state.turns.push(ChatMessage::assistant("Looks **fine**.\nShip it."));
        state
    }

    #[test]
    fn test_missing_file_returns_fallback() {
        let dir = TempDir::new().unwrap();
        let fallback = ConversationState::new(Persona::EnglishTeacher, 0.3);
        let store = JsonFileStore::new(dir.path().join("nope.json")).with_fallback(fallback.clone());

        assert!(store.try_load().unwrap().is_none());
        assert_eq!(store.load(), fallback);
    }

    #[test]
    fn test_corrupt_file_returns_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.try_load(), Err(PersistenceError::Json(_))));
        assert_eq!(store.load(), ConversationState::default());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("history.json"));
        let state = sample_state();

        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_round_trip_empty_history() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("history.json"));
        let state = ConversationState::new(Persona::ProfessionalInterviewer, 2.0);

        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_record_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        JsonFileStore::new(&path).save(&sample_state()).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["settings"]["mode"], "Code Reviewer");
        assert!((raw["settings"]["temp"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(raw["chat_history"][0]["role"], "user");
        assert_eq!(raw["chat_history"][1]["role"], "model");
        assert_eq!(raw["chat_history"][1]["parts"][0]["text"], "Looks **fine**.\nShip it.");
    }

    #[test]
    fn test_save_overwrites_whole_record() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("history.json"));
        store.save(&sample_state()).unwrap();

        let cleared = ConversationState::new(Persona::CodeReviewer, 0.7);
        store.save(&cleared).unwrap();
        assert!(store.load().turns.is_empty());
    }

    #[test]
    fn test_load_accepts_hand_written_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(
            &path,
            r#"{"settings":{"mode":"Unknown Mode","temp":5.0},
                "chat_history":[{"role":"user","parts":[{"text":"Hi"}]},
                                {"role":"assistant","parts":[{"text":"Hel"},{"text":"lo"}]}]}"#,
        )
        .unwrap();

        let state = JsonFileStore::new(&path).load();
        assert_eq!(state.persona, Persona::CasualAssistant);
        assert_eq!(state.temperature, 2.0);
        assert_eq!(
            state.turns,
            vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello")]
        );
        assert!(state.is_idle());
    }

    #[test]
    fn test_memory_store_counts_writes_and_fails_on_demand() {
        let store = MemoryStore::new();
        assert_eq!(store.load(), ConversationState::default());

        store.save(&sample_state()).unwrap();
        assert_eq!(store.writes(), 1);
        assert_eq!(store.load(), sample_state());

        store.set_failing(true);
        assert!(store.save(&ConversationState::default()).is_err());
        assert_eq!(store.writes(), 1);
        assert_eq!(store.load(), sample_state());
    }
}
