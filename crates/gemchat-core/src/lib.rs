pub mod ai;
pub mod config;
pub mod error;
pub mod persona;
pub mod source;
pub mod state;
pub mod store;
pub mod turn;

// Re-export main types for convenience
pub use ai::GeminiClient;
pub use config::Config;
pub use error::{ConfigError, PersistenceError, Rejection, UpstreamError};
pub use persona::Persona;
pub use source::{
    drain, FragmentStream, GenerationRequest, LiveModelSource, MockSource, ReplyDraft,
    ResponseSource,
};
pub use state::{ChatMessage, ChatRole, ConversationState, Phase};
pub use store::{ConversationStore, HistoryRecord, JsonFileStore, MemoryStore};
pub use turn::{TurnController, TurnOutcome};
