pub mod gemini;

pub use gemini::{Content, ContentRole, GeminiClient, GenerateChunk, GenerateOptions, ModelInfo, Part};
