use crate::error::UpstreamError;
use crate::state::{ChatMessage, ChatRole};
use eventsource_stream::Eventsource;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "models/gemini-flash-latest";

/// Role names used by the Gemini `contents` array (and by the history file)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    #[serde(alias = "assistant")]
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One entry of a Gemini conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl From<&ChatMessage> for Content {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            ChatRole::User => ContentRole::User,
            ChatRole::Assistant => ContentRole::Model,
        };
        Self {
            role,
            parts: vec![Part {
                text: message.text.clone(),
            }],
        }
    }
}

impl From<Content> for ChatMessage {
    fn from(content: Content) -> Self {
        let role = match content.role {
            ContentRole::User => ChatRole::User,
            ContentRole::Model => ChatRole::Assistant,
        };
        let text = content.parts.into_iter().map(|p| p.text).collect();
        Self { role, text }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub instructions: String,
    pub temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    system_instruction: SystemInstruction<'a>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

/// One streamed response object. Its text is optional: safety stops and
/// metadata-only chunks carry none.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl GenerateChunk {
    /// Text of the first candidate, or `None` when it carries no text parts
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let texts: Vec<&str> = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }

    /// Why Gemini refused to answer, if this chunk says so. A finish reason only
    /// counts as a block when the chunk carries no text.
    fn block_reason(&self) -> Option<&str> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Some(reason);
        }
        if self.text().is_some() {
            return None;
        }
        self.candidates
            .first()?
            .finish_reason
            .as_deref()
            .filter(|reason| BLOCKING_FINISH_REASONS.contains(reason))
    }
}

/// Finish reasons that mean the candidate was withheld
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: String,
    pub supports_generation: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Start a streaming generation. Resolves once the response headers arrive;
    /// the returned stream yields one chunk per server-sent event.
    pub async fn stream_generate(
        &self,
        model: &str,
        contents: &[Content],
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<GenerateChunk, UpstreamError>>, UpstreamError> {
        let url = format!(
            "{}/v1beta/{}:streamGenerateContent?alt=sse",
            self.base_url,
            model_path(model)
        );

        let request = GenerateRequest {
            contents,
            system_instruction: SystemInstruction {
                parts: [TextPart {
                    text: &options.instructions,
                }],
            },
            generation_config: GenerationConfig {
                temperature: options.temperature,
            },
        };

        tracing::debug!(model, turns = contents.len(), "starting Gemini stream");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status, "Gemini request rejected");
            return Err(UpstreamError::Status { status, body });
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_chunk(&event.data),
                Err(e) => Err(UpstreamError::Stream(e.to_string())),
            });

        Ok(stream.boxed())
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, UpstreamError> {
        let url = format!("{}/v1beta/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .header("x-goog-api-key", &self.api_key);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(UpstreamError::Status { status, body });
            }

            let page: ModelsResponse = response.json().await?;
            models.extend(page.models.into_iter().map(|m| ModelInfo {
                supports_generation: m
                    .supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent"),
                display_name: m.display_name,
                name: m.name,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(models)
    }
}

/// Accepts both `gemini-flash-latest` and `models/gemini-flash-latest`
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

fn parse_chunk(data: &str) -> Result<GenerateChunk, UpstreamError> {
    let chunk: GenerateChunk = serde_json::from_str(data)?;
    if let Some(error) = &chunk.error {
        return Err(UpstreamError::Stream(error.message.clone()));
    }
    if let Some(reason) = chunk.block_reason() {
        tracing::warn!(reason, "Gemini blocked the reply");
        return Err(UpstreamError::Blocked(reason.to_string()));
    }
    Ok(chunk)
}
