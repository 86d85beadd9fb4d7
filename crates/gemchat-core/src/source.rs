//! Response sources
//!
//! A source turns a generation request into a lazy, finite stream of text fragments.
//! The mock source replays a fixed template one character at a time so the UI can
//! exercise its streaming path offline; the live source forwards to Gemini.

use crate::ai::gemini::{Content, GeminiClient, GenerateChunk, GenerateOptions, DEFAULT_MODEL};
use crate::error::UpstreamError;
use crate::persona::Persona;
use crate::state::ChatMessage;
use futures_util::future;
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::time::Duration;

/// Ordered, finite, non-restartable sequence of reply fragments
pub type FragmentStream = BoxStream<'static, Result<String, UpstreamError>>;

/// Everything a source needs to produce one reply
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// The user text that opened this turn
    pub prompt: String,
    /// Full conversation, ending with the user message for this turn
    pub history: Vec<ChatMessage>,
    pub persona: Persona,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn instructions(&self) -> &'static str {
        self.persona.instructions()
    }
}

pub trait ResponseSource: Send + Sync {
    fn produce(&self, request: &GenerationRequest) -> FragmentStream;

    /// Short label used in logs and status lines
    fn label(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct MockSource {
    delay: Duration,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between fragments, to make the streaming visible in a UI
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    /// Canned reply for a persona label. Unknown labels get a generic echo.
    pub fn template(prompt: &str, mode: &str) -> String {
        match Persona::from_str(mode) {
            Some(Persona::ProfessionalInterviewer) => format!(
                "That's an insightful answer about {}. How would you scale this?",
                prompt
            ),
            Some(Persona::EnglishTeacher) => format!(
                "Interesting! You used '{}'. Let's check the grammar.",
                prompt
            ),
            Some(Persona::CodeReviewer) => format!(
                "I see the logic in '{}'. Any thoughts on Big O notation?",
                prompt
            ),
            Some(Persona::CasualAssistant) => {
                format!("Sure, I can help with '{}'. What else?", prompt)
            }
            None => format!("Mocking response for: {}", prompt),
        }
    }
}

impl ResponseSource for MockSource {
    fn produce(&self, request: &GenerationRequest) -> FragmentStream {
        let text = Self::template(&request.prompt, request.persona.as_str());
        let fragments: Vec<String> = text.chars().map(String::from).collect();
        let delay = self.delay;

        if delay.is_zero() {
            stream::iter(fragments.into_iter().map(Ok::<_, UpstreamError>)).boxed()
        } else {
            stream::iter(fragments)
                .then(move |fragment| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, UpstreamError>(fragment)
                })
                .boxed()
        }
    }

    fn label(&self) -> &'static str {
        "mock"
    }
}

#[derive(Clone)]
pub struct LiveModelSource {
    client: GeminiClient,
    model: String,
}

impl LiveModelSource {
    pub fn new(client: GeminiClient, model: Option<&str>) -> Self {
        Self {
            client,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ResponseSource for LiveModelSource {
    fn produce(&self, request: &GenerationRequest) -> FragmentStream {
        let client = self.client.clone();
        let model = self.model.clone();
        let contents = contents_for(&request.history);
        let options = GenerateOptions {
            instructions: request.instructions().to_string(),
            temperature: request.temperature,
        };

        // The HTTP call starts on first poll, not here
        let start = async move { client.stream_generate(&model, &contents, &options).await };
        fragments_from_chunks(stream::once(start).try_flatten())
    }

    fn label(&self) -> &'static str {
        "gemini"
    }
}

/// Gemini rejects empty text parts, so messages without text are left out
fn contents_for(history: &[ChatMessage]) -> Vec<Content> {
    history
        .iter()
        .filter(|message| !message.text.is_empty())
        .map(Content::from)
        .collect()
}

/// Keep the non-empty text of each chunk, in order. A stream that ends without
/// any text fails with `EmptyReply`.
fn fragments_from_chunks<S>(chunks: S) -> FragmentStream
where
    S: Stream<Item = Result<GenerateChunk, UpstreamError>> + Send + 'static,
{
    let fragments = chunks
        .try_filter_map(|chunk| future::ready(Ok(chunk.text().filter(|t| !t.is_empty()))))
        .boxed();

    stream::unfold(Some((fragments, false)), |state| async move {
        let Some((mut fragments, produced)) = state else {
            return None;
        };
        match fragments.next().await {
            Some(Ok(text)) => Some((Ok(text), Some((fragments, true)))),
            Some(Err(e)) => Some((Err(e), None)),
            None if !produced => Some((Err(UpstreamError::EmptyReply), None)),
            None => None,
        }
    })
    .boxed()
}

/// Accumulates fragments into the assistant reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyDraft {
    text: String,
    fragments: usize,
}

impl ReplyDraft {
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Pull every fragment, calling `on_fragment` as each arrives. On error the partial
/// reply is dropped.
pub async fn drain<F>(
    mut stream: FragmentStream,
    mut on_fragment: F,
) -> Result<String, UpstreamError>
where
    F: FnMut(&str),
{
    let mut draft = ReplyDraft::default();
    while let Some(next) = stream.next().await {
        match next {
            Ok(fragment) => {
                on_fragment(&fragment);
                draft.push(&fragment);
            }
            Err(e) => {
                tracing::warn!(
                    fragments = draft.fragment_count(),
                    "reply stream failed, discarding partial text: {}",
                    e
                );
                return Err(e);
            }
        }
    }
    Ok(draft.into_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str, persona: Persona) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            history: vec![ChatMessage::user(prompt)],
            persona,
            temperature: 1.0,
        }
    }

    fn scripted(items: Vec<Result<&str, &str>>) -> FragmentStream {
        let items: Vec<Result<String, UpstreamError>> = items
            .into_iter()
            .map(|item| match item {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => Err(UpstreamError::Stream(msg.to_string())),
            })
            .collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_drain_concatenates_in_order() {
        let mut seen = Vec::new();
        let text = drain(scripted(vec![Ok("Hel"), Ok("lo"), Ok(" world")]), |f| {
            seen.push(f.to_string())
        })
        .await
        .unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!(seen, vec!["Hel", "lo", " world"]);
    }

    #[tokio::test]
    async fn test_drain_keeps_whitespace_and_repeats() {
        let text = drain(scripted(vec![Ok(" a"), Ok(" a"), Ok("\n")]), |_| {})
            .await
            .unwrap();
        assert_eq!(text, " a a\n");
    }

    #[tokio::test]
    async fn test_drain_fails_after_partial() {
        let mut seen = String::new();
        let result = drain(scripted(vec![Ok("Par"), Err("connection reset")]), |f| {
            seen.push_str(f)
        })
        .await;
        assert!(matches!(result, Err(UpstreamError::Stream(_))));
        assert_eq!(seen, "Par");
    }

    #[test]
    fn test_mock_templates() {
        assert_eq!(
            MockSource::template("Hi", "Casual Assistant"),
            "Sure, I can help with 'Hi'. What else?"
        );
        assert_eq!(
            MockSource::template("caching", "Professional Interviewer"),
            "That's an insightful answer about caching. How would you scale this?"
        );
        assert_eq!(
            MockSource::template("Pirate talk", "Pirate"),
            "Mocking response for: Pirate talk"
        );
    }

    #[tokio::test]
    async fn test_mock_emits_one_char_per_fragment() {
        let source = MockSource::new();
        let fragments: Vec<String> = source
            .produce(&request("foo", Persona::CodeReviewer))
            .try_collect()
            .await
            .unwrap();
        let expected = MockSource::template("foo", "Code Reviewer");
        assert_eq!(fragments.len(), expected.chars().count());
        assert!(fragments.iter().all(|f| f.chars().count() == 1));
        assert_eq!(fragments.concat(), expected);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let source = MockSource::new();
        let req = request("foo", Persona::CodeReviewer);
        let first: Vec<String> = source.produce(&req).try_collect().await.unwrap();
        let second: Vec<String> = source.produce(&req).try_collect().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_mock_with_delay_yields_same_text() {
        let source = MockSource::with_delay(Duration::from_millis(1));
        let text = drain(source.produce(&request("é", Persona::EnglishTeacher)), |_| {})
            .await
            .unwrap();
        assert_eq!(text, "Interesting! You used 'é'. Let's check the grammar.");
    }

    #[tokio::test]
    async fn test_live_fragments_drop_empty_text() {
        let chunks: Vec<Result<GenerateChunk, UpstreamError>> = [
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":""}]}}]}"#,
            r#"{"usageMetadata":{}}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]}}]}"#,
        ]
        .iter()
        .map(|data| Ok(serde_json::from_str(data).unwrap()))
        .collect();

        let fragments: Vec<String> = fragments_from_chunks(stream::iter(chunks))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_live_stream_without_text_is_empty_reply() {
        let chunks: Vec<Result<GenerateChunk, UpstreamError>> = [
            r#"{"candidates":[{"content":{"parts":[{"text":""}]}}]}"#,
            r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{}}"#,
        ]
        .iter()
        .map(|data| Ok(serde_json::from_str(data).unwrap()))
        .collect();

        let result = drain(fragments_from_chunks(stream::iter(chunks)), |_| {}).await;
        assert!(matches!(result, Err(UpstreamError::EmptyReply)));

        let nothing = stream::empty::<Result<GenerateChunk, UpstreamError>>();
        let result = drain(fragments_from_chunks(nothing), |_| {}).await;
        assert!(matches!(result, Err(UpstreamError::EmptyReply)));
    }

    #[tokio::test]
    async fn test_live_stream_error_is_not_followed_by_empty_reply() {
        let chunks = vec![Err(UpstreamError::Blocked("SAFETY".to_string()))];
        let items: Vec<Result<String, UpstreamError>> =
            fragments_from_chunks(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(UpstreamError::Blocked(_))));
    }

    #[test]
    fn test_contents_skip_messages_without_text() {
        let history = vec![
            ChatMessage::user("blocked prompt"),
            ChatMessage::assistant(""),
            ChatMessage::user("next"),
        ];
        let contents = contents_for(&history);
        assert_eq!(contents.len(), 2);
        assert!(contents
            .iter()
            .all(|c| c.parts.iter().all(|p| !p.text.is_empty())));
        assert_eq!(contents[1].parts[0].text, "next");
    }

    #[tokio::test]
    async fn test_live_source_connection_failure() {
        let client = GeminiClient::with_base_url("test-key", "http://127.0.0.1:1");
        let source = LiveModelSource::new(client, None);
        assert_eq!(source.model(), DEFAULT_MODEL);

        let result = drain(source.produce(&request("Hi", Persona::CasualAssistant)), |_| {}).await;
        assert!(matches!(result, Err(UpstreamError::Http(_))));
    }
}
