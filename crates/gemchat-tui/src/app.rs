use std::time::{Duration, Instant};
use futures_util::StreamExt;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use gemchat_core::{
    ConversationStore, FragmentStream, Persona, Rejection, ReplyDraft, TurnController, TurnOutcome,
    UpstreamError,
};
use gemchat_core::state::{MAX_TEMPERATURE, MIN_TEMPERATURE};

pub type Controller = TurnController<Box<dyn ConversationStore>>;

pub const TEMPERATURE_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Settings,
    Chat,
    Input,
}

/// Rows of the settings sidebar, top to bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingRow {
    Persona,
    Temperature,
    Mock,
    Clear,
}

impl SettingRow {
    pub fn all() -> &'static [SettingRow] {
        &[SettingRow::Persona, SettingRow::Temperature, SettingRow::Mock, SettingRow::Clear]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

/// The reply currently streaming into the chat pane
pub struct ActiveReply {
    stream: FragmentStream,
    pub draft: ReplyDraft,
    pub started: Instant,
    pub temperature: f32,
}

/// Caption shown under the last completed reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnTiming {
    pub temperature: f32,
    pub elapsed: Duration,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub controller: Controller,

    // Reply in progress
    pub active: Option<ActiveReply>,
    pub last_turn: Option<TurnTiming>,

    // Input state
    pub query_input: String,
    pub query_cursor: usize, // cursor position in query_input, in chars

    // Chat pane
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub terminal_size: Option<(u16, u16)>,
    pub rescroll_on_draw: bool, // chat sizes are stale until the next render

    // Sidebar
    pub settings_state: ListState,
    pub show_persona_picker: bool,
    pub persona_picker_state: ListState,

    pub status: Option<Status>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Panel areas for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,
    pub settings_area: Option<Rect>,

    // Shown in the header
    pub model: String,
    pub key_source: Option<&'static str>,
}

impl App {
    pub fn new(controller: Controller, model: impl Into<String>, key_source: Option<&'static str>) -> Self {
        let mut settings_state = ListState::default();
        settings_state.select(Some(0));

        let status = controller.persistence_warning().map(|w| Status {
            kind: StatusKind::Error,
            text: format!("History not saved: {}", w),
        });

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Input,
            controller,

            active: None,
            last_turn: None,

            query_input: String::new(),
            query_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            terminal_size: None,
            rescroll_on_draw: false,

            settings_state,
            show_persona_picker: false,
            persona_picker_state: ListState::default(),

            status,

            animation_frame: 0,

            chat_area: None,
            settings_area: None,

            model: model.into(),
            key_source,
        }
    }

    pub fn is_generating(&self) -> bool {
        !self.controller.is_idle()
    }

    pub fn set_info(&mut self, text: impl Into<String>) {
        self.status = Some(Status { kind: StatusKind::Info, text: text.into() });
    }

    pub fn set_error(&mut self, text: impl Into<String>) {
        self.status = Some(Status { kind: StatusKind::Error, text: text.into() });
    }

    fn reject(&mut self, rejection: Rejection) {
        self.set_error(rejection_message(rejection));
    }

    /// Submit the input box. The text stays in the box if the controller refuses it.
    pub fn submit_query(&mut self) {
        let text = self.query_input.clone();
        match self.controller.submit(&text) {
            Ok(()) => {
                self.query_input.clear();
                self.query_cursor = 0;
                self.status = None;
                self.last_turn = None;
                self.start_reply();
                self.scroll_chat_to_bottom();
            }
            Err(Rejection::EmptyInput) => {}
            Err(rejection) => self.reject(rejection),
        }
    }

    /// Pick up the stream for a pending turn, if it has not been taken yet
    pub fn start_reply(&mut self) {
        if self.active.is_some() {
            return;
        }
        if let Some(stream) = self.controller.begin_generation() {
            self.active = Some(ActiveReply {
                stream,
                draft: ReplyDraft::default(),
                started: Instant::now(),
                temperature: self.controller.temperature(),
            });
        }
    }

    /// Feed one item from the reply stream. `None` means the stream ended.
    pub fn on_fragment(&mut self, next: Option<Result<String, UpstreamError>>) {
        match next {
            Some(Ok(fragment)) => {
                if let Some(active) = self.active.as_mut() {
                    active.draft.push(&fragment);
                }
                self.scroll_chat_to_bottom();
            }
            Some(Err(e)) => self.finish_reply(Err(e)),
            None => {
                let text = self
                    .active
                    .as_ref()
                    .map(|a| a.draft.text().to_string())
                    .unwrap_or_default();
                self.finish_reply(Ok(text));
            }
        }
    }

    fn finish_reply(&mut self, result: Result<String, UpstreamError>) {
        let Some(active) = self.active.take() else {
            return;
        };

        match self.controller.finish_generation(result) {
            Some(TurnOutcome::Completed) => {
                self.last_turn = Some(TurnTiming {
                    temperature: active.temperature,
                    elapsed: active.started.elapsed(),
                });
                if let Some(warning) = self.controller.persistence_warning() {
                    let text = format!("History not saved: {}", warning);
                    self.set_error(text);
                }
            }
            Some(TurnOutcome::Failed(e)) => {
                self.set_error(format!("Error: {}", e));
            }
            None => {}
        }
        self.scroll_chat_to_bottom();
    }

    pub fn select_persona(&mut self, persona: Persona) {
        match self.controller.select_persona(persona) {
            Ok(true) => {
                self.last_turn = None;
                self.chat_scroll = 0;
                self.set_info(format!("{} selected, new conversation started", persona.as_str()));
            }
            Ok(false) => {}
            Err(rejection) => self.reject(rejection),
        }
    }

    pub fn cycle_persona(&mut self, forward: bool) {
        let current = self.controller.persona();
        let persona = if forward { current.next() } else { current.prev() };
        self.select_persona(persona);
    }

    pub fn adjust_temperature(&mut self, delta: f32) {
        // Round to the slider step so repeated presses don't drift
        let target = ((self.controller.temperature() + delta) * 10.0).round() / 10.0;
        let target = target.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
        if let Err(rejection) = self.controller.set_temperature(target) {
            self.reject(rejection);
        }
    }

    pub fn toggle_mock(&mut self) {
        let use_mock = !self.controller.use_mock();
        match self.controller.set_mock(use_mock) {
            Ok(true) => self.set_info(format!("Using {} replies", self.controller.source_label())),
            Ok(false) => {}
            Err(rejection) => self.reject(rejection),
        }
    }

    pub fn clear_history(&mut self) {
        match self.controller.reset() {
            Ok(()) => {
                self.last_turn = None;
                self.chat_scroll = 0;
                self.set_info("History cleared");
            }
            Err(rejection) => self.reject(rejection),
        }
    }

    pub fn selected_setting(&self) -> Option<SettingRow> {
        self.settings_state
            .selected()
            .and_then(|i| SettingRow::all().get(i).copied())
    }

    /// Enter on a sidebar row
    pub fn activate_setting(&mut self) {
        match self.selected_setting() {
            Some(SettingRow::Persona) => self.open_persona_picker(),
            Some(SettingRow::Temperature) => self.adjust_temperature(TEMPERATURE_STEP),
            Some(SettingRow::Mock) => self.toggle_mock(),
            Some(SettingRow::Clear) => self.clear_history(),
            None => {}
        }
    }

    /// Left/right on a sidebar row. Only persona and temperature have a direction.
    pub fn adjust_setting(&mut self, forward: bool) {
        match self.selected_setting() {
            Some(SettingRow::Persona) => self.cycle_persona(forward),
            Some(SettingRow::Temperature) => {
                let delta = if forward { TEMPERATURE_STEP } else { -TEMPERATURE_STEP };
                self.adjust_temperature(delta);
            }
            Some(SettingRow::Mock) => self.toggle_mock(),
            Some(SettingRow::Clear) | None => {}
        }
    }

    pub fn settings_nav_down(&mut self) {
        let len = SettingRow::all().len();
        let i = self.settings_state.selected().unwrap_or(0);
        self.settings_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn settings_nav_up(&mut self) {
        let i = self.settings_state.selected().unwrap_or(0);
        self.settings_state.select(Some(i.saturating_sub(1)));
    }

    // Persona picker methods
    pub fn open_persona_picker(&mut self) {
        if self.is_generating() {
            self.reject(Rejection::Busy);
            return;
        }
        let current_idx = Persona::all()
            .iter()
            .position(|p| *p == self.controller.persona())
            .unwrap_or(0);
        self.persona_picker_state.select(Some(current_idx));
        self.show_persona_picker = true;
    }

    pub fn persona_picker_nav_down(&mut self) {
        let len = Persona::all().len();
        let i = self.persona_picker_state.selected().unwrap_or(0);
        self.persona_picker_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn persona_picker_nav_up(&mut self) {
        let i = self.persona_picker_state.selected().unwrap_or(0);
        self.persona_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn confirm_persona_picker(&mut self) {
        if let Some(persona) = self
            .persona_picker_state
            .selected()
            .and_then(|i| Persona::all().get(i).copied())
        {
            self.select_persona(persona);
        }
        self.show_persona_picker = false;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_generating() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        let max_scroll = self.total_chat_lines().saturating_sub(self.visible_chat_height());
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max_scroll);
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    /// The chat pane is re-measured on the next draw, then scrolled to the bottom.
    /// Repeated events for the same size change nothing.
    pub fn on_resize(&mut self, width: u16, height: u16) {
        if self.terminal_size == Some((width, height)) {
            return;
        }
        self.terminal_size = Some((width, height));
        self.chat_area = None;
        self.settings_area = None;
        self.rescroll_on_draw = true;
    }

    /// Scroll chat to bottom so the newest text is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.total_chat_lines();
        let visible_height = self.visible_chat_height();
        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }

    fn visible_chat_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    /// Rendered line count of the chat pane, including the draft and captions
    pub fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in self.controller.turns() {
            total_lines = total_lines.saturating_add(message_lines(&msg.text, wrap_width));
        }

        if let Some(active) = &self.active {
            total_lines = total_lines.saturating_add(message_lines(active.draft.text(), wrap_width));
            total_lines = total_lines.saturating_add(1); // Temperature caption
        } else if self.is_generating() {
            total_lines = total_lines.saturating_add(2); // "AI:" + "Thinking..."
        } else if self.last_turn.is_some() {
            total_lines = total_lines.saturating_add(1);
        }

        total_lines
    }
}

/// Role line, wrapped content, blank separator
fn message_lines(text: &str, wrap_width: usize) -> u16 {
    let mut lines: u16 = 1;
    for line in text.lines() {
        // Use character count, not byte length, for proper UTF-8 handling
        let char_count = line.chars().count();
        if char_count == 0 {
            lines = lines.saturating_add(1);
        } else {
            lines = lines.saturating_add(((char_count / wrap_width) + 1) as u16);
        }
    }
    if text.is_empty() {
        lines = lines.saturating_add(1);
    }
    lines.saturating_add(1)
}

pub fn rejection_message(rejection: Rejection) -> &'static str {
    match rejection {
        Rejection::EmptyInput => "Type a message first",
        Rejection::Busy => "Wait for the current reply to finish",
        Rejection::LiveUnavailable => "No API key configured, only mock replies are available",
    }
}

/// Next item of the active reply stream. Pends forever when nothing is streaming,
/// so it can sit in a `select!` next to terminal events.
pub async fn next_fragment(active: &mut Option<ActiveReply>) -> Option<Result<String, UpstreamError>> {
    match active.as_mut() {
        Some(reply) => reply.stream.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemchat_core::{ChatMessage, ConversationState, MemoryStore, MockSource, ResponseSource};
    use gemchat_core::source::GenerationRequest;
    use futures_util::stream;

    struct FailingSource;

    impl ResponseSource for FailingSource {
        fn produce(&self, _request: &GenerationRequest) -> FragmentStream {
            stream::iter(vec![
                Ok("Par".to_string()),
                Err(UpstreamError::Stream("quota exceeded".to_string())),
            ])
            .boxed()
        }

        fn label(&self) -> &'static str {
            "failing"
        }
    }

    fn mock_app(store: &MemoryStore) -> App {
        let boxed: Box<dyn ConversationStore> = Box::new(store.clone());
        let controller = TurnController::new(boxed, Box::new(MockSource::new()), None);
        App::new(controller, "models/test", None)
    }

    async fn run_reply(app: &mut App) {
        while app.active.is_some() {
            let next = next_fragment(&mut app.active).await;
            app.on_fragment(next);
        }
    }

    #[tokio::test]
    async fn test_submit_streams_reply_into_history() {
        let store = MemoryStore::new();
        let mut app = mock_app(&store);
        app.query_input = "Hi".to_string();
        app.query_cursor = 2;

        app.submit_query();
        assert!(app.query_input.is_empty());
        assert_eq!(app.query_cursor, 0);
        assert!(app.is_generating());
        assert!(app.active.is_some());

        run_reply(&mut app).await;
        assert!(!app.is_generating());
        assert_eq!(
            app.controller.turns(),
            &[
                ChatMessage::user("Hi"),
                ChatMessage::assistant("Sure, I can help with 'Hi'. What else?"),
            ]
        );
        assert_eq!(app.last_turn.map(|t| t.temperature), Some(1.0));
        assert_eq!(store.load().turns.len(), 2);
    }

    #[tokio::test]
    async fn test_settings_disabled_while_generating() {
        let store = MemoryStore::new();
        let mut app = mock_app(&store);
        app.query_input = "Hi".to_string();
        app.submit_query();

        app.adjust_temperature(TEMPERATURE_STEP);
        assert_eq!(app.controller.temperature(), 1.0);
        assert_eq!(
            app.status.as_ref().map(|s| s.text.as_str()),
            Some(rejection_message(Rejection::Busy))
        );

        app.query_input = "again".to_string();
        app.submit_query();
        assert_eq!(app.query_input, "again");

        app.cycle_persona(true);
        assert_eq!(app.controller.persona(), Persona::CasualAssistant);

        run_reply(&mut app).await;
        app.adjust_temperature(TEMPERATURE_STEP);
        assert!((app.controller.temperature() - 1.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failed_reply_shows_error_and_keeps_user_message() {
        let store = MemoryStore::new();
        let boxed: Box<dyn ConversationStore> = Box::new(store.clone());
        let controller = TurnController::new(
            boxed,
            Box::new(MockSource::new()),
            Some(Box::new(FailingSource)),
        );
        let mut app = App::new(controller, "models/test", Some("env"));
        app.query_input = "Hi".to_string();
        app.submit_query();
        run_reply(&mut app).await;

        assert!(!app.is_generating());
        assert_eq!(app.controller.turns(), &[ChatMessage::user("Hi")]);
        let status = app.status.clone().unwrap();
        assert_eq!(status.kind, StatusKind::Error);
        assert!(status.text.contains("quota exceeded"));
        assert!(app.last_turn.is_none());
    }

    #[test]
    fn test_temperature_steps_stay_on_grid() {
        let store = MemoryStore::new();
        let mut app = mock_app(&store);
        for _ in 0..3 {
            app.adjust_temperature(-TEMPERATURE_STEP);
        }
        assert_eq!(app.controller.temperature(), 0.7);
        for _ in 0..30 {
            app.adjust_temperature(TEMPERATURE_STEP);
        }
        assert_eq!(app.controller.temperature(), MAX_TEMPERATURE);
    }

    #[test]
    fn test_mock_toggle_without_key_is_rejected() {
        let store = MemoryStore::new();
        let mut app = mock_app(&store);
        app.toggle_mock();
        assert!(app.controller.use_mock());
        assert_eq!(
            app.status.map(|s| s.text),
            Some(rejection_message(Rejection::LiveUnavailable).to_string())
        );
    }

    #[test]
    fn test_persona_picker_switches_and_clears() {
        let store = MemoryStore::new();
        let mut seeded = ConversationState::default();
        seeded.turns.push(ChatMessage::user("Hi"));
        store.save(&seeded).unwrap();

        let mut app = mock_app(&store);
        assert_eq!(app.controller.turns().len(), 1);
        app.open_persona_picker();
        assert!(app.show_persona_picker);
        assert_eq!(app.persona_picker_state.selected(), Some(0));

        app.persona_picker_nav_down();
        app.persona_picker_nav_down();
        app.confirm_persona_picker();
        assert!(!app.show_persona_picker);
        assert_eq!(app.controller.persona(), Persona::all()[2]);
        assert!(app.controller.turns().is_empty());
        assert!(store.load().turns.is_empty());
    }

    #[test]
    fn test_message_lines_counts_wraps() {
        assert_eq!(message_lines("", 10), 3);
        assert_eq!(message_lines("short", 10), 3);
        assert_eq!(message_lines("exactly twenty chars", 10), 5);
        assert_eq!(message_lines("a\n\nb", 10), 5);
    }
}
