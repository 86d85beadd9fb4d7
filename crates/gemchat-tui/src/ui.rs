use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use gemchat_core::{ChatRole, ConversationStore, Persona};
use gemchat_core::state::MAX_TEMPERATURE;
use crate::app::{App, FocusPane, InputMode, SettingRow, StatusKind};

const SIDEBAR_WIDTH: u16 = 34;
const SLIDER_CELLS: usize = 10;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
                if found_close {
                    current_text.push_str("**");
                }
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// `[■■■■■□□□□□]` for a temperature in 0..=MAX_TEMPERATURE
fn temperature_slider(temperature: f32) -> String {
    let filled = ((temperature / MAX_TEMPERATURE) * SLIDER_CELLS as f32).round() as usize;
    let filled = filled.min(SLIDER_CELLS);
    format!("[{}{}]", "■".repeat(filled), "□".repeat(SLIDER_CELLS - filled))
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, status, footer
    let [header_area, body_area, status_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(SIDEBAR_WIDTH.min(body_area.width / 2)),
        Constraint::Min(0),
    ])
    .areas(body_area);

    render_sidebar(app, frame, sidebar_area);
    render_chat(app, frame, main_area);
    render_status(app, frame, status_area);
    render_footer(app, frame, footer_area);

    if app.show_persona_picker {
        render_persona_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let source = if app.controller.use_mock() {
        "mock replies".to_string()
    } else {
        format!("gemini {}", app.model)
    };
    let key_indicator = match app.key_source {
        Some(source) => format!(" [key: {}]", source),
        None => " [no API key]".to_string(),
    };

    let title = Line::from(vec![
        Span::styled(" Gemchat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(source, Style::default().fg(Color::White)),
        Span::styled(key_indicator, Style::default().fg(Color::Gray)),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    app.settings_area = Some(area);

    let [settings_area, about_area] = Layout::vertical([
        Constraint::Length(SettingRow::all().len() as u16 + 2),
        Constraint::Min(0),
    ])
    .areas(area);

    let focused = app.focus == FocusPane::Settings;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let generating = app.is_generating();

    // Controls are disabled while a reply is streaming
    let item_style = if generating {
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)
    } else {
        Style::default()
    };

    let temperature = app.controller.temperature();
    let items: Vec<ListItem> = SettingRow::all()
        .iter()
        .map(|row| {
            let text = match row {
                SettingRow::Persona => format!("Persona: {}", app.controller.persona().as_str()),
                SettingRow::Temperature => {
                    format!("Creativity {:.1} {}", temperature, temperature_slider(temperature))
                }
                SettingRow::Mock => {
                    let state = if app.controller.use_mock() { "on" } else { "off" };
                    if app.controller.has_live() {
                        format!("Mock mode: {}", state)
                    } else {
                        format!("Mock mode: {} (no key)", state)
                    }
                }
                SettingRow::Clear => "Clear history".to_string(),
            };
            ListItem::new(text).style(item_style)
        })
        .collect();

    let title = if generating { " Settings (busy) " } else { " Settings " };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(title),
        )
        .highlight_style(if focused {
            Style::default().bg(Color::Blue).fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        })
        .highlight_symbol(if focused { "> " } else { "  " });

    frame.render_stateful_widget(list, settings_area, &mut app.settings_state);

    // Persona instructions and where the history lives
    let mut lines = vec![
        Line::from(Span::styled(
            "Instructions",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(app.controller.persona().instructions()),
        Line::default(),
        Line::from(Span::styled(
            "History",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    ];
    match app.controller.store().location() {
        Some(path) => lines.push(Line::from(path.display().to_string())),
        None => lines.push(Line::from(Span::styled(
            "not saved (--no-persist)",
            Style::default().fg(Color::DarkGray),
        ))),
    }
    lines.push(Line::from(Span::styled(
        format!("{} messages", app.controller.turns().len()),
        Style::default().fg(Color::DarkGray),
    )));

    let about = Paragraph::new(Text::from(lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(" About "),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(about, about_area);
}

fn role_line(role: ChatRole) -> Line<'static> {
    match role {
        ChatRole::User => Line::from(Span::styled(
            "You:",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        ChatRole::Assistant => Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    }
}

fn caption(text: String) -> Line<'static> {
    Line::from(Span::styled(
        text,
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    ))
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store areas for mouse hit-testing
    app.chat_area = Some(chat_area);

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);
    if app.rescroll_on_draw {
        app.rescroll_on_draw = false;
        app.scroll_chat_to_bottom();
    }

    let chat_focused = app.focus == FocusPane::Chat;
    let chat_border_color = if chat_focused { Color::Cyan } else { Color::DarkGray };

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(chat_border_color))
        .title(format!(" {} ", app.controller.persona().as_str()));

    let chat_text = if app.controller.turns().is_empty() && !app.is_generating() {
        Text::from(Span::styled(
            "Say hello to start a conversation...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in app.controller.turns() {
            lines.push(role_line(msg.role));
            match msg.role {
                ChatRole::User => {
                    for line in msg.text.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                ChatRole::Assistant => {
                    // Split response into lines and parse markdown
                    for line in msg.text.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        if let Some(active) = &app.active {
            lines.push(role_line(ChatRole::Assistant));
            if active.draft.text().is_empty() {
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(caption(format!("Thinking{}", dots)));
            } else {
                for line in active.draft.text().lines() {
                    lines.push(parse_markdown_line(line));
                }
            }
            lines.push(Line::default());
            lines.push(caption(format!("Temperature = {:.1}", active.temperature)));
        } else if let Some(timing) = app.last_turn {
            lines.push(caption(format!(
                "Temperature = {:.1} | Completed in {:.2}s",
                timing.temperature,
                timing.elapsed.as_secs_f64()
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, chat_area);

    // Input at the bottom - highlight when focused or editing
    let input_focused = app.focus == FocusPane::Input;
    let input_border_color = if input_focused && app.input_mode == InputMode::Editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };
    let input_title = if app.is_generating() {
        " Waiting for reply... "
    } else {
        " Message (Enter to send) "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(input_title);

    // Horizontal scrolling keeps the cursor visible
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.query_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .query_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, input_area);

    // Show cursor when editing
    if app.input_mode == InputMode::Editing && input_focused {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}

fn render_status(app: &App, frame: &mut Frame, area: Rect) {
    let line = match &app.status {
        Some(status) => {
            let style = match status.kind {
                StatusKind::Info => Style::default().fg(Color::Green),
                StatusKind::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            };
            Line::from(Span::styled(format!(" {}", status.text), style))
        }
        None => Line::default(),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = if app.show_persona_picker {
        vec![
            Span::styled(" j/k ", key_style),
            Span::styled(" nav ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" select ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" cancel ", label_style),
        ]
    } else {
        match app.input_mode {
            InputMode::Editing => vec![
                Span::styled(" Enter ", key_style),
                Span::styled(" send ", label_style),
                Span::styled(" Esc ", key_style),
                Span::styled(" stop typing ", label_style),
                Span::styled(" Tab ", key_style),
                Span::styled(" focus ", label_style),
            ],
            InputMode::Normal => {
                let mut hints = vec![
                    Span::styled(" Tab ", key_style),
                    Span::styled(" focus ", label_style),
                ];
                if app.focus == FocusPane::Settings {
                    hints.extend(vec![
                        Span::styled(" j/k ", key_style),
                        Span::styled(" nav ", label_style),
                        Span::styled(" h/l ", key_style),
                        Span::styled(" adjust ", label_style),
                        Span::styled(" Enter ", key_style),
                        Span::styled(" apply ", label_style),
                    ]);
                } else {
                    hints.extend(vec![
                        Span::styled(" j/k ", key_style),
                        Span::styled(" scroll ", label_style),
                        Span::styled(" i ", key_style),
                        Span::styled(" type ", label_style),
                    ]);
                }
                hints.extend(vec![
                    Span::styled(" p ", key_style),
                    Span::styled(" persona ", label_style),
                    Span::styled(" +/- ", key_style),
                    Span::styled(" creativity ", label_style),
                    Span::styled(" m ", key_style),
                    Span::styled(" mock ", label_style),
                    Span::styled(" C ", key_style),
                    Span::styled(" clear ", label_style),
                    Span::styled(" q ", key_style),
                    Span::styled(" quit ", label_style),
                ]);
                hints
            }
        }
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_persona_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let personas = Persona::all();

    // Calculate popup size and position (centered)
    let popup_width = 44.min(area.width.saturating_sub(4));
    let popup_height = (personas.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Persona (switching clears history) ");

    let current = app.controller.persona();
    let items: Vec<ListItem> = personas
        .iter()
        .map(|persona| {
            let style = if *persona == current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", persona.as_str())).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.persona_picker_state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Controller;
    use gemchat_core::{MemoryStore, MockSource, TurnController};
    use ratatui::{backend::TestBackend, Terminal};

    fn test_app() -> App {
        let store: Box<dyn ConversationStore> = Box::new(MemoryStore::new());
        let controller: Controller = TurnController::new(store, Box::new(MockSource::new()), None);
        App::new(controller, "models/test", None)
    }

    fn draw(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(110, 30)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_parse_markdown_bold() {
        let line = parse_markdown_line("a **bold** word");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "bold");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_parse_markdown_unclosed_is_literal() {
        let line = parse_markdown_line("2 ** 3");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "2 ** 3");

        let line = parse_markdown_line("****");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "****");
    }

    #[test]
    fn test_temperature_slider() {
        assert_eq!(temperature_slider(0.0), "[□□□□□□□□□□]");
        assert_eq!(temperature_slider(1.0), "[■■■■■□□□□□]");
        assert_eq!(temperature_slider(2.0), "[■■■■■■■■■■]");
    }

    #[test]
    fn test_render_empty_conversation() {
        let mut app = test_app();
        let screen = draw(&mut app);
        assert!(screen.contains("Say hello to start a conversation..."));
        assert!(screen.contains("Persona: Casual Assistant"));
        assert!(screen.contains("mock replies"));
        assert!(app.chat_height > 0);
    }

    #[test]
    fn test_render_pending_turn_shows_caption() {
        let mut app = test_app();
        app.query_input = "Hi".to_string();
        app.submit_query();

        let screen = draw(&mut app);
        assert!(screen.contains("You:"));
        assert!(screen.contains("Thinking."));
        assert!(screen.contains("Temperature = 1.0"));
        assert!(screen.contains("Settings (busy)"));
    }

    #[test]
    fn test_resize_scrolls_with_fresh_sizes() {
        let mut app = test_app();
        for i in 0..30 {
            app.query_input = format!("message {}", i);
            app.submit_query();
            app.on_fragment(Some(Ok("reply".to_string())));
            app.on_fragment(None);
        }
        app.chat_scroll = 0;

        app.on_resize(110, 30);
        draw(&mut app);
        assert!(!app.rescroll_on_draw);
        assert!(app.chat_area.is_some());
        assert_eq!(
            app.chat_scroll,
            app.total_chat_lines().saturating_sub(app.chat_height)
        );
        assert!(app.chat_scroll > 0);
    }

    #[test]
    fn test_render_persona_picker() {
        let mut app = test_app();
        app.open_persona_picker();
        let screen = draw(&mut app);
        assert!(screen.contains("Professional Interviewer"));
        assert!(screen.contains("switching clears history"));
    }
}
