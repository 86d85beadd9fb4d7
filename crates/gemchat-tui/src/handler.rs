use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::{App, FocusPane, InputMode, TEMPERATURE_STEP};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(width, height) => app.on_resize(width, height),
        AppEvent::Tick => app.tick_animation(),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }
    if key.code == KeyCode::Char('l') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.clear_history();
        return;
    }

    if app.show_persona_picker {
        handle_persona_picker(app, key);
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_persona_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.show_persona_picker = false,
        KeyCode::Char('j') | KeyCode::Down => app.persona_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.persona_picker_nav_up(),
        KeyCode::Enter => app.confirm_persona_picker(),
        _ => {}
    }
}

fn focus_input(app: &mut App) {
    app.focus = FocusPane::Input;
    app.input_mode = InputMode::Editing;
    // Cursor at end of existing text
    app.query_cursor = app.query_input.chars().count();
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Esc => {
            if app.focus == FocusPane::Settings {
                app.focus = FocusPane::Chat;
            }
        }

        // Tab cycles: Input -> Chat -> Settings -> Input
        KeyCode::Tab => match app.focus {
            FocusPane::Input => app.focus = FocusPane::Chat,
            FocusPane::Chat => app.focus = FocusPane::Settings,
            FocusPane::Settings => focus_input(app),
        },
        KeyCode::Char('i') | KeyCode::Char('/') => focus_input(app),

        // Shortcuts for the sidebar controls
        KeyCode::Char('p') => app.open_persona_picker(),
        KeyCode::Char('+') | KeyCode::Char('=') => app.adjust_temperature(TEMPERATURE_STEP),
        KeyCode::Char('-') => app.adjust_temperature(-TEMPERATURE_STEP),
        KeyCode::Char('m') => app.toggle_mock(),
        KeyCode::Char('C') => app.clear_history(),

        // Scroll/navigate based on focus
        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Settings => app.settings_nav_down(),
            _ => app.scroll_chat_down(1),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Settings => app.settings_nav_up(),
            _ => app.scroll_chat_up(1),
        },
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_down(app.chat_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_up(app.chat_height / 2);
        }
        KeyCode::Char('g') => app.chat_scroll = 0,
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),

        KeyCode::Enter => match app.focus {
            FocusPane::Settings => app.activate_setting(),
            _ => focus_input(app),
        },
        KeyCode::Char('l') | KeyCode::Right => {
            if app.focus == FocusPane::Settings {
                app.adjust_setting(true);
            }
        }
        KeyCode::Char('h') | KeyCode::Left => {
            if app.focus == FocusPane::Settings {
                app.adjust_setting(false);
            }
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Tab => {
            // Exit editing when leaving input
            app.input_mode = InputMode::Normal;
            app.focus = FocusPane::Chat;
        }
        KeyCode::Enter => app.submit_query(),
        KeyCode::Backspace => {
            if app.query_cursor > 0 {
                app.query_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.query_input, app.query_cursor);
                app.query_input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.query_input.chars().count();
            if app.query_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.query_input, app.query_cursor);
                app.query_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.query_cursor = app.query_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.query_input.chars().count();
            app.query_cursor = (app.query_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.query_cursor = 0;
        }
        KeyCode::End => {
            app.query_cursor = app.query_input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.query_input, app.query_cursor);
            app.query_input.insert(byte_pos, c);
            app.query_cursor += 1;
        }
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    let in_chat = app.chat_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_settings = app.settings_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_chat {
                app.scroll_chat_down(3);
            } else if in_settings {
                app.settings_nav_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_chat {
                app.scroll_chat_up(3);
            } else if in_settings {
                app.settings_nav_up();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Controller;
    use gemchat_core::{ConversationStore, MemoryStore, MockSource, Persona, TurnController};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn test_app() -> App {
        let store: Box<dyn ConversationStore> = Box::new(MemoryStore::new());
        let controller: Controller = TurnController::new(store, Box::new(MockSource::new()), None);
        App::new(controller, "models/test", None)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            handle_key(app, key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_char_to_byte_index() {
        assert_eq!(char_to_byte_index("héllo", 0), 0);
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("héllo", 5), 6);
        assert_eq!(char_to_byte_index("", 3), 0);
    }

    #[test]
    fn test_editing_handles_multibyte_cursor() {
        let mut app = test_app();
        type_text(&mut app, "naïve");
        handle_key(&mut app, key(KeyCode::Left));
        handle_key(&mut app, key(KeyCode::Left));
        handle_key(&mut app, key(KeyCode::Backspace));
        assert_eq!(app.query_input, "nave");
        assert_eq!(app.query_cursor, 2);

        handle_key(&mut app, key(KeyCode::Home));
        handle_key(&mut app, key(KeyCode::Delete));
        assert_eq!(app.query_input, "ave");
    }

    #[test]
    fn test_enter_submits_and_starts_reply() {
        let mut app = test_app();
        type_text(&mut app, "Hi");
        handle_key(&mut app, key(KeyCode::Enter));
        assert!(app.query_input.is_empty());
        assert!(app.is_generating());
        assert!(app.active.is_some());
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let mut app = test_app();
        type_text(&mut app, "   ");
        handle_key(&mut app, key(KeyCode::Enter));
        assert_eq!(app.query_input, "   ");
        assert!(!app.is_generating());
        assert!(app.controller.turns().is_empty());
    }

    #[test]
    fn test_normal_mode_shortcuts() {
        let mut app = test_app();
        handle_key(&mut app, key(KeyCode::Esc));
        assert_eq!(app.input_mode, InputMode::Normal);

        handle_key(&mut app, key(KeyCode::Char('+')));
        assert!((app.controller.temperature() - 1.1).abs() < 1e-6);
        handle_key(&mut app, key(KeyCode::Char('-')));
        handle_key(&mut app, key(KeyCode::Char('-')));
        assert!((app.controller.temperature() - 0.9).abs() < 1e-6);

        handle_key(&mut app, key(KeyCode::Char('p')));
        assert!(app.show_persona_picker);
        handle_key(&mut app, key(KeyCode::Down));
        handle_key(&mut app, key(KeyCode::Enter));
        assert_eq!(app.controller.persona(), Persona::ProfessionalInterviewer);

        handle_key(&mut app, key(KeyCode::Char('i')));
        assert_eq!(app.input_mode, InputMode::Editing);
        assert_eq!(app.focus, FocusPane::Input);
    }

    #[test]
    fn test_settings_pane_navigation() {
        let mut app = test_app();
        handle_key(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Chat);
        handle_key(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Settings);

        // Persona row: right cycles forward
        handle_key(&mut app, key(KeyCode::Right));
        assert_eq!(app.controller.persona(), Persona::ProfessionalInterviewer);
        handle_key(&mut app, key(KeyCode::Left));
        assert_eq!(app.controller.persona(), Persona::CasualAssistant);

        // Temperature row
        handle_key(&mut app, key(KeyCode::Down));
        handle_key(&mut app, key(KeyCode::Left));
        assert!((app.controller.temperature() - 0.9).abs() < 1e-6);

        handle_key(&mut app, key(KeyCode::Tab));
        assert_eq!(app.focus, FocusPane::Input);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[test]
    fn test_resize_defers_rescroll_until_draw() {
        let mut app = test_app();
        app.chat_area = Some(Rect::new(0, 0, 40, 10));

        handle_event(&mut app, AppEvent::Resize(80, 24)).unwrap();
        assert_eq!(app.terminal_size, Some((80, 24)));
        assert!(app.rescroll_on_draw);
        assert!(app.chat_area.is_none());

        app.rescroll_on_draw = false;
        handle_event(&mut app, AppEvent::Resize(80, 24)).unwrap();
        assert!(!app.rescroll_on_draw);
    }

    #[test]
    fn test_ctrl_keys() {
        let mut app = test_app();
        type_text(&mut app, "Hi");
        handle_key(&mut app, key(KeyCode::Enter));

        // Clearing is refused mid-reply
        handle_key(&mut app, ctrl('l'));
        assert_eq!(app.controller.turns().len(), 1);

        handle_key(&mut app, ctrl('c'));
        assert!(app.should_quit);
    }
}
