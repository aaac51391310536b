//! Keyboard input handling for the navigator TUI.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Application-level events that can trigger state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Move the cursor up one row
    NavigateUp,
    /// Move the cursor down one row
    NavigateDown,
    PageUp,
    PageDown,
    GoToTop,
    GoToBottom,
    /// Open the selected row
    Drill,
    /// Return to the previous screen
    Back,
    /// Begin typing a filter
    StartFilter,
    FilterInput(char),
    FilterBackspace,
    FilterSubmit,
    FilterCancel,
    /// Save the viewed run as an artifact
    SaveArtifact,
    /// Cancel the live run
    CancelRun,
    ShowHelp,
    HideHelp,
    Refresh,
    Quit,
    /// Force quit (Ctrl+C)
    ForceQuit,
    /// No action needed
    None,
}

/// Input handler for converting key events to app events.
#[derive(Debug, Default)]
pub struct InputHandler {
    /// Whether a filter is being typed
    filter_mode: bool,
    /// Whether the help overlay is shown
    help_visible: bool,
}

impl InputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_filter_mode(&self) -> bool {
        self.filter_mode
    }

    pub fn set_help_visible(&mut self, visible: bool) {
        self.help_visible = visible;
    }

    /// Handle a key event and return the corresponding app event.
    pub fn handle_key(&mut self, key: KeyEvent) -> AppEvent {
        // Ctrl+C always force quits
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return AppEvent::ForceQuit;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('l') {
            return AppEvent::Refresh;
        }

        if self.filter_mode {
            return self.handle_filter_input(key);
        }

        if self.help_visible {
            self.help_visible = false;
            return AppEvent::HideHelp;
        }

        self.handle_normal_mode(key)
    }

    fn handle_filter_input(&mut self, key: KeyEvent) -> AppEvent {
        match key.code {
            KeyCode::Enter => {
                self.filter_mode = false;
                AppEvent::FilterSubmit
            }
            KeyCode::Esc => {
                self.filter_mode = false;
                AppEvent::FilterCancel
            }
            KeyCode::Backspace => AppEvent::FilterBackspace,
            KeyCode::Char(c) => AppEvent::FilterInput(c),
            _ => AppEvent::None,
        }
    }

    fn handle_normal_mode(&mut self, key: KeyEvent) -> AppEvent {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => AppEvent::Quit,
            KeyCode::Char('?') => {
                self.help_visible = true;
                AppEvent::ShowHelp
            }

            KeyCode::Char('/') => {
                self.filter_mode = true;
                AppEvent::StartFilter
            }

            // List navigation
            KeyCode::Up | KeyCode::Char('k') => AppEvent::NavigateUp,
            KeyCode::Down | KeyCode::Char('j') => AppEvent::NavigateDown,
            KeyCode::PageUp => AppEvent::PageUp,
            KeyCode::PageDown => AppEvent::PageDown,
            KeyCode::Home | KeyCode::Char('g') => AppEvent::GoToTop,
            KeyCode::End | KeyCode::Char('G') => AppEvent::GoToBottom,

            // Drill down and back
            KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => AppEvent::Drill,
            KeyCode::Esc | KeyCode::Left | KeyCode::Backspace | KeyCode::Char('h') => AppEvent::Back,

            KeyCode::Char('s') | KeyCode::Char('S') => AppEvent::SaveArtifact,
            KeyCode::Char('x') | KeyCode::Char('X') => AppEvent::CancelRun,
            KeyCode::Char('r') | KeyCode::Char('R') => AppEvent::Refresh,

            _ => AppEvent::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn key_event_with_mods(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_navigation_keys() {
        let mut handler = InputHandler::new();

        assert_eq!(handler.handle_key(key_event(KeyCode::Up)), AppEvent::NavigateUp);
        assert_eq!(handler.handle_key(key_event(KeyCode::Char('j'))), AppEvent::NavigateDown);
        assert_eq!(handler.handle_key(key_event(KeyCode::Char('G'))), AppEvent::GoToBottom);
        assert_eq!(handler.handle_key(key_event(KeyCode::PageDown)), AppEvent::PageDown);
    }

    #[test]
    fn test_drill_and_back() {
        let mut handler = InputHandler::new();

        assert_eq!(handler.handle_key(key_event(KeyCode::Enter)), AppEvent::Drill);
        assert_eq!(handler.handle_key(key_event(KeyCode::Char('l'))), AppEvent::Drill);
        assert_eq!(handler.handle_key(key_event(KeyCode::Esc)), AppEvent::Back);
        assert_eq!(handler.handle_key(key_event(KeyCode::Left)), AppEvent::Back);
    }

    #[test]
    fn test_filter_mode() {
        let mut handler = InputHandler::new();

        assert_eq!(handler.handle_key(key_event(KeyCode::Char('/'))), AppEvent::StartFilter);
        assert!(handler.is_filter_mode());

        // Hotkeys are text while typing a filter
        assert_eq!(
            handler.handle_key(key_event(KeyCode::Char('q'))),
            AppEvent::FilterInput('q')
        );
        assert_eq!(
            handler.handle_key(key_event(KeyCode::Backspace)),
            AppEvent::FilterBackspace
        );
        assert_eq!(handler.handle_key(key_event(KeyCode::Enter)), AppEvent::FilterSubmit);
        assert!(!handler.is_filter_mode());

        handler.handle_key(key_event(KeyCode::Char('/')));
        assert_eq!(handler.handle_key(key_event(KeyCode::Esc)), AppEvent::FilterCancel);
        assert!(!handler.is_filter_mode());
    }

    #[test]
    fn test_help_overlay_dismissed_by_any_key() {
        let mut handler = InputHandler::new();

        assert_eq!(handler.handle_key(key_event(KeyCode::Char('?'))), AppEvent::ShowHelp);
        assert_eq!(handler.handle_key(key_event(KeyCode::Char('q'))), AppEvent::HideHelp);
        assert_eq!(handler.handle_key(key_event(KeyCode::Char('q'))), AppEvent::Quit);
    }

    #[test]
    fn test_ctrl_c_force_quit() {
        let mut handler = InputHandler::new();

        assert_eq!(
            handler.handle_key(key_event_with_mods(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            AppEvent::ForceQuit
        );

        handler.handle_key(key_event(KeyCode::Char('/')));
        assert_eq!(
            handler.handle_key(key_event_with_mods(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            AppEvent::ForceQuit
        );
    }

    #[test]
    fn test_run_actions() {
        let mut handler = InputHandler::new();

        assert_eq!(handler.handle_key(key_event(KeyCode::Char('s'))), AppEvent::SaveArtifact);
        assert_eq!(handler.handle_key(key_event(KeyCode::Char('x'))), AppEvent::CancelRun);
        assert_eq!(
            handler.handle_key(key_event_with_mods(KeyCode::Char('l'), KeyModifiers::CONTROL)),
            AppEvent::Refresh
        );
    }
}
