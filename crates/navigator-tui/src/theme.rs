//! Color themes for the navigator TUI.

use navigator_core::{RunStatus, TaskOutcome};
use ratatui::style::Color;

/// Theme name identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemeName {
    #[default]
    Default,
    /// Enhanced contrast
    Dark,
    /// No colors, for terminals or users that ask for none
    Monochrome,
}

impl ThemeName {
    /// Parse a theme name from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "default" => Some(Self::Default),
            "dark" => Some(Self::Dark),
            "monochrome" | "none" => Some(Self::Monochrome),
            _ => None,
        }
    }
}

/// Color palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeColors {
    /// Headers and focused borders
    pub header: Color,
    /// Hotkey hints
    pub hotkey: Color,
    pub text: Color,
    /// Secondary text
    pub text_dim: Color,
    pub border_dim: Color,
    /// Background of the cursor row
    pub selection: Color,
    pub ok: Color,
    pub changed: Color,
    pub skipped: Color,
    pub failed: Color,
    pub unreachable: Color,
}

/// Complete theme definition.
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: ThemeName,
    pub colors: ThemeColors,
}

impl Default for Theme {
    fn default() -> Self {
        Self::from_name(ThemeName::Default)
    }
}

impl Theme {
    pub fn from_name(name: ThemeName) -> Self {
        let colors = match name {
            ThemeName::Default => ThemeColors {
                header: Color::Cyan,
                hotkey: Color::Yellow,
                text: Color::White,
                text_dim: Color::Gray,
                border_dim: Color::DarkGray,
                selection: Color::DarkGray,
                ok: Color::Green,
                changed: Color::Yellow,
                skipped: Color::Cyan,
                failed: Color::Red,
                unreachable: Color::Magenta,
            },
            ThemeName::Dark => ThemeColors {
                header: Color::LightBlue,
                hotkey: Color::LightYellow,
                text: Color::White,
                text_dim: Color::DarkGray,
                border_dim: Color::Black,
                selection: Color::Rgb(60, 60, 60),
                ok: Color::LightGreen,
                changed: Color::LightYellow,
                skipped: Color::LightCyan,
                failed: Color::LightRed,
                unreachable: Color::LightMagenta,
            },
            ThemeName::Monochrome => ThemeColors {
                header: Color::Reset,
                hotkey: Color::Reset,
                text: Color::Reset,
                text_dim: Color::Reset,
                border_dim: Color::Reset,
                selection: Color::Reset,
                ok: Color::Reset,
                changed: Color::Reset,
                skipped: Color::Reset,
                failed: Color::Reset,
                unreachable: Color::Reset,
            },
        };
        Self { name, colors }
    }

    /// Color used for rows with `outcome`.
    pub fn outcome_color(&self, outcome: Option<TaskOutcome>) -> Color {
        match outcome {
            None => self.colors.text,
            Some(TaskOutcome::Ok) => self.colors.ok,
            Some(TaskOutcome::Changed) => self.colors.changed,
            Some(TaskOutcome::Skipped) => self.colors.skipped,
            Some(TaskOutcome::Failed) => self.colors.failed,
            Some(TaskOutcome::Unreachable) => self.colors.unreachable,
        }
    }

    pub fn status_color(&self, status: RunStatus) -> Color {
        match status {
            RunStatus::Running => self.colors.hotkey,
            RunStatus::Completed => self.colors.ok,
            RunStatus::Failed | RunStatus::TimedOut => self.colors.failed,
            RunStatus::Canceled => self.colors.text_dim,
        }
    }

    /// Returns true when the theme draws without colors.
    pub fn is_monochrome(&self) -> bool {
        self.name == ThemeName::Monochrome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(ThemeName::parse("Dark"), Some(ThemeName::Dark));
        assert_eq!(ThemeName::parse("none"), Some(ThemeName::Monochrome));
        assert_eq!(ThemeName::parse("neon"), None);
    }

    #[test]
    fn test_outcome_colors_distinct() {
        let theme = Theme::default();
        assert_ne!(
            theme.outcome_color(Some(TaskOutcome::Ok)),
            theme.outcome_color(Some(TaskOutcome::Failed))
        );
        assert_eq!(theme.outcome_color(None), theme.colors.text);
    }

    #[test]
    fn test_monochrome() {
        let theme = Theme::from_name(ThemeName::Monochrome);
        assert!(theme.is_monochrome());
        assert_eq!(theme.status_color(RunStatus::Failed), Color::Reset);
    }
}
