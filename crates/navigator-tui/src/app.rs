//! Main application state and logic for the navigator TUI.
//!
//! The `App` owns the [`InteractionStack`] for one run, turns key presses
//! into navigation intents and draws the top screen. A live run keeps
//! growing underneath; the app pulls new records into the stack on a fixed
//! interval.

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossterm::event::{self, Event, KeyEvent};
use navigator_core::RunStatus;
use navigator_runner::{RunHandle, RunResult, artifact};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Row, Table, Wrap},
};
use tracing::{debug, info, warn};

use crate::event::{AppEvent, InputHandler};
use crate::filter::Filter;
use crate::stack::{Intent, InteractionStack, NavigationBoundary, ScreenSnapshot};
use crate::theme::Theme;

/// Result type for app operations.
pub type AppResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Target frame rate (30 FPS is plenty for a list browser).
const TARGET_FPS: u64 = 30;
const FRAME_DURATION: Duration = Duration::from_millis(1000 / TARGET_FPS);

/// How often a live run is checked for new records.
const DATA_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Rows taken by the content block borders and the table header.
const CONTENT_CHROME_ROWS: u16 = 3;

/// Where artifacts of the viewed run are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTarget {
    pub dir: PathBuf,
    /// Name used in the artifact file name
    pub name: String,
    /// Save automatically once the run ends
    pub auto_save: bool,
}

/// Where the viewed run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSource {
    Live { name: String },
    Replay { path: PathBuf },
}

impl RunSource {
    fn label(&self) -> String {
        match self {
            Self::Live { name } => name.clone(),
            Self::Replay { path } => format!("replay {}", path.display()),
        }
    }
}

/// Main application state.
pub struct App {
    stack: InteractionStack,
    /// Handle of a live run; `None` when replaying
    run: Option<RunHandle>,
    source: RunSource,
    artifact: Option<ArtifactTarget>,
    saved_artifact: Option<PathBuf>,
    /// Whether the last save captured a finished run
    saved_final: bool,
    input_handler: InputHandler,
    filter_input: String,
    should_quit: bool,
    show_help: bool,
    status_message: Option<String>,
    theme: Theme,
    /// Whether the UI needs a redraw
    dirty: bool,
    last_poll_time: Instant,
    last_status: RunStatus,
}

impl App {
    /// View a live run.
    pub fn live(run: RunHandle, name: impl Into<String>, artifact: Option<ArtifactTarget>) -> Self {
        let result = run.result();
        let mut app = Self::with_result(result, RunSource::Live { name: name.into() });
        app.run = Some(run);
        app.artifact = artifact;
        app
    }

    /// View a run loaded from an artifact.
    pub fn replay(result: RunResult, path: impl Into<PathBuf>) -> Self {
        Self::with_result(result, RunSource::Replay { path: path.into() })
    }

    fn with_result(result: RunResult, source: RunSource) -> Self {
        let last_status = result.status();
        Self {
            stack: InteractionStack::new(result),
            run: None,
            source,
            artifact: None,
            saved_artifact: None,
            saved_final: false,
            input_handler: InputHandler::new(),
            filter_input: String::new(),
            should_quit: false,
            show_help: false,
            status_message: None,
            theme: Theme::default(),
            dirty: true,
            last_poll_time: Instant::now(),
            last_status,
        }
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn stack(&self) -> &InteractionStack {
        &self.stack
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Path of the last artifact written by this app.
    pub fn saved_artifact(&self) -> Option<&PathBuf> {
        self.saved_artifact.as_ref()
    }

    /// Path of the last artifact, if it was saved after the run finished.
    pub fn final_artifact(&self) -> Option<&PathBuf> {
        self.saved_artifact.as_ref().filter(|_| self.saved_final)
    }

    /// Hand the live run back to the caller once the UI is done.
    pub fn take_run(&mut self) -> Option<RunHandle> {
        self.run.take()
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn set_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.mark_dirty();
    }

    /// Pull new records from the run into the screens.
    ///
    /// Returns true when anything visible changed.
    pub fn poll_run(&mut self) -> bool {
        let applied = self.stack.refresh();
        let status = self.stack.result().status();
        let status_changed = status != self.last_status;
        self.last_status = status;

        if status_changed && status.is_terminal() {
            info!("Run finished with status {}", status);
            self.set_message(format!("Run {status}"));
            if self.artifact.as_ref().is_some_and(|a| a.auto_save) && !self.saved_final {
                self.save_artifact();
            }
        }

        let changed = applied > 0 || status_changed;
        if changed {
            self.mark_dirty();
        }
        changed
    }

    /// Save the viewed run to the artifact directory.
    pub fn save_artifact(&mut self) {
        let Some(target) = self.artifact.clone() else {
            self.set_message("No artifact directory configured");
            return;
        };

        let path = artifact::default_artifact_path(&target.dir, &target.name, Utc::now());
        let finished = self.stack.result().status().is_terminal();
        match artifact::save(self.stack.result(), &path, Some(&target.name)) {
            Ok(()) => {
                if finished {
                    self.set_message(format!("Saved {}", path.display()));
                } else {
                    self.set_message(format!("Saved partial run to {}", path.display()));
                }
                self.saved_artifact = Some(path);
                self.saved_final = finished;
            }
            Err(e) => {
                warn!("Failed to save artifact: {}", e);
                self.set_message(format!("Save failed: {e}"));
            }
        }
    }

    pub fn handle_key_event(&mut self, key: KeyEvent) {
        let event = self.input_handler.handle_key(key);
        self.handle_app_event(event);
    }

    pub fn handle_app_event(&mut self, event: AppEvent) {
        if event == AppEvent::None {
            return;
        }
        self.mark_dirty();
        let page = self.stack.viewport() as i64;
        let total = self
            .stack
            .top()
            .map_or(0, |screen| screen.rows().len() as i64);

        let outcome = match event {
            AppEvent::NavigateUp => self.stack.handle_intent(Intent::MoveCursor(-1)),
            AppEvent::NavigateDown => self.stack.handle_intent(Intent::MoveCursor(1)),
            AppEvent::PageUp => self.stack.handle_intent(Intent::Scroll(-page)),
            AppEvent::PageDown => self.stack.handle_intent(Intent::Scroll(page)),
            AppEvent::GoToTop => self.stack.handle_intent(Intent::MoveCursor(-total)),
            AppEvent::GoToBottom => self.stack.handle_intent(Intent::MoveCursor(total)),
            AppEvent::Drill => {
                let selected = self
                    .stack
                    .top()
                    .and_then(|screen| screen.selected())
                    .map(|row| row.id.clone());
                match selected {
                    Some(row) => self.stack.handle_intent(Intent::Drill(row)),
                    None => Ok(()),
                }
            }
            AppEvent::Back => self.stack.handle_intent(Intent::Back),
            AppEvent::StartFilter => {
                self.filter_input.clear();
                Ok(())
            }
            AppEvent::FilterInput(c) => {
                self.filter_input.push(c);
                Ok(())
            }
            AppEvent::FilterBackspace => {
                self.filter_input.pop();
                Ok(())
            }
            AppEvent::FilterSubmit => {
                let filter = Filter::parse(&self.filter_input);
                self.filter_input.clear();
                self.stack.handle_intent(Intent::Filter(filter))
            }
            AppEvent::FilterCancel => {
                self.filter_input.clear();
                Ok(())
            }
            AppEvent::SaveArtifact => {
                self.save_artifact();
                Ok(())
            }
            AppEvent::CancelRun => {
                self.cancel_run();
                Ok(())
            }
            AppEvent::ShowHelp => {
                self.show_help = true;
                Ok(())
            }
            AppEvent::HideHelp => {
                self.show_help = false;
                Ok(())
            }
            AppEvent::Refresh => {
                self.poll_run();
                Ok(())
            }
            AppEvent::Quit | AppEvent::ForceQuit => {
                self.should_quit = true;
                self.stack.handle_intent(Intent::Quit)
            }
            AppEvent::None => Ok(()),
        };

        if let Err(boundary) = outcome {
            debug!("Navigation boundary: {}", boundary);
            let message = match boundary {
                NavigationBoundary::AtRoot => "At the top screen, press q to quit".to_string(),
                other => other.to_string(),
            };
            self.set_message(message);
        }
    }

    fn cancel_run(&mut self) {
        match &self.run {
            Some(run) if !run.result().status().is_terminal() => {
                run.cancel();
                self.set_message("Cancel requested");
            }
            Some(_) => self.set_message("Run already finished"),
            None => self.set_message("Nothing to cancel in a replay"),
        }
    }

    /// Run the main application loop.
    pub fn run(&mut self) -> AppResult<()> {
        crossterm::terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal);

        crossterm::terminal::disable_raw_mode()?;
        crossterm::execute!(
            terminal.backend_mut(),
            crossterm::terminal::LeaveAlternateScreen
        )?;
        terminal.show_cursor()?;

        result
    }

    fn run_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> AppResult<()> {
        while !self.should_quit {
            let frame_start = Instant::now();

            if self.last_poll_time.elapsed() >= DATA_POLL_INTERVAL {
                self.poll_run();
                self.last_poll_time = Instant::now();
            }

            if self.take_dirty() {
                terminal.draw(|frame| self.draw(frame))?;
            }

            let elapsed = frame_start.elapsed();
            let event_timeout = FRAME_DURATION
                .checked_sub(elapsed)
                .filter(|t| !t.is_zero())
                .unwrap_or(Duration::from_millis(10));

            if event::poll(event_timeout)? {
                match event::read()? {
                    Event::Key(key) => self.handle_key_event(key),
                    Event::Resize(..) => self.mark_dirty(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Draw the UI.
    pub fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(4),    // Content
                Constraint::Length(2), // Footer
            ])
            .split(area);

        self.stack
            .set_viewport(chunks[1].height.saturating_sub(CONTENT_CHROME_ROWS) as usize);
        let snapshot = self.stack.snapshot();

        self.draw_header(frame, chunks[0], snapshot.as_ref());
        match &snapshot {
            Some(snapshot) => self.draw_content(frame, chunks[1], snapshot),
            None => {
                let ended = Paragraph::new("Session ended")
                    .block(Block::default().borders(Borders::ALL));
                frame.render_widget(ended, chunks[1]);
            }
        }
        self.draw_footer(frame, chunks[2], snapshot.as_ref());

        if self.show_help {
            self.draw_help_overlay(frame, area);
        }
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect, snapshot: Option<&ScreenSnapshot>) {
        let colors = &self.theme.colors;
        let title = format!(" navigator | {} ", self.source.label());
        let status = self.stack.result().status();
        let status_text = format!("[{status}]");
        let records = format!("{} records", self.stack.result().len());

        let breadcrumb = snapshot
            .map(|s| s.breadcrumb.join(" > "))
            .unwrap_or_default();

        let right_len = records.len() + 2 + status_text.len();
        let used = title.len() + breadcrumb.len() + right_len + 2;
        let spacing = (area.width as usize).saturating_sub(used);

        let header = Paragraph::new(Line::from(vec![
            Span::styled(title, Style::default().fg(colors.header).add_modifier(Modifier::BOLD)),
            Span::styled(breadcrumb, Style::default().fg(colors.text)),
            Span::raw(" ".repeat(spacing)),
            Span::styled(records, Style::default().fg(colors.text_dim)),
            Span::raw("  "),
            Span::styled(status_text, Style::default().fg(self.theme.status_color(status))),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(colors.border_dim)),
        );

        frame.render_widget(header, area);
    }

    fn draw_content(&self, frame: &mut Frame, area: Rect, snapshot: &ScreenSnapshot) {
        let colors = &self.theme.colors;
        let cursor_row = snapshot.cursor_in_window();
        let index_width = snapshot.total_rows.max(1).to_string().len() as u16;

        let rows: Vec<Row> = snapshot
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut cells = Vec::with_capacity(row.cells.len() + 1);
                cells.push(format!("{}", snapshot.scroll + i));
                cells.extend(row.cells.iter().cloned());

                let mut style = Style::default().fg(self.theme.outcome_color(row.outcome));
                if cursor_row == Some(i) {
                    style = if self.theme.is_monochrome() {
                        style.add_modifier(Modifier::REVERSED)
                    } else {
                        style.bg(colors.selection).add_modifier(Modifier::BOLD)
                    };
                }
                Row::new(cells).style(style)
            })
            .collect();

        let mut titles = vec![String::new()];
        titles.extend(snapshot.columns.iter().map(|c| c.title.to_string()));
        let header = Row::new(titles).style(
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::BOLD),
        );

        let mut widths = vec![Constraint::Length(index_width)];
        widths.extend(snapshot.columns.iter().map(|c| match c.width {
            0 => Constraint::Min(10),
            width => Constraint::Length(width),
        }));

        let title = if snapshot.filter.is_empty() {
            format!(" {} ", snapshot.title)
        } else {
            format!(" {} [{}] ", snapshot.title, snapshot.filter)
        };
        let position = if snapshot.total_rows == 0 {
            " empty ".to_string()
        } else {
            format!(" {}/{} ", snapshot.cursor + 1, snapshot.total_rows)
        };

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.header))
                    .title(Span::styled(
                        title,
                        Style::default().fg(colors.header).add_modifier(Modifier::BOLD),
                    ))
                    .title_bottom(Line::from(position).alignment(Alignment::Right)),
            );

        frame.render_widget(table, area);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect, snapshot: Option<&ScreenSnapshot>) {
        let colors = &self.theme.colors;
        let hotkey_style = Style::default().fg(colors.hotkey);

        let line = if self.input_handler.is_filter_mode() {
            Line::from(vec![
                Span::styled("Filter: ", hotkey_style),
                Span::raw(format!("{}_", self.filter_input)),
                Span::styled("  (text, key=value, empty clears)", Style::default().fg(colors.text_dim)),
            ])
        } else {
            let mut hints = vec![
                Span::styled("[Enter]", hotkey_style),
                Span::raw("Open "),
                Span::styled("[Esc]", hotkey_style),
                Span::raw("Back "),
                Span::styled("[/]", hotkey_style),
                Span::raw("Filter "),
                Span::styled("[s]", hotkey_style),
                Span::raw("Save "),
            ];
            if self.run.is_some() {
                hints.push(Span::styled("[x]", hotkey_style));
                hints.push(Span::raw("Cancel run "));
            }
            hints.extend([
                Span::styled("[?]", hotkey_style),
                Span::raw("Help "),
                Span::styled("[q]", hotkey_style),
                Span::raw("Quit"),
            ]);
            Line::from(hints)
        };

        let message = self
            .status_message
            .clone()
            .or_else(|| snapshot.map(|s| format!("{} rows", s.total_rows)))
            .unwrap_or_default();

        let footer = Paragraph::new(line)
            .style(Style::default().fg(colors.text_dim))
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .title(Span::styled(message, Style::default().fg(colors.text_dim)))
                    .title_alignment(Alignment::Right),
            );

        frame.render_widget(footer, area);
    }

    fn draw_help_overlay(&self, frame: &mut Frame, area: Rect) {
        let colors = &self.theme.colors;
        let overlay_width = 56.min(area.width.saturating_sub(4));
        let overlay_height = 26.min(area.height.saturating_sub(2));
        let overlay_area = Rect::new(
            (area.width - overlay_width) / 2,
            (area.height - overlay_height) / 2,
            overlay_width,
            overlay_height,
        );

        frame.render_widget(Clear, overlay_area);

        let help_text = "\
navigator key reference

Navigation:
  ↑ k / ↓ j     Move cursor
  PgUp / PgDn   Scroll a page
  g / G         First / last row
  Enter → l     Open selected row
  Esc ← h       Back to previous screen

Filtering:
  /text         Rows containing text
  /key=value    Rows whose attribute matches
  / Enter       Clear the filter

Run:
  s             Save artifact
  x             Cancel the live run
  r  Ctrl+L     Refresh
  q             Quit
  Ctrl+C        Force quit

Press any key to close this help.";

        let help = Paragraph::new(help_text)
            .style(Style::default().fg(colors.text))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(colors.header))
                    .title(Span::styled(
                        " Help ",
                        Style::default().fg(colors.header).add_modifier(Modifier::BOLD),
                    ))
                    .style(Style::default().bg(Color::Black)),
            )
            .wrap(Wrap { trim: false });

        frame.render_widget(help, overlay_area);
    }
}
