//! Terminal UI for navigator.
//!
//! This crate turns a [`navigator_runner::RunResult`] into a navigable tree
//! ([`ContentModel`]) and lets the operator browse it one screen at a time
//! ([`InteractionStack`]). The Ratatui front-end in [`app`] is a thin
//! renderer over the stack; everything below it is usable headless.
//!
//! ## Hotkeys
//!
//! - `↑`/`k`, `↓`/`j` - Move cursor
//! - `PgUp`/`PgDn` - Scroll a page
//! - `Enter`/`l` - Open selected row
//! - `Esc`/`h` - Back
//! - `/` - Filter (`text` or `key=value`)
//! - `s` - Save artifact
//! - `x` - Cancel the live run
//! - `?` - Help
//! - `q` - Quit

pub mod app;
pub mod content;
pub mod event;
pub mod filter;
pub mod stack;
pub mod theme;


pub use app::{App, AppResult, ArtifactTarget, RunSource};
pub use content::{ContentModel, ContentNode, NodeId, NodeKind};
pub use filter::Filter;
pub use stack::{Intent, InteractionStack, NavigationBoundary, Row, ScreenKind, ScreenSnapshot};
pub use theme::{Theme, ThemeName};
