//! Interaction stack: the navigation engine behind the terminal UI.
//!
//! The stack holds one [`Screen`] per level of drill-down, the root run at
//! the bottom and the visible screen on top. Screens only read the
//! [`ContentModel`]; filtering and refreshing derive a cached row list and
//! never change the tree.
//!
//! The renderer talks to the stack through two values: a [`ScreenSnapshot`]
//! describing what to draw, and an [`Intent`] describing what the operator
//! asked for.

use navigator_core::{RunStatus, TaskOutcome};
use navigator_runner::RunResult;
use thiserror::Error;
use tracing::{debug, trace};

use crate::content::{Column, ContentModel, ContentNode, NodeId, NodeKind, ROOT_ID, columns_for, project};
use crate::filter::Filter;

/// Identifier of a row on a screen.
///
/// Listing rows use the child node id; detail rows use the attribute key.
pub type RowId = String;

/// Rows shown when no viewport height has been reported yet.
pub const DEFAULT_VIEWPORT: usize = 20;

const DETAIL_COLUMNS: &[Column] = &[
    Column {
        title: "Field",
        key: "field",
        width: 28,
    },
    Column {
        title: "Value",
        key: "value",
        width: 0,
    },
];

/// Conditions signalled by navigation that leave the stack unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationBoundary {
    #[error("already at the root screen")]
    AtRoot,

    #[error("no content node with id {id}")]
    UnknownNode { id: String },

    #[error("row {row} cannot be opened")]
    NotDrillable { row: String },

    #[error("navigation session has ended")]
    Inactive,
}

/// Operator intents understood by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    MoveCursor(i64),
    Scroll(i64),
    Drill(RowId),
    Back,
    Filter(Filter),
    Quit,
}

/// One displayed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    /// Node opened when the row is drilled into
    pub target: Option<NodeId>,
    pub cells: Vec<String>,
    pub outcome: Option<TaskOutcome>,
}

/// How a screen presents its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenKind {
    /// Children of the node, one per row
    Listing,
    /// Attributes of the node as key/value rows
    Detail,
}

impl ScreenKind {
    pub fn for_node(kind: NodeKind) -> Self {
        if kind.is_container() {
            Self::Listing
        } else {
            Self::Detail
        }
    }

    /// Behaviour for this kind of screen.
    pub fn content(&self) -> &'static dyn ScreenContent {
        match self {
            Self::Listing => &ListingScreen,
            Self::Detail => &DetailScreen,
        }
    }
}

/// Capabilities of a screen kind.
pub trait ScreenContent: Send + Sync {
    fn columns(&self, node: &ContentNode) -> &'static [Column];

    /// Rows for `node` under `filter`, in display order.
    fn rows(&self, model: &ContentModel, node: &ContentNode, filter: &Filter) -> Vec<Row>;

    /// Node opened by drilling into `row`, if any.
    fn drill(&self, row: &Row) -> Option<NodeId> {
        row.target.clone()
    }
}

struct ListingScreen;

impl ScreenContent for ListingScreen {
    fn columns(&self, node: &ContentNode) -> &'static [Column] {
        columns_for(node.kind)
    }

    fn rows(&self, model: &ContentModel, node: &ContentNode, filter: &Filter) -> Vec<Row> {
        let columns = self.columns(node);
        model
            .filter(&node.id, filter)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| model.node(&id))
            .map(|child| Row {
                id: child.id.clone(),
                target: Some(child.id.clone()),
                cells: project(child, columns),
                outcome: child.outcome(),
            })
            .collect()
    }
}

struct DetailScreen;

impl ScreenContent for DetailScreen {
    fn columns(&self, _node: &ContentNode) -> &'static [Column] {
        DETAIL_COLUMNS
    }

    fn rows(&self, _model: &ContentModel, node: &ContentNode, filter: &Filter) -> Vec<Row> {
        std::iter::once(("label", node.label.as_str()))
            .chain(node.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .filter(|(key, value)| filter.matches_pair(key, value))
            .map(|(key, value)| Row {
                id: key.to_string(),
                target: None,
                cells: vec![key.to_string(), value.to_string()],
                outcome: (key == "outcome")
                    .then(|| TaskOutcome::from_wire(value))
                    .flatten(),
            })
            .collect()
    }

    fn drill(&self, _row: &Row) -> Option<NodeId> {
        None
    }
}

/// One level of the stack.
#[derive(Debug, Clone)]
pub struct Screen {
    node: NodeId,
    kind: ScreenKind,
    filter: Filter,
    rows: Vec<Row>,
    cursor: usize,
    scroll: usize,
}

impl Screen {
    fn new(model: &ContentModel, node: &ContentNode, filter: Filter) -> Self {
        let kind = ScreenKind::for_node(node.kind);
        let rows = kind.content().rows(model, node, &filter);
        Self {
            node: node.id.clone(),
            kind,
            filter,
            rows,
            cursor: 0,
            scroll: 0,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn kind(&self) -> ScreenKind {
        self.kind
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn selected(&self) -> Option<&Row> {
        self.rows.get(self.cursor)
    }

    /// Re-derive rows, keeping the cursor on the same row id.
    ///
    /// Returns false when the selected id is gone and the cursor was reset.
    fn rederive(&mut self, model: &ContentModel, viewport: usize) -> bool {
        let selected = self.selected().map(|row| row.id.clone());
        let Some(node) = model.node(&self.node) else {
            self.rows.clear();
            self.cursor = 0;
            self.scroll = 0;
            return false;
        };
        self.rows = self.kind.content().rows(model, node, &self.filter);

        let kept = match selected {
            Some(id) => match self.rows.iter().position(|row| row.id == id) {
                Some(index) => {
                    self.cursor = index;
                    true
                }
                None => {
                    self.cursor = 0;
                    self.scroll = 0;
                    false
                }
            },
            None => {
                self.cursor = 0;
                true
            }
        };
        self.clamp(viewport);
        kept
    }

    fn move_cursor(&mut self, delta: i64, viewport: usize) {
        if self.rows.is_empty() {
            return;
        }
        let last = self.rows.len() as i64 - 1;
        self.cursor = (self.cursor as i64).saturating_add(delta).clamp(0, last) as usize;
        self.clamp(viewport);
    }

    fn scroll_by(&mut self, delta: i64, viewport: usize) {
        let viewport = viewport.max(1);
        let max_scroll = self.rows.len().saturating_sub(viewport) as i64;
        self.scroll = (self.scroll as i64).saturating_add(delta).clamp(0, max_scroll) as usize;
        if !self.rows.is_empty() {
            let window_end = (self.scroll + viewport).min(self.rows.len()) - 1;
            self.cursor = self.cursor.clamp(self.scroll, window_end);
        }
    }

    /// Keep the cursor in range and inside the scroll window.
    fn clamp(&mut self, viewport: usize) {
        let viewport = viewport.max(1);
        if self.rows.is_empty() {
            self.cursor = 0;
            self.scroll = 0;
            return;
        }
        self.cursor = self.cursor.min(self.rows.len() - 1);
        self.scroll = self.scroll.min(self.rows.len().saturating_sub(viewport));
        if self.cursor < self.scroll {
            self.scroll = self.cursor;
        } else if self.cursor >= self.scroll + viewport {
            self.scroll = self.cursor + 1 - viewport;
        }
    }
}

/// What the renderer needs to draw the top screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenSnapshot {
    pub title: String,
    pub breadcrumb: Vec<String>,
    pub kind: ScreenKind,
    pub columns: Vec<Column>,
    /// Rows inside the scroll window
    pub rows: Vec<Row>,
    /// Cursor index into all rows
    pub cursor: usize,
    pub scroll: usize,
    pub total_rows: usize,
    pub filter: String,
    pub status: RunStatus,
}

impl ScreenSnapshot {
    /// Cursor position inside the window, when visible.
    pub fn cursor_in_window(&self) -> Option<usize> {
        self.cursor
            .checked_sub(self.scroll)
            .filter(|offset| *offset < self.rows.len())
    }
}

/// Stack of screens over one run.
pub struct InteractionStack {
    result: RunResult,
    model: ContentModel,
    screens: Vec<Screen>,
    viewport: usize,
}

impl InteractionStack {
    /// Start a session on `result` with the root screen pushed.
    pub fn new(result: RunResult) -> Self {
        let model = ContentModel::build(&result);
        let root = Screen::new(&model, model.root(), Filter::All);
        debug!(run_id = %result.run_id(), nodes = model.len(), "Navigation session started");
        Self {
            result,
            model,
            screens: vec![root],
            viewport: DEFAULT_VIEWPORT,
        }
    }

    pub fn result(&self) -> &RunResult {
        &self.result
    }

    pub fn model(&self) -> &ContentModel {
        &self.model
    }

    pub fn is_active(&self) -> bool {
        !self.screens.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.screens.len()
    }

    pub fn top(&self) -> Option<&Screen> {
        self.screens.last()
    }

    pub fn viewport(&self) -> usize {
        self.viewport
    }

    /// Set the number of rows the renderer can show.
    pub fn set_viewport(&mut self, rows: usize) {
        let rows = rows.max(1);
        if rows == self.viewport {
            return;
        }
        self.viewport = rows;
        for screen in &mut self.screens {
            screen.clamp(rows);
        }
    }

    /// Push a screen for `node` with cursor and scroll at zero.
    pub fn push(&mut self, node: &str, filter: Filter) -> Result<(), NavigationBoundary> {
        if !self.is_active() {
            return Err(NavigationBoundary::Inactive);
        }
        let content = self
            .model
            .node(node)
            .ok_or_else(|| NavigationBoundary::UnknownNode { id: node.to_string() })?;
        let screen = Screen::new(&self.model, content, filter);
        trace!(node, depth = self.screens.len() + 1, "Pushed screen");
        self.screens.push(screen);
        Ok(())
    }

    /// Remove the top screen. The root screen is never removed.
    pub fn pop(&mut self) -> Result<(), NavigationBoundary> {
        match self.screens.len() {
            0 => Err(NavigationBoundary::Inactive),
            1 => Err(NavigationBoundary::AtRoot),
            _ => {
                self.screens.pop();
                Ok(())
            }
        }
    }

    /// Replace the filter of the top screen.
    pub fn apply_filter(&mut self, filter: Filter) -> Result<(), NavigationBoundary> {
        let viewport = self.viewport;
        let screen = self.screens.last_mut().ok_or(NavigationBoundary::Inactive)?;
        screen.filter = filter;
        screen.rederive(&self.model, viewport);
        Ok(())
    }

    /// Pull new records into the model and re-derive every screen.
    ///
    /// Returns the number of records applied.
    pub fn refresh(&mut self) -> usize {
        let applied = self.model.refresh(&self.result);
        if applied > 0 {
            let viewport = self.viewport;
            for screen in &mut self.screens {
                if !screen.rederive(&self.model, viewport) {
                    debug!(node = %screen.node, "Selected row disappeared, cursor reset");
                }
            }
        }
        applied
    }

    /// End the session.
    pub fn terminate(&mut self) {
        self.screens.clear();
    }

    pub fn handle_intent(&mut self, intent: Intent) -> Result<(), NavigationBoundary> {
        let viewport = self.viewport;
        match intent {
            Intent::MoveCursor(delta) => {
                let screen = self.screens.last_mut().ok_or(NavigationBoundary::Inactive)?;
                screen.move_cursor(delta, viewport);
                Ok(())
            }
            Intent::Scroll(delta) => {
                let screen = self.screens.last_mut().ok_or(NavigationBoundary::Inactive)?;
                screen.scroll_by(delta, viewport);
                Ok(())
            }
            Intent::Drill(row) => {
                let screen = self.top().ok_or(NavigationBoundary::Inactive)?;
                let target = screen
                    .rows
                    .iter()
                    .find(|r| r.id == row)
                    .and_then(|r| screen.kind.content().drill(r));
                match target {
                    Some(target) => self.push(&target, Filter::All),
                    None => Err(NavigationBoundary::NotDrillable { row }),
                }
            }
            Intent::Back => self.pop(),
            Intent::Filter(filter) => self.apply_filter(filter),
            Intent::Quit => {
                self.terminate();
                Ok(())
            }
        }
    }

    /// Describe the top screen for rendering.
    pub fn snapshot(&self) -> Option<ScreenSnapshot> {
        let screen = self.top()?;
        let node = self.model.node(&screen.node)?;
        let end = (screen.scroll + self.viewport).min(screen.rows.len());
        let window = screen.rows.get(screen.scroll..end).unwrap_or_default();

        let breadcrumb = self
            .screens
            .iter()
            .filter_map(|s| self.model.node(&s.node))
            .map(|n| n.label.clone())
            .collect();

        Some(ScreenSnapshot {
            title: node.label.clone(),
            breadcrumb,
            kind: screen.kind,
            columns: screen.kind.content().columns(node).to_vec(),
            rows: window.to_vec(),
            cursor: screen.cursor,
            scroll: screen.scroll,
            total_rows: screen.rows.len(),
            filter: screen.filter.describe(),
            status: self.result.status(),
        })
    }

    /// Id of the node shown by the top screen.
    pub fn current_node(&self) -> Option<&str> {
        self.top().map(Screen::node)
    }

    /// Returns true when the root screen is on top.
    pub fn at_root(&self) -> bool {
        self.current_node() == Some(ROOT_ID) && self.screens.len() == 1
    }
}
