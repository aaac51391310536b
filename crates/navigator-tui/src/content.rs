//! Navigable content model.
//!
//! A [`ContentModel`] turns the flat record list of a [`RunResult`] into a
//! tree:
//!
//! ```text
//! run
//! ├── play:<id>
//! │   └── task:<id>
//! │       └── result:<seq>      one per host
//! ├── result:<seq>              orphan: its task was never announced
//! └── output
//!     └── line:<seq>            raw text and decode errors
//! ```
//!
//! Node ids are derived from identifiers in the records, so they are stable
//! across rebuilds, refreshes and filtering. Children are kept in ascending
//! sequence order. The model is updated incrementally as a live run grows;
//! filtering produces id lists and never changes the tree.

use std::collections::{BTreeMap, HashMap};

use navigator_core::{EventPayload, EventRecord, RunStatus, Sequence, TaskOutcome};
use navigator_runner::RunResult;
use serde_json::Value;
use tracing::{debug, warn};

use crate::filter::Filter;

/// Stable node identifier.
pub type NodeId = String;

/// Id of the root node.
pub const ROOT_ID: &str = "run";

/// Id of the node grouping unstructured output.
pub const OUTPUT_ID: &str = "output";

/// Nested result payloads are flattened to at most this depth.
const MAX_FLATTEN_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Run,
    Play,
    Task,
    HostResult,
    Output,
    OutputLine,
}

impl NodeKind {
    /// Returns true for nodes whose children form a list screen.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Run | Self::Play | Self::Task | Self::Output)
    }
}

/// One node of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: String,
    /// Sequence number of the record that created the node
    pub seq: Sequence,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: BTreeMap<String, String>,
}

impl ContentNode {
    fn new(id: impl Into<NodeId>, kind: NodeKind, label: impl Into<String>, seq: Sequence) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            seq,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    fn set(&mut self, key: &str, value: impl ToString) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    /// Attribute value, or the label for the pseudo attribute `label`.
    pub fn value(&self, key: &str) -> Option<&str> {
        if key == "label" {
            return Some(&self.label);
        }
        self.attributes.get(key).map(String::as_str)
    }

    /// Worst task outcome recorded on this node, if any.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.attributes
            .get("outcome")
            .and_then(|value| TaskOutcome::from_wire(value))
    }
}

/// A column of a list screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub title: &'static str,
    /// Attribute shown in the column; `label` is the node label
    pub key: &'static str,
    /// Preferred width; 0 takes the remaining space
    pub width: u16,
}

const fn column(title: &'static str, key: &'static str, width: u16) -> Column {
    Column { title, key, width }
}

const TASK_COLUMNS: &[Column] = &[
    column("Task", "label", 0),
    column("Action", "action", 24),
    column("Hosts", "results", 6),
    column("Outcome", "outcome", 12),
];
const RESULT_COLUMNS: &[Column] = &[
    column("Host", "label", 20),
    column("Outcome", "outcome", 12),
    column("Task", "task", 24),
    column("Message", "result.msg", 0),
];
const LINE_COLUMNS: &[Column] = &[column("Source", "origin", 12), column("Line", "label", 0)];
const ROOT_COLUMNS: &[Column] = &[
    column("Name", "label", 0),
    column("Kind", "kind", 8),
    column("Outcome", "outcome", 12),
];

/// Columns used to list children of a `parent` node.
///
/// The root mixes plays, orphans and the output group, so it uses a generic
/// projection.
pub fn columns_for(parent: NodeKind) -> &'static [Column] {
    match parent {
        NodeKind::Run => ROOT_COLUMNS,
        NodeKind::Play => TASK_COLUMNS,
        NodeKind::Task => RESULT_COLUMNS,
        NodeKind::Output => LINE_COLUMNS,
        NodeKind::HostResult | NodeKind::OutputLine => &[],
    }
}

/// Cell values of `node` for `columns`.
pub fn project(node: &ContentNode, columns: &[Column]) -> Vec<String> {
    columns
        .iter()
        .map(|column| node.value(column.key).unwrap_or_default().to_string())
        .collect()
}

/// Tree built from a run's records.
#[derive(Debug, Clone)]
pub struct ContentModel {
    nodes: HashMap<NodeId, ContentNode>,
    applied: usize,
    last_seq: Option<Sequence>,
}

impl ContentModel {
    /// Create a model with only the root node.
    pub fn new(run_id: &str) -> Self {
        let mut root = ContentNode::new(ROOT_ID, NodeKind::Run, format!("run {run_id}"), 0);
        root.set("run_id", run_id);
        root.set("kind", "run");
        root.set("status", RunStatus::Running);
        root.set("records", 0);

        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID.to_string(), root);
        Self {
            nodes,
            applied: 0,
            last_seq: None,
        }
    }

    /// Build the tree for every record currently in `result`.
    pub fn build(result: &RunResult) -> Self {
        let mut model = Self::new(&result.run_id());
        model.refresh(result);
        model
    }

    /// Apply records appended to `result` since the last refresh.
    ///
    /// Returns the number of records applied.
    pub fn refresh(&mut self, result: &RunResult) -> usize {
        let start = self.applied;
        let applied = result.with_records(|records| {
            let fresh = records.get(start..).unwrap_or_default();
            for record in fresh {
                self.apply(record);
            }
            fresh.len()
        });
        self.applied += applied;
        self.set_status(result.status());
        applied
    }

    /// Record the run status on the root.
    pub fn set_status(&mut self, status: RunStatus) {
        self.root_mut().set("status", status);
    }

    /// Number of records applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn root(&self) -> &ContentNode {
        &self.nodes[ROOT_ID]
    }

    pub fn node(&self, id: &str) -> Option<&ContentNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Attributes of a node.
    pub fn attributes_of(&self, id: &str) -> Option<&BTreeMap<String, String>> {
        self.nodes.get(id).map(|node| &node.attributes)
    }

    /// Children of `parent` that match `filter`, in sequence order.
    ///
    /// Returns `None` for an unknown parent.
    pub fn filter(&self, parent: &str, filter: &Filter) -> Option<Vec<NodeId>> {
        let parent = self.nodes.get(parent)?;
        Some(
            parent
                .children
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .filter(|child| filter.matches(child))
                .map(|child| child.id.clone())
                .collect(),
        )
    }

    /// Ids from the root to `id`, inclusive.
    pub fn path_to(&self, id: &str) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            path.push(node.id.clone());
            current = node.parent.as_deref().and_then(|parent| self.nodes.get(parent));
        }
        path.reverse();
        path
    }

    /// Apply one record.
    ///
    /// Records must arrive in sequence order; a record at or below the last
    /// applied sequence number is ignored.
    pub fn apply(&mut self, record: &EventRecord) {
        if self.last_seq.is_some_and(|last| record.seq <= last) {
            debug!(seq = record.seq, "Ignoring already applied record");
            return;
        }
        self.last_seq = Some(record.seq);
        let seq = record.seq;

        match &record.payload {
            EventPayload::PlayStarted { play_id, name } => self.add_play(seq, play_id, name),
            EventPayload::TaskStarted {
                task_id,
                play_id,
                name,
                action,
            } => self.add_task(seq, task_id, play_id.as_deref(), name, action.as_deref()),
            EventPayload::TaskResult {
                task_id,
                host,
                outcome,
                detail,
            } => self.add_result(seq, task_id, host, *outcome, detail),
            EventPayload::RunStats { stats } => {
                let root = self.root_mut();
                for (key, value) in stats {
                    flatten_into(&mut root.attributes, &format!("stats.{key}"), value, 0);
                }
            }
            EventPayload::RawText { origin, line } => {
                let mut node = ContentNode::new(format!("line:{seq}"), NodeKind::OutputLine, line, seq);
                node.set("origin", origin);
                node.set("kind", "line");
                self.add_output_line(node);
            }
            EventPayload::DecodeError { line, reason } => {
                let mut node = ContentNode::new(format!("line:{seq}"), NodeKind::OutputLine, line, seq);
                node.set("origin", "decode error");
                node.set("reason", reason);
                node.set("kind", "line");
                self.add_output_line(node);
            }
        }

        let root = self.root_mut();
        root.set("records", record.seq);
    }

    fn add_play(&mut self, seq: Sequence, play_id: &str, name: &str) {
        let id = format!("play:{play_id}");
        if self.nodes.contains_key(&id) {
            warn!("Play {} announced twice, keeping the first", play_id);
            return;
        }

        let label = if name.is_empty() {
            format!("play {play_id}")
        } else {
            name.to_string()
        };
        let mut node = ContentNode::new(id, NodeKind::Play, label, seq);
        node.set("kind", "play");
        node.set("play_id", play_id);
        node.set("name", name);
        node.set("tasks", 0);
        self.attach(ROOT_ID, node);
        self.bump(ROOT_ID, "plays");
    }

    fn add_task(
        &mut self,
        seq: Sequence,
        task_id: &str,
        play_id: Option<&str>,
        name: &str,
        action: Option<&str>,
    ) {
        let id = format!("task:{task_id}");
        if self.nodes.contains_key(&id) {
            debug!("Task {} announced again, keeping the first", task_id);
            return;
        }

        let parent = match play_id {
            Some(play_id) if self.nodes.contains_key(&format!("play:{play_id}")) => {
                format!("play:{play_id}")
            }
            Some(play_id) => {
                warn!("Task {} belongs to unannounced play {}, attaching to run", task_id, play_id);
                ROOT_ID.to_string()
            }
            None => self.latest_play().unwrap_or_else(|| ROOT_ID.to_string()),
        };

        let label = if name.is_empty() {
            format!("task {task_id}")
        } else {
            name.to_string()
        };
        let mut node = ContentNode::new(id, NodeKind::Task, label, seq);
        node.set("kind", "task");
        node.set("task_id", task_id);
        node.set("name", name);
        node.set("results", 0);
        if let Some(action) = action {
            node.set("action", action);
        }
        if let Some(play) = self.nodes.get(&parent).filter(|p| p.kind == NodeKind::Play) {
            let play_name = play.label.clone();
            node.set("play", play_name);
        }

        self.attach(&parent, node);
        if parent != ROOT_ID {
            self.bump(&parent, "tasks");
        }
        self.bump(ROOT_ID, "tasks");
    }

    fn add_result(
        &mut self,
        seq: Sequence,
        task_id: &str,
        host: &str,
        outcome: TaskOutcome,
        detail: &Value,
    ) {
        let task_node_id = format!("task:{task_id}");
        let task = self.nodes.get(&task_node_id).map(|task| (task.label.clone(), task.parent.clone()));

        let mut node = ContentNode::new(format!("result:{seq}"), NodeKind::HostResult, host, seq);
        node.set("kind", "result");
        node.set("host", host);
        node.set("outcome", outcome);
        node.set("task_id", task_id);
        flatten_into(&mut node.attributes, "result", detail, 0);

        let parent = match &task {
            Some((task_name, _)) => {
                node.set("task", task_name);
                task_node_id.clone()
            }
            None => {
                warn!(
                    "Result for unannounced task {} on {}, attaching to run as orphan",
                    task_id, host
                );
                node.set("orphan", true);
                node.set("task", format!("unknown task {task_id}"));
                ROOT_ID.to_string()
            }
        };

        self.attach(&parent, node);
        self.bump(ROOT_ID, "results");

        match task {
            Some((_, play)) => {
                self.record_outcome(&task_node_id, outcome);
                self.bump(&task_node_id, "results");
                if let Some(play) = play.filter(|p| p != ROOT_ID) {
                    self.record_outcome(&play, outcome);
                }
            }
            None => self.bump(ROOT_ID, "orphans"),
        }
        self.record_outcome(ROOT_ID, outcome);
    }

    fn add_output_line(&mut self, node: ContentNode) {
        if !self.nodes.contains_key(OUTPUT_ID) {
            let mut output = ContentNode::new(OUTPUT_ID, NodeKind::Output, "Output", node.seq);
            output.set("kind", "output");
            output.set("lines", 0);
            self.attach(ROOT_ID, output);
        }
        if node.attributes.contains_key("reason") {
            self.bump(ROOT_ID, "decode_errors");
        }
        self.attach(OUTPUT_ID, node);
        self.bump(OUTPUT_ID, "lines");
    }

    fn latest_play(&self) -> Option<NodeId> {
        self.root()
            .children
            .iter()
            .rev()
            .find(|id| id.starts_with("play:"))
            .cloned()
    }

    fn attach(&mut self, parent: &str, mut node: ContentNode) {
        node.parent = Some(parent.to_string());
        let id = node.id.clone();
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.push(id.clone());
        }
        self.nodes.insert(id, node);
    }

    fn bump(&mut self, id: &str, key: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            let count = node
                .attributes
                .get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            node.set(key, count + 1);
        }
    }

    /// Count the outcome and keep the worst one.
    fn record_outcome(&mut self, id: &str, outcome: TaskOutcome) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let worst = match node.outcome() {
            Some(current) if current >= outcome => current,
            _ => outcome,
        };
        self.bump(id, outcome.as_str());
        if let Some(node) = self.nodes.get_mut(id) {
            node.set("outcome", worst);
        }
    }

    fn root_mut(&mut self) -> &mut ContentNode {
        self.nodes
            .entry(ROOT_ID.to_string())
            .or_insert_with(|| ContentNode::new(ROOT_ID, NodeKind::Run, "run", 0))
    }
}

/// Flatten a JSON value into `prefix.key` attributes.
fn flatten_into(attributes: &mut BTreeMap<String, String>, prefix: &str, value: &Value, depth: usize) {
    match value {
        Value::Null => {}
        Value::Object(map) if depth < MAX_FLATTEN_DEPTH => {
            for (key, value) in map {
                flatten_into(attributes, &format!("{prefix}.{key}"), value, depth + 1);
            }
        }
        Value::Array(items) if depth < MAX_FLATTEN_DEPTH && items.iter().all(is_scalar) => {
            let joined: Vec<String> = items.iter().map(scalar_text).collect();
            attributes.insert(prefix.to_string(), joined.join(", "));
        }
        Value::String(s) => {
            attributes.insert(prefix.to_string(), s.clone());
        }
        other if is_scalar(other) => {
            attributes.insert(prefix.to_string(), scalar_text(other));
        }
        other => {
            attributes.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navigator_core::LineOrigin;
    use serde_json::json;

    fn rec(seq: Sequence, payload: EventPayload) -> EventRecord {
        EventRecord::new(seq, payload)
    }

    fn play(seq: Sequence, id: &str, name: &str) -> EventRecord {
        rec(
            seq,
            EventPayload::PlayStarted {
                play_id: id.into(),
                name: name.into(),
            },
        )
    }

    fn task(seq: Sequence, id: &str, play: &str, name: &str) -> EventRecord {
        rec(
            seq,
            EventPayload::TaskStarted {
                task_id: id.into(),
                play_id: Some(play.into()),
                name: name.into(),
                action: Some("ansible.builtin.ping".into()),
            },
        )
    }

    fn result(seq: Sequence, task: &str, host: &str, outcome: TaskOutcome) -> EventRecord {
        rec(
            seq,
            EventPayload::TaskResult {
                task_id: task.into(),
                host: host.into(),
                outcome,
                detail: json!({"msg": format!("{host} done"), "changed": outcome == TaskOutcome::Changed}),
            },
        )
    }

    fn sample_records() -> Vec<EventRecord> {
        vec![
            play(1, "p1", "Configure web"),
            task(2, "t1", "p1", "ping"),
            result(3, "t1", "web1", TaskOutcome::Ok),
            result(4, "t1", "web2", TaskOutcome::Failed),
            rec(
                5,
                EventPayload::RawText {
                    origin: LineOrigin::Stderr,
                    line: "[WARNING]: something".into(),
                },
            ),
            result(6, "t9", "db1", TaskOutcome::Unreachable),
            rec(
                7,
                EventPayload::RunStats {
                    stats: json!({"ok": {"web1": 1}, "failures": {"web2": 1}})
                        .as_object()
                        .cloned()
                        .unwrap(),
                },
            ),
        ]
    }

    fn sample_model() -> ContentModel {
        let result = RunResult::from_records("r1", sample_records(), RunStatus::Failed, None);
        ContentModel::build(&result)
    }

    #[test]
    fn test_tree_structure() {
        let model = sample_model();
        let root = model.root();
        assert_eq!(root.children, vec!["play:p1", "output", "result:6"]);

        let play = model.node("play:p1").unwrap();
        assert_eq!(play.children, vec!["task:t1"]);

        let task = model.node("task:t1").unwrap();
        assert_eq!(task.children, vec!["result:3", "result:4"]);
        assert_eq!(task.attributes["results"], "2");
        assert_eq!(task.attributes["ok"], "1");
        assert_eq!(task.attributes["failed"], "1");
        assert_eq!(task.outcome(), Some(TaskOutcome::Failed));
        assert_eq!(task.attributes["play"], "Configure web");
    }

    #[test]
    fn test_orphan_result_under_root() {
        let model = sample_model();
        let orphan = model.node("result:6").unwrap();
        assert_eq!(orphan.parent.as_deref(), Some(ROOT_ID));
        assert_eq!(orphan.attributes["orphan"], "true");
        assert_eq!(model.root().attributes["orphans"], "1");
    }

    #[test]
    fn test_stats_and_status_on_root() {
        let model = sample_model();
        let attrs = model.attributes_of(ROOT_ID).unwrap();
        assert_eq!(attrs["stats.ok.web1"], "1");
        assert_eq!(attrs["stats.failures.web2"], "1");
        assert_eq!(attrs["status"], "failed");
        assert_eq!(attrs["outcome"], "unreachable");
        assert_eq!(attrs["records"], "7");
    }

    #[test]
    fn test_result_detail_flattened() {
        let model = sample_model();
        let attrs = model.attributes_of("result:4").unwrap();
        assert_eq!(attrs["result.msg"], "web2 done");
        assert_eq!(attrs["result.changed"], "false");
        assert_eq!(attrs["task"], "ping");
    }

    #[test]
    fn test_filter_match_all_equals_children() {
        let model = sample_model();
        for id in ["run", "play:p1", "task:t1", "output"] {
            let filtered = model.filter(id, &Filter::All).unwrap();
            assert_eq!(filtered, model.node(id).unwrap().children);
        }
        assert!(model.filter("missing", &Filter::All).is_none());
    }

    #[test]
    fn test_filter_keeps_ids() {
        let model = sample_model();
        let failed = model
            .filter("task:t1", &Filter::parse("outcome=failed"))
            .unwrap();
        assert_eq!(failed, vec!["result:4"]);
        assert_eq!(model.node("task:t1").unwrap().children.len(), 2);
    }

    #[test]
    fn test_incremental_refresh_matches_build() {
        let records = sample_records();
        let full = ContentModel::build(&RunResult::from_records(
            "r1",
            records.clone(),
            RunStatus::Failed,
            None,
        ));

        let mut incremental = ContentModel::new("r1");
        for record in &records {
            incremental.apply(record);
        }
        incremental.set_status(RunStatus::Failed);

        for (id, node) in &full.nodes {
            assert_eq!(incremental.node(id), Some(node), "node {id}");
        }
        assert_eq!(incremental.len(), full.len());
    }

    #[test]
    fn test_duplicate_or_stale_records_ignored() {
        let mut model = ContentModel::new("r1");
        model.apply(&play(1, "p1", "one"));
        model.apply(&play(1, "p1", "one"));
        model.apply(&play(2, "p1", "again"));
        assert_eq!(model.root().children, vec!["play:p1"]);
        assert_eq!(model.node("play:p1").unwrap().label, "one");
    }

    #[test]
    fn test_task_without_play_uses_latest_play() {
        let mut model = ContentModel::new("r1");
        model.apply(&play(1, "p1", "one"));
        model.apply(&rec(
            2,
            EventPayload::TaskStarted {
                task_id: "t1".into(),
                play_id: None,
                name: "noop".into(),
                action: None,
            },
        ));
        assert_eq!(model.path_to("task:t1"), vec!["run", "play:p1", "task:t1"]);
    }

    #[test]
    fn test_projection() {
        let model = sample_model();
        let task = model.node("task:t1").unwrap();
        let cells = project(task, columns_for(NodeKind::Play));
        assert_eq!(cells, vec!["ping", "ansible.builtin.ping", "2", "failed"]);
        assert!(columns_for(NodeKind::HostResult).is_empty());
    }
}
