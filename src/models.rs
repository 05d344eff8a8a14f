use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Address of a task on the remote side: the owning task list plus the
/// task id inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId {
    pub list: String,
    pub task: String,
}

impl RemoteId {
    pub fn new(list: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            list: list.into(),
            task: task.into(),
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.list, self.task)
    }
}

/// One synchronizable task as the engine sees it. `context` is the owning
/// note's title and becomes the remote notes text. `remote_id` is absent
/// until the task has been pushed or matched to an existing remote task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<NaiveDate>,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
}

/// File path -> ordered task descriptors for that note. BTreeMap keeps
/// serialization and iteration order stable between runs.
pub type TaskMap = BTreeMap<PathBuf, Vec<Task>>;

/// Terminal form written back into a note's task line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Done(NaiveDate),
    Canceled,
}

/// Quiver note content record (`content.json`): a title plus an ordered
/// list of typed cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteContent {
    pub title: String,
    pub cells: Vec<Cell>,
}

/// One content cell. The kind stays a plain string and unknown attributes
/// are kept in `extra` so a read-modify-write cycle never loses fields the
/// engine does not understand (diagram cells, text cells, code language).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Cell {
    pub fn markdown(data: impl Into<String>) -> Self {
        Self {
            kind: "markdown".to_string(),
            data: data.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_markdown(&self) -> bool {
        self.kind == "markdown"
    }
}
